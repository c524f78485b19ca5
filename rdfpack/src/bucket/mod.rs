//! Bucket router: partitions routed quads by (predicate, subject kind,
//! object kind) into per-bucket run files and drives their external sort.
//!
//! A bucket owns a fixed set of writer slots. Rolled slot files are sorted on
//! background tasks and fed into the bucket's merge ladder; closing the
//! router finalizes every bucket into one sorted run plus sorted lists of its
//! distinct objects and subjects.

mod key;

pub use key::{BucketKey, ObjectKind};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingest::Quad;
use crate::merge::{merge_value_lists_bounded, remove_all, sort_run, MergeLadder};
use crate::run::{RunEntry, RunWriter, TempCodec};
use crate::task::TaskSet;

/// Fully merged run of a finalized bucket.
pub const FINAL_RUN: &str = "final.run";
/// Sorted distinct objects of a finalized bucket.
pub const OBJECTS: &str = "objects";
/// Sorted distinct subjects of a finalized bucket.
pub const SUBJECTS: &str = "subjects";

/// First-seen ids for names, shared by all routing threads.
#[derive(Debug, Default)]
pub struct IdTable {
    inner: RwLock<IdTableInner>,
}

#[derive(Debug, Default)]
struct IdTableInner {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl IdTable {
    pub fn from_names(names: Vec<String>) -> Self {
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u32))
            .collect();
        IdTable {
            inner: RwLock::new(IdTableInner { ids, names }),
        }
    }

    pub fn id_of(&self, name: &str) -> u32 {
        if let Some(&id) = self.inner.read().ids.get(name) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }
        let id = inner.names.len() as u32;
        inner.names.push(name.to_string());
        inner.ids.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.inner.read().ids.get(name).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<String> {
        self.inner.read().names.get(id as usize).cloned()
    }

    /// Names in id order.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().names.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Predicate and graph ids of one ingestion run.
#[derive(Debug, Default)]
pub struct Registry {
    pub predicates: IdTable,
    pub graphs: IdTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What a finalized bucket left in the work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub key: BucketKey,
    pub entries: u64,
    pub objects: u64,
    pub subjects: u64,
}

impl BucketRecord {
    /// Work directory of the bucket under `work`.
    pub fn dir(&self, work: &Path) -> PathBuf {
        bucket_dir(work, &self.key)
    }

    pub fn final_run(&self, work: &Path) -> PathBuf {
        self.dir(work).join(FINAL_RUN)
    }

    pub fn objects_list(&self, work: &Path) -> PathBuf {
        self.dir(work).join(OBJECTS)
    }

    pub fn subjects_list(&self, work: &Path) -> PathBuf {
        self.dir(work).join(SUBJECTS)
    }
}

fn bucket_dir(work: &Path, key: &BucketKey) -> PathBuf {
    work.join(key.relative_dir()).join(key.object_file_name())
}

/// Tunables every bucket shares.
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub slots: usize,
    pub roll_threshold: u64,
    pub fan_in: usize,
    pub codec: TempCodec,
}

impl RouterOptions {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        RouterOptions {
            slots: cfg.writer_slots.max(1),
            roll_threshold: cfg.roll_threshold.max(1),
            fan_in: cfg.fan_in.max(2),
            codec: TempCodec::new(cfg.temp_compression, cfg.zstd_level),
        }
    }
}

struct Shared {
    opts: RouterOptions,
    sorts: TaskSet,
}

#[derive(Default)]
struct Slot {
    writer: Option<RunWriter>,
}

/// All quads sharing one [`BucketKey`].
pub struct Bucket {
    key: BucketKey,
    dir: PathBuf,
    slots: Vec<Mutex<Slot>>,
    ladder: Mutex<MergeLadder>,
    object_lists: Mutex<Vec<PathBuf>>,
    next_file: AtomicU64,
    shared: Arc<Shared>,
}

impl Bucket {
    fn create(work: &Path, key: BucketKey, shared: Arc<Shared>) -> Result<Self> {
        let dir = bucket_dir(work, &key);
        fs::create_dir_all(&dir)?;
        debug!("created bucket {}", dir.display());
        let slots = (0..shared.opts.slots).map(|_| Mutex::default()).collect();
        Ok(Bucket {
            key,
            ladder: Mutex::new(MergeLadder::new(&dir, shared.opts.fan_in)),
            dir,
            slots,
            object_lists: Mutex::new(Vec::new()),
            next_file: AtomicU64::new(0),
            shared,
        })
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_id(&self) -> u64 {
        self.next_file.fetch_add(1, Ordering::Relaxed)
    }

    /// A free slot if there is one, else wait on a random slot.
    fn claim_slot(&self) -> MutexGuard<'_, Slot> {
        for slot in &self.slots {
            if let Some(guard) = slot.try_lock() {
                return guard;
            }
        }
        let i = rand::rng().random_range(0..self.slots.len());
        self.slots[i].lock()
    }

    pub fn write(self: &Arc<Self>, entry: &RunEntry) -> Result<()> {
        let mut slot = self.claim_slot();
        if slot.writer.is_none() {
            let path = self.dir.join(format!("run-{}", self.next_id()));
            slot.writer = Some(self.shared.opts.codec.run_writer(&path)?);
        }
        let Some(writer) = slot.writer.as_mut() else {
            return Err(Error::invariant("writer slot without a writer"));
        };
        writer.write(entry)?;
        if writer.bytes_written() >= self.shared.opts.roll_threshold {
            let full = slot.writer.take();
            drop(slot);
            if let Some(full) = full {
                self.hand_off(full)?;
            }
        }
        Ok(())
    }

    fn hand_off(self: &Arc<Self>, writer: RunWriter) -> Result<()> {
        let entries = writer.entries();
        let path = writer.finish()?;
        if entries == 0 {
            fs::remove_file(&path)?;
            return Ok(());
        }
        let bucket = Arc::clone(self);
        self.shared
            .sorts
            .spawn(move || bucket.sort_into_ladder(path));
        Ok(())
    }

    fn sort_into_ladder(&self, run: PathBuf) -> Result<()> {
        let codec = self.shared.opts.codec;
        let id = self.next_id();
        let sorted = self.dir.join(format!("local-{}", id));
        let objects = self.dir.join(format!("objects-{}", id));
        let stats = sort_run(&run, &sorted, &objects, codec)?;
        fs::remove_file(&run)?;
        debug!(
            "sorted {} ({} -> {} entries)",
            run.display(),
            stats.input_entries,
            stats.output_entries
        );
        self.object_lists.lock().push(objects);
        let mut pending = self.ladder.lock().add(0, sorted);
        while let Some(merge) = pending {
            let out = merge.run(codec)?;
            pending = self.ladder.lock().add(merge.level, out);
        }
        Ok(())
    }

    /// Close every slot's file and queue it for sorting.
    fn flush(self: &Arc<Self>) -> Result<()> {
        for slot in &self.slots {
            let writer = slot.lock().writer.take();
            if let Some(writer) = writer {
                self.hand_off(writer)?;
            }
        }
        Ok(())
    }

    /// Merge everything sorted so far into the final run and write the
    /// distinct-object and distinct-subject lists. Background sorts must have
    /// completed.
    pub fn finalize(&self) -> Result<BucketRecord> {
        let opts = self.shared.opts;
        let ladder = std::mem::replace(
            &mut *self.ladder.lock(),
            MergeLadder::new(&self.dir, opts.fan_in),
        );
        let final_run = self.dir.join(FINAL_RUN);
        let entries = ladder.finish(&final_run, opts.codec)?;

        let lists = std::mem::take(&mut *self.object_lists.lock());
        let objects =
            merge_value_lists_bounded(&lists, &self.dir.join(OBJECTS), opts.fan_in, opts.codec)?;
        remove_all(&lists);

        let subjects = write_subjects(&final_run, &self.dir.join(SUBJECTS), opts.codec)?;
        info!(
            "bucket {} finalized: {} entries, {} objects, {} subjects",
            self.dir.display(),
            entries,
            objects,
            subjects
        );
        Ok(BucketRecord {
            key: self.key.clone(),
            entries,
            objects,
            subjects,
        })
    }
}

/// Distinct subjects of a sorted run, in order.
fn write_subjects(run: &Path, output: &Path, codec: TempCodec) -> Result<u64> {
    let mut out = codec.list_writer(output)?;
    let mut last: Option<Vec<u8>> = None;
    for entry in codec.run_reader(run)? {
        let entry = entry?;
        if last.as_deref() != Some(entry.subject.as_slice()) {
            out.write(&entry.subject)?;
            last = Some(entry.subject);
        }
    }
    let n = out.count();
    out.finish()?;
    Ok(n)
}

/// Routes quads to buckets, creating one bucket per distinct key.
pub struct Router {
    work: PathBuf,
    buckets: RwLock<HashMap<BucketKey, Arc<Bucket>>>,
    registry: Registry,
    shared: Arc<Shared>,
}

impl Router {
    pub fn new(work: &Path, cfg: &IngestConfig) -> Result<Self> {
        Self::with_registry(work, cfg, Registry::new())
    }

    /// Background sorts run on a pool of `sort_permits` threads.
    pub fn with_registry(work: &Path, cfg: &IngestConfig, registry: Registry) -> Result<Self> {
        Ok(Router {
            work: work.to_path_buf(),
            buckets: RwLock::new(HashMap::new()),
            registry,
            shared: Arc::new(Shared {
                opts: RouterOptions::from_config(cfg),
                sorts: TaskSet::new("rdfpack-sort", cfg.sort_permits())?,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    fn bucket(&self, key: BucketKey) -> Result<Arc<Bucket>> {
        if let Some(b) = self.buckets.read().get(&key) {
            return Ok(Arc::clone(b));
        }
        let mut buckets = self.buckets.write();
        if let Some(b) = buckets.get(&key) {
            return Ok(Arc::clone(b));
        }
        let bucket = Arc::new(Bucket::create(&self.work, key.clone(), self.shared.clone())?);
        buckets.insert(key, Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Route one quad, already assigned temporary graph id `graph`.
    pub fn route(&self, quad: &Quad, graph: u32) -> Result<()> {
        let predicate = self.registry.predicates.id_of(&quad.predicate);
        let (key, subject, object) = BucketKey::classify(predicate, &quad.subject, &quad.object)?;
        let bucket = self.bucket(key)?;
        bucket.write(&RunEntry::new(subject, object, graph))
    }

    /// Flush every slot, wait for all background sorts, then finalize every
    /// bucket. Records come back ordered by key.
    pub fn close(self, finalize_permits: usize) -> Result<(Registry, Vec<BucketRecord>)> {
        let buckets: Vec<Arc<Bucket>> = self.buckets.read().values().cloned().collect();
        let mut flushed = Ok(());
        for b in &buckets {
            if let Err(e) = b.flush() {
                flushed = Err(e);
                break;
            }
        }
        let drained = self.shared.sorts.drain();
        flushed?;
        drained?;

        let records = Arc::new(Mutex::new(Vec::with_capacity(buckets.len())));
        let tasks = TaskSet::new("rdfpack-finalize", finalize_permits)?;
        for bucket in buckets {
            let records = Arc::clone(&records);
            tasks.spawn(move || {
                let record = bucket.finalize()?;
                records.lock().push(record);
                Ok(())
            });
        }
        tasks.drain()?;
        let mut records = std::mem::take(&mut *records.lock());
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((self.registry, records))
    }
}
