//! Staged ingestion of a manifest into a corpus directory.
//!
//! Stages run strictly in order and each ends with a barrier: every task of
//! the stage is drained before the next one starts, and completion is
//! recorded in `.ingest/checkpoint.json` so a failed run can be resumed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::staging::QuadStage;
use super::{Manifest, ManifestEntry, OxigraphSource, QuadSource};
use crate::adjacency::{compact_bucket, CompactOptions, CompactionInput};
use crate::bucket::{BucketRecord, ObjectKind, Router};
use crate::codec::{LiteralGroup, Term, ValueCodec};
use crate::config::IngestConfig;
use crate::dictionary::{Dictionary, DictionaryBuilder};
use crate::error::{Error, Result};
use crate::merge::{merge_value_lists_bounded, remove_all};
use crate::run::TempCodec;
use crate::section::{SectionCache, SectionOptions};
use crate::task::TaskSet;

pub const INGEST_DIR: &str = ".ingest";
pub const IRIS: &str = "iris";
pub const PREDICATES: &str = "predicates";
pub const GRAPHS: &str = "graphs";

const CHECKPOINT: &str = "checkpoint.json";
const REGISTRY: &str = "registry.json";
const CONFIG: &str = "config.json";
const WORK: &str = "work";
const COLLATE: &str = "collate";
const STAGING: &str = "staging";

/// Ingestion stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Route = 1,
    LiteralCollation = 2,
    IriCollation = 3,
    Compaction = 4,
    Cleanup = 5,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Route,
        Stage::LiteralCollation,
        Stage::IriCollation,
        Stage::Compaction,
        Stage::Cleanup,
    ];

    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn from_number(n: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.number() == n)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Route => "route",
            Stage::LiteralCollation => "literal collation",
            Stage::IriCollation => "IRI collation",
            Stage::Compaction => "compaction",
            Stage::Cleanup => "cleanup",
        };
        write!(f, "stage {} ({})", self.number(), name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Checkpoint {
    completed: u32,
}

/// Counters of one ingestion run. Stages skipped by a resume contribute
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_read: usize,
    pub files_skipped: Vec<PathBuf>,
    pub quads: u64,
    pub buckets: usize,
    pub dictionaries: usize,
}

/// Runs the ingestion stages for one corpus directory.
pub struct Ingestor {
    root: PathBuf,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(root: &Path, config: IngestConfig) -> Self {
        Ingestor {
            root: root.to_path_buf(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn ingest_dir(&self) -> PathBuf {
        self.root.join(INGEST_DIR)
    }

    fn work_dir(&self) -> PathBuf {
        self.ingest_dir().join(WORK)
    }

    fn codec(&self) -> TempCodec {
        TempCodec::new(self.config.temp_compression, self.config.zstd_level)
    }

    /// Run every stage from `resume_stage` on. Stage 1 starts from scratch;
    /// any later stage requires its predecessors to be checkpointed.
    pub fn run(&mut self, manifest: &Manifest, resume_stage: u32) -> Result<IngestReport> {
        let first = Stage::from_number(resume_stage).ok_or_else(|| {
            Error::Resume(format!(
                "stage {} does not exist (expected 1 to {})",
                resume_stage,
                Stage::ALL.len()
            ))
        })?;
        self.config.validate()?;
        if first == Stage::Route {
            self.start_fresh()?;
        } else {
            self.check_resumable(first)?;
        }

        let mut report = IngestReport::default();
        for stage in Stage::ALL.iter().copied().filter(|s| *s >= first) {
            info!("starting {}", stage);
            match stage {
                Stage::Route => self.route(manifest, &mut report)?,
                Stage::LiteralCollation => {
                    report.dictionaries += self.collate_literals()?;
                }
                Stage::IriCollation => {
                    self.collate_iris()?;
                    report.dictionaries += 1;
                }
                Stage::Compaction => report.buckets = self.compact()?,
                Stage::Cleanup => self.cleanup()?,
            }
            if stage != Stage::Cleanup {
                self.save_checkpoint(stage)?;
            }
            info!("finished {}", stage);
        }
        Ok(report)
    }

    /// Stage 1 rebuilds the corpus from nothing: any ingestion state and
    /// every file of an earlier corpus in the output directory is removed.
    fn start_fresh(&self) -> Result<()> {
        let ingest = self.ingest_dir();
        if ingest.exists() {
            info!("Removing previous ingestion state at: {:?}", ingest);
            fs::remove_dir_all(&ingest)?;
        }
        remove_corpus_files(&self.root)?;
        fs::create_dir_all(self.work_dir().join(STAGING))?;
        self.config.save_to_file(&ingest.join(CONFIG))
    }

    /// Verify the checkpoint and adopt the configuration the run started
    /// with, so temp files are read back with the codec they were written in.
    fn check_resumable(&mut self, first: Stage) -> Result<()> {
        let checkpoint = self.load_checkpoint()?;
        let needed = first.number() - 1;
        if checkpoint.completed < needed {
            return Err(Error::Resume(format!(
                "{} needs stages 1 to {} complete, checkpoint records {}",
                first, needed, checkpoint.completed
            )));
        }
        let saved = self.ingest_dir().join(CONFIG);
        if saved.exists() {
            let config = IngestConfig::from_file(&saved)?;
            if config != self.config {
                warn!("Resuming with the configuration of the interrupted run");
            }
            self.config = config;
        }
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Checkpoint> {
        let path = self.ingest_dir().join(CHECKPOINT);
        let file = File::open(&path)
            .map_err(|_| Error::Resume(format!("no checkpoint at {}", path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Resume(format!("unreadable checkpoint: {}", e)))
    }

    fn save_checkpoint(&self, stage: Stage) -> Result<()> {
        let checkpoint = Checkpoint {
            completed: stage.number(),
        };
        write_json(&self.ingest_dir().join(CHECKPOINT), &checkpoint)
    }

    fn load_records(&self) -> Result<Vec<BucketRecord>> {
        let path = self.ingest_dir().join(REGISTRY);
        let file = File::open(&path)
            .map_err(|_| Error::Resume(format!("no bucket registry at {}", path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Resume(format!("unreadable bucket registry: {}", e)))
    }

    fn section_options(&self, codec: ValueCodec) -> SectionOptions {
        SectionOptions::from_config(&self.config, codec.tag())
    }

    /// Stage 1: parse every input in parallel and route its quads.
    fn route(&self, manifest: &Manifest, report: &mut IngestReport) -> Result<()> {
        let router = Arc::new(Router::new(&self.work_dir(), &self.config)?);
        // manifest graphs get the first ids, in manifest order
        for graph in manifest.graphs() {
            router.registry().graphs.id_of(&graph);
        }

        let entries: Arc<Vec<ManifestEntry>> = Arc::new(manifest.entries.clone());
        let next = Arc::new(AtomicUsize::new(0));
        let quads = Arc::new(AtomicU64::new(0));
        let skipped = Arc::new(Mutex::new(Vec::new()));
        let workers = self.config.parse_permits().min(entries.len()).max(1);
        let tasks = TaskSet::new("rdfpack-parse", workers)?;
        for _ in 0..workers {
            let router = Arc::clone(&router);
            let entries = Arc::clone(&entries);
            let next = Arc::clone(&next);
            let quads = Arc::clone(&quads);
            let skipped = Arc::clone(&skipped);
            let staging = self.work_dir().join(STAGING);
            let stage_limit = self.config.stage_limit;
            let codec = self.codec();
            tasks.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(entry) = entries.get(i) else {
                    return Ok(());
                };
                let stage = QuadStage::new(&staging.join(format!("f{}", i)), stage_limit, codec);
                match parse_one(&router, entry, i, stage) {
                    Ok(n) => {
                        quads.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(e) if !e.is_fatal() => {
                        warn!("Skipping input {}: {}", entry.path.display(), e);
                        skipped.lock().push(entry.path.clone());
                    }
                    Err(e) => return Err(e),
                }
            });
        }
        tasks.drain()?;
        drop(tasks);

        let router = Arc::try_unwrap(router)
            .map_err(|_| Error::invariant("router still shared after parsing"))?;
        let (registry, records) = router.close(self.config.compaction_permits())?;
        write_lines(&self.root.join(PREDICATES), &registry.predicates.names())?;
        write_lines(&self.root.join(GRAPHS), &registry.graphs.names())?;
        write_json(&self.ingest_dir().join(REGISTRY), &records)?;

        report.files_skipped = std::mem::take(&mut *skipped.lock());
        report.files_read = entries.len() - report.files_skipped.len();
        report.quads = quads.load(Ordering::Relaxed);
        info!(
            "routed {} quads from {} files into {} buckets ({} skipped)",
            report.quads,
            report.files_read,
            records.len(),
            report.files_skipped.len()
        );
        Ok(())
    }

    /// Stage 2: one dictionary per literal group, built in parallel.
    fn collate_literals(&self) -> Result<usize> {
        let records = self.load_records()?;
        let work = self.work_dir();
        let mut groups: BTreeMap<LiteralGroup, Vec<PathBuf>> = BTreeMap::new();
        for r in &records {
            if let ObjectKind::Literal(group) = &r.key.object {
                groups
                    .entry(group.clone())
                    .or_default()
                    .push(r.objects_list(&work));
            }
        }
        let collate = work.join(COLLATE);
        fs::create_dir_all(&collate)?;

        let count = groups.len();
        let tasks = TaskSet::new("rdfpack-collate", self.config.sort_permits())?;
        for (group, lists) in groups {
            let merged = collate.join(format!("{}.objects", group.file_name()));
            let target = self.root.join(group.file_name());
            let opts = self.section_options(group.codec());
            let fan_in = self.config.fan_in;
            let codec = self.codec();
            tasks.spawn(move || {
                merge_value_lists_bounded(&lists, &merged, fan_in, codec)?;
                let n = build_from_list(&merged, &target, group.codec(), opts, codec)?;
                fs::remove_file(&merged)?;
                info!("built {} ({} values)", target.display(), n);
                Ok(())
            });
        }
        tasks.drain()?;
        Ok(count)
    }

    /// Stage 3: every subject, node object, predicate and graph goes into the
    /// shared `iris` dictionary.
    fn collate_iris(&self) -> Result<()> {
        let records = self.load_records()?;
        let work = self.work_dir();
        let codec = self.codec();
        let collate = work.join(COLLATE);
        fs::create_dir_all(&collate)?;

        let names = collate.join("names");
        let mut values = Vec::new();
        for line in read_lines(&self.root.join(PREDICATES))?
            .into_iter()
            .chain(read_lines(&self.root.join(GRAPHS))?)
        {
            if let Some(bytes) = Term::iri(line).node_bytes() {
                values.push(bytes);
            }
        }
        values.sort();
        values.dedup();
        let mut out = codec.list_writer(&names)?;
        for v in &values {
            out.write(v)?;
        }
        out.finish()?;

        let mut lists = vec![names.clone()];
        for r in &records {
            lists.push(r.subjects_list(&work));
            if r.key.object.uses_iri_dictionary() {
                lists.push(r.objects_list(&work));
            }
        }
        let merged = collate.join("iris.objects");
        merge_value_lists_bounded(&lists, &merged, self.config.fan_in, codec)?;
        let target = self.root.join(IRIS);
        let n = build_from_list(
            &merged,
            &target,
            ValueCodec::Utf8,
            self.section_options(ValueCodec::Utf8),
            codec,
        )?;
        remove_all(&[names, merged]);
        info!("built {} ({} values)", target.display(), n);
        Ok(())
    }

    /// Stage 4: compact every bucket into the corpus directory.
    fn compact(&self) -> Result<usize> {
        let records = self.load_records()?;
        let graph_names = Arc::new(read_lines(&self.root.join(GRAPHS))?);
        let cache = SectionCache::new(self.config.cache_budget);
        let iris = Arc::new(Dictionary::open(&self.root.join(IRIS), cache.clone())?);
        let mut literals: BTreeMap<LiteralGroup, Arc<Dictionary>> = BTreeMap::new();
        for r in &records {
            if let ObjectKind::Literal(group) = &r.key.object {
                if !literals.contains_key(group) {
                    let dict = Dictionary::open(&self.root.join(group.file_name()), cache.clone())?;
                    literals.insert(group.clone(), Arc::new(dict));
                }
            }
        }

        let opts = CompactOptions {
            bitmap_ceiling: self.config.bitmap_ceiling,
            codec: self.codec(),
        };
        let tasks = TaskSet::new("rdfpack-compact", self.config.compaction_permits())?;
        let count = records.len();
        for record in records {
            let objects = match &record.key.object {
                ObjectKind::Literal(group) => literals.get(group).cloned().ok_or_else(|| {
                    Error::invariant(format!("no dictionary for {}", group.file_name()))
                })?,
                _ => Arc::clone(&iris),
            };
            let iris = Arc::clone(&iris);
            let graph_names = Arc::clone(&graph_names);
            let work = self.work_dir();
            let out_dir = self.root.join(record.key.relative_dir());
            tasks.spawn(move || {
                let run = record.final_run(&work);
                let scratch = record.dir(&work);
                let name = record.key.object_file_name();
                let input = CompactionInput {
                    run: &run,
                    scratch: &scratch,
                    out_dir: &out_dir,
                    name: &name,
                    graph_names: &graph_names,
                };
                let out = compact_bucket(&input, &iris, &objects, &opts)?;
                debug!(
                    "bucket {:?}: {:?}, {} objects",
                    record.key, out.encoding, out.distinct_objects
                );
                Ok(())
            });
        }
        tasks.drain()?;
        Ok(count)
    }

    /// Stage 5: drop the work directory and checkpoint.
    fn cleanup(&self) -> Result<()> {
        let ingest = self.ingest_dir();
        if ingest.exists() {
            fs::remove_dir_all(&ingest)?;
        }
        Ok(())
    }
}

/// Parse one input completely, then route its quads. Nothing is routed for
/// an input that fails to parse. Blank nodes are scoped by input index.
fn parse_one(
    router: &Router,
    entry: &ManifestEntry,
    index: usize,
    mut stage: QuadStage,
) -> Result<u64> {
    let mut source = OxigraphSource::open(&entry.path, &entry.graph, &format!("f{}", index))?;
    debug!("parsing {} as {:?}", entry.path.display(), source.format());
    source.read_quads(&mut |quad| stage.push(quad))?;
    let graphs = &router.registry().graphs;
    stage.replay(&mut |quad| {
        let graph = graphs.id_of(&quad.graph);
        router.route(&quad, graph)
    })
}

/// True for names this crate writes into a corpus directory.
fn is_corpus_file(name: &str) -> bool {
    let name = name.strip_suffix(".tmp").unwrap_or(name);
    name == IRIS
        || name == PREDICATES
        || name == GRAPHS
        || LiteralGroup::from_file_name(name).is_some()
        || name
            .strip_prefix("pred_")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Remove an earlier corpus from `root`, leaving unrelated files alone.
fn remove_corpus_files(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !is_corpus_file(&name) {
            continue;
        }
        let path = entry.path();
        info!("Removing previous corpus file {}", path.display());
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn build_from_list(
    list: &Path,
    target: &Path,
    codec: ValueCodec,
    opts: SectionOptions,
    temp: TempCodec,
) -> Result<u64> {
    let mut builder = DictionaryBuilder::create(target, codec, opts)?;
    for value in temp.list_reader(list)? {
        builder.push(&value?)?;
    }
    builder.finish()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::Config(e.to_string()))?;
    let mut file = File::create(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    fs::write(path, text)?;
    Ok(())
}

/// Non-empty lines of a newline-separated name file.
pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> IngestConfig {
        IngestConfig::builder()
            .section_capacity(8)
            .roll_threshold(512)
            .writer_slots(2)
            .fan_in(2)
            .parse_concurrency(2)
            .build()
            .unwrap()
    }

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn manifest(entries: &[(&Path, &str)]) -> Manifest {
        Manifest {
            entries: entries
                .iter()
                .map(|(p, g)| ManifestEntry {
                    path: p.to_path_buf(),
                    graph: g.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn stage_numbers_round_trip() {
        for s in Stage::ALL {
            assert_eq!(Stage::from_number(s.number()), Some(s));
        }
        assert_eq!(Stage::from_number(0), None);
        assert_eq!(Stage::from_number(6), None);
    }

    #[test]
    fn full_run_leaves_only_corpus_files() {
        let inputs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = write(
            inputs.path(),
            "a.nt",
            "<http://ex/a> <http://ex/p> <http://ex/b> .\n<http://ex/a> <http://ex/n> \"3\"^^<http://www.w3.org/2001/XMLSchema#int> .\n",
        );
        let broken = write(inputs.path(), "broken.nt", "<http://ex/a> .\n");
        let m = manifest(&[(&a, "http://ex/g1"), (&broken, "http://ex/g2")]);

        let report = Ingestor::new(out.path(), small_config()).run(&m, 1).unwrap();
        assert_eq!(report.quads, 2);
        assert_eq!(report.files_skipped, vec![broken]);
        assert_eq!(report.buckets, 2);
        assert_eq!(report.dictionaries, 2);

        let root = out.path();
        assert!(!root.join(INGEST_DIR).exists());
        assert!(root.join(IRIS).exists());
        assert!(root.join("datatype_int").exists());
        assert_eq!(
            read_lines(&root.join(PREDICATES)).unwrap(),
            vec!["http://ex/p", "http://ex/n"]
        );
        assert_eq!(
            read_lines(&root.join(GRAPHS)).unwrap(),
            vec!["http://ex/g1", "http://ex/g2"]
        );
        assert!(root.join("pred_0/iri/iri.bm").exists());
        assert!(root.join("pred_1/iri/datatype_int.bm").exists());
    }

    #[test]
    fn resume_requires_completed_predecessors() {
        let out = tempfile::tempdir().unwrap();
        let m = Manifest::default();
        let err = Ingestor::new(out.path(), small_config()).run(&m, 3).unwrap_err();
        assert!(matches!(err, Error::Resume(_)));
        assert_eq!(err.exit_code(), 5);
        let err = Ingestor::new(out.path(), small_config()).run(&m, 9).unwrap_err();
        assert!(matches!(err, Error::Resume(_)));
    }

    #[test]
    fn resume_after_routing_matches_a_full_run() {
        let inputs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = write(
            inputs.path(),
            "a.ttl",
            "@prefix ex: <http://ex/> .\nex:a ex:p ex:b, ex:c .\nex:b ex:p ex:c .\n",
        );
        let m = manifest(&[(&a, "http://ex/g")]);
        let mut ingestor = Ingestor::new(out.path(), small_config());

        // run stage 1 only by stopping after its checkpoint
        ingestor.start_fresh().unwrap();
        let mut report = IngestReport::default();
        ingestor.route(&m, &mut report).unwrap();
        ingestor.save_checkpoint(Stage::Route).unwrap();
        assert_eq!(report.quads, 3);

        let report = ingestor.run(&m, 2).unwrap();
        assert_eq!(report.quads, 0);
        assert_eq!(report.buckets, 1);
        assert!(out.path().join("pred_0/iri/iri.bm").exists());
        assert!(!out.path().join(INGEST_DIR).exists());
    }

    #[test]
    fn fatal_input_errors_abort() {
        let inputs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = write(inputs.path(), "a.csv", "x,y\n");
        let err = Ingestor::new(out.path(), small_config())
            .run(&manifest(&[(&a, "http://ex/g")]), 1)
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    fn pairs(root: &Path, predicate: &str) -> Vec<(Term, Term)> {
        use crate::corpus::{Corpus, QuadIndex};
        Corpus::open(root)
            .unwrap()
            .lookup_adjacency(&Term::iri(predicate), None, None, None)
            .unwrap()
            .collect_pairs()
            .unwrap()
    }

    #[test]
    fn rebuild_replaces_the_previous_corpus() {
        let inputs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first = write(
            inputs.path(),
            "first.nt",
            "<http://ex/a> <http://ex/p> \"3\"^^<http://www.w3.org/2001/XMLSchema#int> .\n<http://ex/a> <http://ex/q> <http://ex/b> .\n",
        );
        Ingestor::new(out.path(), small_config())
            .run(&manifest(&[(&first, "http://ex/g")]), 1)
            .unwrap();
        assert!(out.path().join("datatype_int").exists());
        assert!(out.path().join("pred_1").exists());
        let notes = write(out.path(), "notes.txt", "kept\n");

        let second = write(
            inputs.path(),
            "second.nt",
            "<http://ex/x> <http://ex/p> <http://ex/y> .\n",
        );
        Ingestor::new(out.path(), small_config())
            .run(&manifest(&[(&second, "http://ex/g")]), 1)
            .unwrap();

        let root = out.path();
        assert!(!root.join("datatype_int").exists());
        assert!(!root.join("pred_1").exists());
        assert!(!root.join("pred_0/iri/datatype_int.bm").exists());
        assert!(notes.exists());
        assert_eq!(read_lines(&root.join(PREDICATES)).unwrap(), vec!["http://ex/p"]);
        assert_eq!(
            pairs(root, "http://ex/p"),
            vec![(Term::iri("http://ex/x"), Term::iri("http://ex/y"))]
        );
    }

    #[test]
    fn input_failing_midway_contributes_nothing() {
        let inputs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let good = write(
            inputs.path(),
            "good.nt",
            "<http://ex/a> <http://ex/q> <http://ex/b> .\n",
        );
        let bad = write(
            inputs.path(),
            "bad.nt",
            "<http://ex/a> <http://ex/p> <http://ex/b> .\n<http://ex/c> <http://ex/p> .\n",
        );
        let cfg = IngestConfig::builder()
            .stage_limit(0)
            .parse_concurrency(2)
            .build()
            .unwrap();
        let report = Ingestor::new(out.path(), cfg)
            .run(&manifest(&[(&good, "http://ex/g1"), (&bad, "http://ex/g2")]), 1)
            .unwrap();
        assert_eq!(report.files_skipped, vec![bad]);
        assert_eq!(report.files_read, 1);
        assert_eq!(report.quads, 1);
        assert_eq!(report.buckets, 1);

        let root = out.path();
        assert_eq!(read_lines(&root.join(PREDICATES)).unwrap(), vec!["http://ex/q"]);
        assert!(pairs(root, "http://ex/p").is_empty());
        assert_eq!(
            pairs(root, "http://ex/q"),
            vec![(Term::iri("http://ex/a"), Term::iri("http://ex/b"))]
        );
    }
}
