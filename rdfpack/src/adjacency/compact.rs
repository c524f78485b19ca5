//! Compaction of one finalized bucket into its adjacency file and graph files.
//!
//! The final run is streamed once to translate subjects and objects into
//! dictionary ranks; the rank pairs go to a scratch run file while distinct
//! objects are counted. Up to the ceiling the bucket gets the bitmap
//! encoding, built one object-rank partition at a time; beyond it the
//! long-buffer encoding.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use roaring::RoaringTreemap;

use super::{write_graph_file, BitmapIndexWriter, Encoding, LongBufferWriter};
use crate::codec::Term;
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::run::{RunEntry, TempCodec};

/// Objects whose bitmaps are resident at once while building `.bm` files.
const PARTITION_OBJECTS: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct CompactOptions {
    /// Largest distinct-object count that still gets the bitmap encoding.
    pub bitmap_ceiling: u64,
    pub codec: TempCodec,
}

/// Where one bucket's data comes from and goes to.
#[derive(Debug, Clone, Copy)]
pub struct CompactionInput<'a> {
    /// Fully merged run of the bucket.
    pub run: &'a Path,
    /// Directory for temporary files.
    pub scratch: &'a Path,
    /// Directory receiving the adjacency and graph files.
    pub out_dir: &'a Path,
    /// Bucket file name (`iri`, `datatype_int`, ...).
    pub name: &'a str,
    /// Graph IRIs indexed by temporary graph id.
    pub graph_names: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutput {
    pub encoding: Encoding,
    pub path: PathBuf,
    pub entries: u64,
    /// Exact when the bitmap encoding was chosen, otherwise a lower bound
    /// just above the ceiling.
    pub distinct_objects: u64,
    pub graphs: usize,
}

fn rank_bytes(rank: u64) -> Vec<u8> {
    rank.to_be_bytes().to_vec()
}

fn ranks_of(e: &RunEntry) -> Result<(u64, u64)> {
    let s: [u8; 8] = e
        .subject
        .as_slice()
        .try_into()
        .map_err(|_| Error::invariant("rank entry has a malformed subject"))?;
    let o: [u8; 8] = e
        .object
        .as_slice()
        .try_into()
        .map_err(|_| Error::invariant("rank entry has a malformed object"))?;
    Ok((u64::from_be_bytes(s), u64::from_be_bytes(o)))
}

/// Translate the bucket run into a run of rank pairs. Returns per-object
/// entry counts, or `None` once more than `ceiling` distinct objects showed up.
fn translate(
    input: &CompactionInput<'_>,
    iris: &Dictionary,
    objects: &Dictionary,
    ranks: &Path,
    opts: &CompactOptions,
) -> Result<(u64, Option<BTreeMap<u64, u64>>)> {
    let mut subject_cursor = iris.cursor();
    let mut object_cursor = objects.cursor();
    let mut out = opts.codec.run_writer(ranks)?;
    let mut counts: Option<BTreeMap<u64, u64>> = Some(BTreeMap::new());
    for entry in opts.codec.run_reader(input.run)? {
        let entry = entry?;
        let s = subject_cursor.position_of(&entry.subject)?.ok_or_else(|| {
            Error::invariant(format!(
                "subject {:?} of bucket {} missing from dictionary",
                String::from_utf8_lossy(&entry.subject),
                input.name
            ))
        })?;
        let o = object_cursor.position_of(&entry.object)?.ok_or_else(|| {
            Error::invariant(format!(
                "object of bucket {} missing from dictionary",
                input.name
            ))
        })?;
        let overflow = match counts.as_mut() {
            Some(c) => {
                *c.entry(o).or_insert(0) += 1;
                c.len() as u64 > opts.bitmap_ceiling
            }
            None => false,
        };
        if overflow {
            counts = None;
        }
        out.write(&RunEntry {
            subject: rank_bytes(s),
            object: rank_bytes(o),
            graphs: entry.graphs,
        })?;
    }
    let n = out.entries();
    out.finish()?;
    Ok((n, counts))
}

fn build_long_buffer(
    ranks: &Path,
    path: &Path,
    codec: TempCodec,
    graphs: &mut HashMap<u32, RoaringTreemap>,
) -> Result<u64> {
    let mut writer = LongBufferWriter::create(path)?;
    for entry in codec.run_reader(ranks)? {
        let entry = entry?;
        let (s, o) = ranks_of(&entry)?;
        let position = writer.len();
        writer.push(s, o)?;
        for g in &entry.graphs {
            graphs.entry(*g).or_default().insert(position);
        }
    }
    writer.finish()
}

fn build_bitmap(
    ranks: &Path,
    path: &Path,
    codec: TempCodec,
    counts: &BTreeMap<u64, u64>,
    graphs: &mut HashMap<u32, RoaringTreemap>,
) -> Result<u64> {
    let objects: Vec<u64> = counts.keys().copied().collect();
    let mut before = Vec::with_capacity(objects.len());
    let mut total = 0u64;
    for o in &objects {
        before.push(total);
        total += counts[o];
    }

    let mut writer = BitmapIndexWriter::create(path)?;
    for start in (0..objects.len()).step_by(PARTITION_OBJECTS) {
        let end = (start + PARTITION_OBJECTS).min(objects.len());
        let part = &objects[start..end];
        let (lo, hi) = (part[0], part[part.len() - 1]);
        let mut bitmaps = vec![RoaringTreemap::new(); part.len()];
        let mut filled = vec![0u64; part.len()];
        for entry in codec.run_reader(ranks)? {
            let entry = entry?;
            let (s, o) = ranks_of(&entry)?;
            if o < lo || o > hi {
                continue;
            }
            let i = part
                .binary_search(&o)
                .map_err(|_| Error::invariant(format!("object rank {} was not counted", o)))?;
            bitmaps[i].insert(s);
            // subjects arrive ascending, so this is the entry's rank within its object
            let position = before[start + i] + filled[i];
            filled[i] += 1;
            for g in &entry.graphs {
                graphs.entry(*g).or_default().insert(position);
            }
        }
        for (i, bm) in bitmaps.iter().enumerate() {
            writer.add(part[i], bm)?;
        }
        debug!("bitmap partition {}..{} written", start, end);
    }
    let n = writer.finish()?;
    if n != total {
        return Err(Error::invariant(format!(
            "bitmap index holds {} entries, expected {}",
            n, total
        )));
    }
    Ok(n)
}

/// Compact one bucket. `iris` resolves subjects and graph names, `objects`
/// resolves the bucket's objects (the same dictionary for IRI and blank-node
/// buckets).
pub fn compact_bucket(
    input: &CompactionInput<'_>,
    iris: &Dictionary,
    objects: &Dictionary,
    opts: &CompactOptions,
) -> Result<CompactionOutput> {
    fs::create_dir_all(input.out_dir)?;
    fs::create_dir_all(input.scratch)?;
    let ranks = input.scratch.join(format!("{}.ranks", input.name));
    let (entries, counts) = translate(input, iris, objects, &ranks, opts)?;

    let mut graphs: HashMap<u32, RoaringTreemap> = HashMap::new();
    let (encoding, distinct_objects, path) = match &counts {
        Some(counts) => {
            let path = input
                .out_dir
                .join(format!("{}.{}", input.name, Encoding::Bitmap.extension()));
            build_bitmap(&ranks, &path, opts.codec, counts, &mut graphs)?;
            (Encoding::Bitmap, counts.len() as u64, path)
        }
        None => {
            let path = input
                .out_dir
                .join(format!("{}.{}", input.name, Encoding::LongBuffer.extension()));
            build_long_buffer(&ranks, &path, opts.codec, &mut graphs)?;
            (Encoding::LongBuffer, opts.bitmap_ceiling + 1, path)
        }
    };
    fs::remove_file(&ranks)?;

    for (id, positions) in &graphs {
        let name = input.graph_names.get(*id as usize).ok_or_else(|| {
            Error::invariant(format!("graph id {} has no registered name", id))
        })?;
        let key = Term::iri(name.as_str())
            .node_bytes()
            .ok_or(Error::Invalid("graph name is not a node"))?;
        let rank = iris.position_of(&key)?.ok_or_else(|| {
            Error::invariant(format!("graph {} missing from dictionary", name))
        })?;
        write_graph_file(
            &input.out_dir.join(super::graph_file_name(input.name, rank)),
            positions,
        )?;
    }

    info!(
        "compacted {} into {} ({} entries, {:?})",
        input.run.display(),
        path.display(),
        entries,
        encoding
    );
    Ok(CompactionOutput {
        encoding,
        path,
        entries,
        distinct_objects,
        graphs: graphs.len(),
    })
}
