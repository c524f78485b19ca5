//! External merge engine: local sorts of run files, k-way merges with
//! optional deduplication, and the per-bucket merge ladder.

mod kway;
mod ladder;

pub use kway::{KWayMerge, MergeSource, Peeked};
pub use ladder::{MergeLadder, PendingMerge};

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;
use crate::run::{RunEntry, TempCodec};

/// Counts reported by a local sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub input_entries: u64,
    pub output_entries: u64,
    pub distinct_objects: u64,
}

/// Merge sorted run files into `output`, ordered by (subject, object).
///
/// A distinct merge emits one entry per key whose graph set is the union of
/// every input's graphs for that key. A non-distinct merge keeps every entry.
pub fn merge_runs(inputs: &[PathBuf], output: &Path, distinct: bool, codec: TempCodec) -> Result<u64> {
    let mut streams = Vec::with_capacity(inputs.len());
    for p in inputs {
        streams.push(Peeked::new(codec.run_reader(p)?)?);
    }
    let mut merge = KWayMerge::new(streams, |a: &RunEntry, b: &RunEntry| a.key_cmp(b));
    let mut out = codec.run_writer(output)?;
    loop {
        let next = if distinct {
            merge.next_deduped(|best, dup| best.absorb_graphs(&dup.graphs))?
        } else {
            merge.next_record()?
        };
        match next {
            Some(e) => out.write(&e)?,
            None => break,
        }
    }
    let n = out.entries();
    out.finish()?;
    debug!(
        "merged {} run files into {} ({} entries)",
        inputs.len(),
        output.display(),
        n
    );
    Ok(n)
}

/// Distinct merge of sorted value lists, keeping the first occurrence.
pub fn merge_values(inputs: &[PathBuf], output: &Path, codec: TempCodec) -> Result<u64> {
    let mut streams = Vec::with_capacity(inputs.len());
    for p in inputs {
        streams.push(Peeked::new(codec.list_reader(p)?)?);
    }
    let mut merge = KWayMerge::new(streams, |a: &Vec<u8>, b: &Vec<u8>| a.cmp(b));
    let mut out = codec.list_writer(output)?;
    while let Some(v) = merge.next_deduped(|_, _| {})? {
        out.write(&v)?;
    }
    let n = out.count();
    out.finish()?;
    Ok(n)
}

/// [`merge_values`] with at most `fan_in` files open at once. Intermediate
/// merges are written next to `output` and removed afterwards.
pub fn merge_value_lists_bounded(
    inputs: &[PathBuf],
    output: &Path,
    fan_in: usize,
    codec: TempCodec,
) -> Result<u64> {
    let fan_in = fan_in.max(2);
    let mut current: Vec<PathBuf> = inputs.to_vec();
    let mut owned = false;
    let mut round = 0usize;
    while current.len() > fan_in {
        let mut next = Vec::with_capacity(current.len() / fan_in + 1);
        for (i, batch) in current.chunks(fan_in).enumerate() {
            let tmp = sibling(output, &format!("merge{}-{}", round, i));
            merge_values(batch, &tmp, codec)?;
            next.push(tmp);
        }
        if owned {
            remove_all(&current);
        }
        current = next;
        owned = true;
        round += 1;
    }
    let n = merge_values(&current, output, codec)?;
    if owned {
        remove_all(&current);
    }
    Ok(n)
}

/// Sort one unsorted run file in memory.
///
/// Writes the entries ordered by (subject, object) with duplicate keys
/// coalesced (graph sets unioned) to `sorted`, and the distinct objects in
/// byte order to `objects`.
pub fn sort_run(input: &Path, sorted: &Path, objects: &Path, codec: TempCodec) -> Result<SortStats> {
    let mut entries: Vec<RunEntry> = Vec::new();
    for e in codec.run_reader(input)? {
        entries.push(e?);
    }
    let input_entries = entries.len() as u64;
    entries.sort_by(|a, b| a.key_cmp(b));

    let mut out = codec.run_writer(sorted)?;
    let mut iter = entries.into_iter();
    let mut object_values: Vec<Vec<u8>> = Vec::new();
    if let Some(mut cur) = iter.next() {
        for e in iter {
            if cur.same_key(&e) {
                cur.absorb_graphs(&e.graphs);
            } else {
                out.write(&cur)?;
                object_values.push(std::mem::replace(&mut cur, e).object);
            }
        }
        out.write(&cur)?;
        object_values.push(cur.object);
    }
    let output_entries = out.entries();
    out.finish()?;

    object_values.sort_unstable();
    object_values.dedup();
    let mut list = codec.list_writer(objects)?;
    for o in &object_values {
        list.write(o)?;
    }
    list.finish()?;
    Ok(SortStats {
        input_entries,
        output_entries,
        distinct_objects: object_values.len() as u64,
    })
}

pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

pub(crate) fn remove_all(paths: &[PathBuf]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            debug!("could not remove {}: {}", p.display(), e);
        }
    }
}
