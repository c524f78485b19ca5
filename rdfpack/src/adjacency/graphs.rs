//! Graph membership files: one roaring bitmap of entry positions per
//! (bucket, graph) pair, named `graph-<bucket>-<graph rank>`.
//!
//! ```text
//! [magic "RPGM"][version u8][reserved 3B][count u64][treemap][crc32 u32]
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use roaring::RoaringTreemap;

use crate::error::{Error, Result};
use crate::section::tmp_path;

const MAGIC: &[u8; 4] = b"RPGM";
const VERSION: u8 = 1;
const PREFIX_LEN: usize = 16;
const PREFIX: &str = "graph-";

pub fn graph_file_name(bucket: &str, graph_rank: u64) -> String {
    format!("{}{}-{}", PREFIX, bucket, graph_rank)
}

/// Split a graph file name into bucket name and graph rank. Bucket names may
/// themselves contain `-`, the rank is always the last field.
pub fn parse_graph_file_name(name: &str) -> Option<(&str, u64)> {
    let rest = name.strip_prefix(PREFIX)?;
    let (bucket, rank) = rest.rsplit_once('-')?;
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, rank.parse().ok()?))
}

pub fn write_graph_file(path: &Path, positions: &RoaringTreemap) -> Result<()> {
    let mut data = Vec::with_capacity(PREFIX_LEN + positions.serialized_size() + 4);
    data.extend_from_slice(MAGIC);
    data.push(VERSION);
    data.extend_from_slice(&[0u8; 3]);
    data.extend_from_slice(&positions.len().to_le_bytes());
    positions.serialize_into(&mut data)?;
    let crc = crc32fast::hash(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    let tmp = tmp_path(path);
    let mut out = BufWriter::new(File::create(&tmp)?);
    out.write_all(&data)?;
    out.flush()?;
    drop(out);
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_graph_file(path: &Path) -> Result<RoaringTreemap> {
    let data = fs::read(path)?;
    let bad = |m: &str| Error::corrupt(format!("{}: {}", path.display(), m));
    if data.len() < PREFIX_LEN + 4 || &data[0..4] != MAGIC {
        return Err(bad("bad graph file header"));
    }
    if data[4] != VERSION {
        return Err(bad("unsupported graph file version"));
    }
    let body_end = data.len() - 4;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    if crc32fast::hash(&data[..body_end]) != stored {
        return Err(bad("graph file CRC mismatch"));
    }
    let count = u64::from_le_bytes(data[8..16].try_into().map_err(|_| bad("count"))?);
    let positions = RoaringTreemap::deserialize_from(&data[PREFIX_LEN..body_end])
        .map_err(|e| bad(&e.to_string()))?;
    if positions.len() != count {
        return Err(bad("graph file count mismatch"));
    }
    Ok(positions)
}

/// Every graph bitmap of one bucket, keyed by graph rank.
#[derive(Debug, Default)]
pub struct GraphMap {
    graphs: BTreeMap<u64, RoaringTreemap>,
}

impl GraphMap {
    /// Load the graph files of bucket `bucket` from `dir`.
    pub fn load(dir: &Path, bucket: &str) -> Result<Self> {
        let mut graphs = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match parse_graph_file_name(name) {
                Some((b, rank)) if b == bucket => {
                    graphs.insert(rank, read_graph_file(&entry.path())?);
                }
                _ => {}
            }
        }
        Ok(GraphMap { graphs })
    }

    pub fn insert(&mut self, graph_rank: u64, positions: RoaringTreemap) {
        self.graphs.insert(graph_rank, positions);
    }

    pub fn positions(&self, graph_rank: u64) -> Option<&RoaringTreemap> {
        self.graphs.get(&graph_rank)
    }

    /// Graph ranks, ascending.
    pub fn ranks(&self) -> impl Iterator<Item = u64> + '_ {
        self.graphs.keys().copied()
    }

    /// Number of entries in graph `graph_rank`.
    pub fn cardinality(&self, graph_rank: u64) -> u64 {
        self.graphs.get(&graph_rank).map_or(0, |b| b.len())
    }

    /// True if the entry at `position` belongs to any of `graph_ranks`.
    pub fn in_any(&self, position: u64, graph_ranks: &[u64]) -> bool {
        graph_ranks
            .iter()
            .any(|g| self.graphs.get(g).is_some_and(|b| b.contains(position)))
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
