//! Adjacency indexes: per-bucket subject-rank to object-rank pairs in one of
//! two encodings, plus per-graph membership bitmaps over entry positions.

mod bitmap;
mod compact;
mod graphs;
mod longbuf;

pub use bitmap::{BitmapIndex, BitmapIndexWriter};
pub use compact::{compact_bucket, CompactOptions, CompactionInput, CompactionOutput};
pub use graphs::{graph_file_name, parse_graph_file_name, read_graph_file, write_graph_file, GraphMap};
pub use longbuf::{LongBufferIndex, LongBufferWriter, PAIRS_PER_SECTION};

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::section::SectionCache;

/// One adjacency entry: its position in the encoding's canonical order and
/// its (subject rank, object rank) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjacent {
    pub position: u64,
    pub subject: u64,
    pub object: u64,
}

/// Entries in (subject, object) order.
pub type Scan<'a> = Box<dyn Iterator<Item = Result<Adjacent>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Bitmap,
    LongBuffer,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Bitmap => "bm",
            Encoding::LongBuffer => "lb",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "bm" => Some(Encoding::Bitmap),
            "lb" => Some(Encoding::LongBuffer),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum AdjacencyIndex {
    LongBuffer(LongBufferIndex),
    Bitmap(BitmapIndex),
}

impl AdjacencyIndex {
    /// Open an adjacency file, choosing the reader from its extension.
    /// Long-buffer sections are decoded through `cache`.
    pub fn open(path: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        let encoding = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Encoding::from_extension)
            .ok_or_else(|| {
                Error::corrupt(format!("{}: not an adjacency file", path.display()))
            })?;
        Ok(match encoding {
            Encoding::Bitmap => AdjacencyIndex::Bitmap(BitmapIndex::open(path)?),
            Encoding::LongBuffer => AdjacencyIndex::LongBuffer(LongBufferIndex::open(path, cache)?),
        })
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            AdjacencyIndex::LongBuffer(_) => Encoding::LongBuffer,
            AdjacencyIndex::Bitmap(_) => Encoding::Bitmap,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            AdjacencyIndex::LongBuffer(i) => i.len(),
            AdjacencyIndex::Bitmap(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries matching the bound ranks, ordered by (subject, object).
    pub fn scan(&self, subject: Option<u64>, object: Option<u64>) -> Result<Scan<'_>> {
        match self {
            AdjacencyIndex::LongBuffer(i) => Ok(i.scan(subject, object)),
            AdjacencyIndex::Bitmap(i) => i.scan(subject, object),
        }
    }

    /// Position of the pair, if present.
    pub fn contains(&self, subject: u64, object: u64) -> Result<Option<u64>> {
        match self {
            AdjacencyIndex::LongBuffer(i) => i.contains(subject, object),
            AdjacencyIndex::Bitmap(i) => i.contains(subject, object),
        }
    }

    pub fn subjects_of(&self, object: u64) -> Result<Vec<u64>> {
        self.scan(None, Some(object))?
            .map(|a| a.map(|a| a.subject))
            .collect()
    }

    pub fn objects_of(&self, subject: u64) -> Result<Vec<u64>> {
        self.scan(Some(subject), None)?
            .map(|a| a.map(|a| a.object))
            .collect()
    }
}
