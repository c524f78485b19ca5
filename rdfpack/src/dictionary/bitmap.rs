//! Dictionary of fixed-width values stored as one bitmap of their sortable u64
//! forms. Rank is bitmap rank, value is bitmap select.
//!
//! ```text
//! [magic "RPBM"][version u8][reserved u8][codec tag u16][count u64][treemap][crc32 u32]
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use roaring::RoaringTreemap;

use crate::codec::ValueCodec;
use crate::error::{Error, Result};
use crate::section::tmp_path;

pub const MAGIC: &[u8; 4] = b"RPBM";
const VERSION: u8 = 1;
const PREFIX_LEN: usize = 16;

#[derive(Debug)]
pub struct BitmapDictionary {
    codec: ValueCodec,
    values: RoaringTreemap,
}

impl BitmapDictionary {
    /// Memory-map the file and load its bitmap.
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let data = unsafe { memmap2::MmapOptions::new().map(&f) }?;
        Self::parse(&data).map_err(|e| match e {
            Error::Corrupt(m) => Error::Corrupt(format!("{}: {}", path.display(), m)),
            other => other,
        })
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PREFIX_LEN + 4 || &data[0..4] != MAGIC {
            return Err(Error::corrupt("bad bitmap dictionary header"));
        }
        if data[4] != VERSION {
            return Err(Error::corrupt("unsupported bitmap dictionary version"));
        }
        let body_end = data.len() - 4;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        if crc32fast::hash(&data[..body_end]) != stored {
            return Err(Error::corrupt("bitmap dictionary CRC mismatch"));
        }
        let tag = u16::from_le_bytes([data[6], data[7]]);
        let codec = ValueCodec::from_tag(tag)
            .filter(|c| c.is_fixed_width())
            .ok_or_else(|| Error::corrupt(format!("bad codec tag {}", tag)))?;
        let count = u64::from_le_bytes(
            data[8..16]
                .try_into()
                .map_err(|_| Error::corrupt("bitmap dictionary count"))?,
        );
        let values = RoaringTreemap::deserialize_from(&data[PREFIX_LEN..body_end])
            .map_err(|e| Error::corrupt(format!("bitmap dictionary body: {}", e)))?;
        if values.len() != count {
            return Err(Error::corrupt("bitmap dictionary count mismatch"));
        }
        Ok(BitmapDictionary { codec, values })
    }

    pub fn codec(&self) -> ValueCodec {
        self.codec
    }

    pub fn len(&self) -> u64 {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn position_of(&self, bytes: &[u8]) -> Option<u64> {
        let v = self.codec.to_sortable_u64(bytes)?;
        self.values
            .contains(v)
            .then(|| self.values.rank(v) - 1)
    }

    pub fn value_of(&self, rank: u64) -> Result<Vec<u8>> {
        self.values
            .select(rank)
            .map(|v| self.codec.from_sortable_u64(v))
            .ok_or_else(|| {
                Error::corrupt(format!("rank {} out of range ({} values)", rank, self.len()))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.values.iter().map(|v| v.to_be_bytes().to_vec())
    }
}

/// Collects ascending sortable values and writes the dictionary file.
pub struct BitmapBuilder {
    path: PathBuf,
    codec: ValueCodec,
    values: RoaringTreemap,
    last: Option<u64>,
}

impl BitmapBuilder {
    pub fn new(path: PathBuf, codec: ValueCodec) -> Self {
        BitmapBuilder {
            path,
            codec,
            values: RoaringTreemap::new(),
            last: None,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        let v = self.codec.to_sortable_u64(bytes).ok_or_else(|| {
            Error::invariant(format!(
                "{}-byte value in fixed-width dictionary {}",
                bytes.len(),
                self.path.display()
            ))
        })?;
        if self.last.is_some_and(|last| last >= v) {
            return Err(Error::invariant(format!(
                "dictionary input not strictly ascending in {}",
                self.path.display()
            )));
        }
        self.last = Some(v);
        self.values.insert(v);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn finish(self) -> Result<u64> {
        let mut body = Vec::with_capacity(PREFIX_LEN + self.values.serialized_size() + 4);
        body.extend_from_slice(MAGIC);
        body.push(VERSION);
        body.push(0);
        body.extend_from_slice(&self.codec.tag().to_le_bytes());
        body.extend_from_slice(&self.values.len().to_le_bytes());
        self.values.serialize_into(&mut body)?;
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());

        let tmp = tmp_path(&self.path);
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(&body)?;
        out.flush()?;
        drop(out);
        fs::rename(&tmp, &self.path)?;
        Ok(self.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(path: &Path, values: &[&str]) {
        let mut b = BitmapBuilder::new(path.to_path_buf(), ValueCodec::Int64);
        for v in values {
            b.push(&ValueCodec::Int64.encode(v).unwrap()).unwrap();
        }
        assert_eq!(b.finish().unwrap(), values.len() as u64);
    }

    #[test]
    fn mapped_file_loads_and_damage_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datatype_long");
        build(&path, &["-9", "0", "12", "4000000000"]);

        let dict = BitmapDictionary::open(&path).unwrap();
        assert_eq!(dict.len(), 4);
        let twelve = ValueCodec::Int64.encode("12").unwrap();
        assert_eq!(dict.position_of(&twelve), Some(2));
        assert_eq!(dict.value_of(2).unwrap(), twelve);
        drop(dict);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[PREFIX_LEN] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        match BitmapDictionary::open(&path) {
            Err(Error::Corrupt(m)) => {
                assert!(m.contains("datatype_long"), "{}", m);
                assert!(m.contains("CRC mismatch"), "{}", m);
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }
}
