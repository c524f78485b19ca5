//! Value dictionaries: sorted, deduplicated values addressed by dense rank.
//!
//! Values whose codec is fixed-width live in a [`BitmapDictionary`]; everything
//! else lives in a [`SortedDictionary`] over the section store. Both are
//! reached through the closed [`Dictionary`] enum, chosen from the file magic.

mod bitmap;
mod sorted;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::codec::ValueCodec;
use crate::error::{Error, Result};
use crate::section::{header, SectionCache, SectionCursor, SectionIter, SectionOptions, SectionWriter};

pub use bitmap::{BitmapBuilder, BitmapDictionary};
pub use sorted::SortedDictionary;

#[derive(Debug)]
pub enum Dictionary {
    Bitmap(BitmapDictionary),
    Sorted(SortedDictionary),
}

/// Streaming builder; fixed-width codecs get a bitmap, the rest a section store.
pub enum DictionaryBuilder {
    Bitmap(BitmapBuilder),
    Sorted(SectionWriter),
}

impl DictionaryBuilder {
    pub fn create(path: &Path, codec: ValueCodec, opts: SectionOptions) -> Result<Self> {
        if codec.is_fixed_width() {
            Ok(DictionaryBuilder::Bitmap(BitmapBuilder::new(
                path.to_path_buf(),
                codec,
            )))
        } else {
            let opts = SectionOptions {
                payload_tag: codec.tag(),
                ..opts
            };
            Ok(DictionaryBuilder::Sorted(SectionWriter::create(path, opts)?))
        }
    }

    /// Append the next encoded value; values must be strictly ascending.
    pub fn push(&mut self, value: &[u8]) -> Result<()> {
        match self {
            DictionaryBuilder::Bitmap(b) => b.push(value),
            DictionaryBuilder::Sorted(w) => w.push(value),
        }
    }

    /// Write the file and return the number of values.
    pub fn finish(self) -> Result<u64> {
        match self {
            DictionaryBuilder::Bitmap(b) => b.finish(),
            DictionaryBuilder::Sorted(w) => Ok(w.finish()?.element_count),
        }
    }
}

impl Dictionary {
    /// Build a dictionary file from already sorted, distinct encoded values.
    pub fn build<I, V>(path: &Path, codec: ValueCodec, values: I, opts: SectionOptions) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let mut builder = DictionaryBuilder::create(path, codec, opts)?;
        for v in values {
            builder.push(v.as_ref())?;
        }
        builder.finish()
    }

    pub fn open(path: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        let mut magic = [0u8; 4];
        File::open(path)?.read_exact(&mut magic).map_err(|_| {
            Error::corrupt(format!("{}: too short for a dictionary", path.display()))
        })?;
        if &magic == bitmap::MAGIC {
            Ok(Dictionary::Bitmap(BitmapDictionary::open(path)?))
        } else if &magic == header::MAGIC {
            Ok(Dictionary::Sorted(SortedDictionary::open(path, cache)?))
        } else {
            Err(Error::corrupt(format!(
                "{}: not a dictionary file",
                path.display()
            )))
        }
    }

    pub fn codec(&self) -> ValueCodec {
        match self {
            Dictionary::Bitmap(d) => d.codec(),
            Dictionary::Sorted(d) => d.codec(),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Dictionary::Bitmap(d) => d.len(),
            Dictionary::Sorted(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank of an encoded value, `None` if absent.
    pub fn position_of(&self, value: &[u8]) -> Result<Option<u64>> {
        match self {
            Dictionary::Bitmap(d) => Ok(d.position_of(value)),
            Dictionary::Sorted(d) => d.position_of(value),
        }
    }

    /// Encoded value at `rank`; out of range is a corpus inconsistency.
    pub fn value_of(&self, rank: u64) -> Result<Vec<u8>> {
        match self {
            Dictionary::Bitmap(d) => d.value_of(rank),
            Dictionary::Sorted(d) => d.value_of(rank),
        }
    }

    /// Encode `lex` with this dictionary's codec and look it up. A lexical form
    /// outside the codec's value space is simply absent.
    pub fn position_of_lex(&self, lex: &str) -> Result<Option<u64>> {
        match self.codec().encode(lex) {
            Some(bytes) => self.position_of(&bytes),
            None => Ok(None),
        }
    }

    pub fn lex_of(&self, rank: u64) -> Result<String> {
        let bytes = self.value_of(rank)?;
        self.codec().decode(&bytes)
    }

    pub fn iter(&self) -> DictionaryIter<'_> {
        match self {
            Dictionary::Bitmap(d) => DictionaryIter::Bitmap(Box::new(d.iter())),
            Dictionary::Sorted(d) => DictionaryIter::Sorted(d.iter()),
        }
    }

    pub fn cursor(&self) -> DictionaryCursor<'_> {
        match self {
            Dictionary::Bitmap(d) => DictionaryCursor::Bitmap(d),
            Dictionary::Sorted(d) => DictionaryCursor::Sorted(d.cursor()),
        }
    }
}

/// Values in rank order.
pub enum DictionaryIter<'a> {
    Bitmap(Box<dyn Iterator<Item = Vec<u8>> + 'a>),
    Sorted(SectionIter<'a>),
}

impl Iterator for DictionaryIter<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            DictionaryIter::Bitmap(it) => it.next().map(Ok),
            DictionaryIter::Sorted(it) => it.next(),
        }
    }
}

/// Lookup cursor for roughly ascending probes. Bitmap lookups are already
/// constant time, so only the sorted variant keeps state.
pub enum DictionaryCursor<'a> {
    Bitmap(&'a BitmapDictionary),
    Sorted(SectionCursor<'a>),
}

impl DictionaryCursor<'_> {
    pub fn position_of(&mut self, value: &[u8]) -> Result<Option<u64>> {
        match self {
            DictionaryCursor::Bitmap(d) => Ok(d.position_of(value)),
            DictionaryCursor::Sorted(c) => c.seek(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SectionOptions {
        SectionOptions {
            capacity: 8,
            ..SectionOptions::default()
        }
    }

    #[test]
    fn sorted_dictionary_roundtrip_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iris");
        let mut vals: Vec<String> = (0..100).map(|i| format!("http://ex.org/{}", i)).collect();
        vals.sort();
        let n = Dictionary::build(&path, ValueCodec::Utf8, &vals, opts()).unwrap();
        assert_eq!(n, 100);
        let dict = Dictionary::open(&path, SectionCache::new(1 << 20)).unwrap();
        assert!(matches!(dict, Dictionary::Sorted(_)));
        for (i, v) in vals.iter().enumerate() {
            let rank = dict.position_of(v.as_bytes()).unwrap().unwrap();
            assert_eq!(rank, i as u64);
            assert_eq!(dict.lex_of(rank).unwrap(), *v);
        }
        assert_eq!(dict.position_of(b"http://ex.org/x").unwrap(), None);
        let all: Vec<_> = dict.iter().map(|r| r.unwrap()).collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        let mut cur = dict.cursor();
        assert_eq!(cur.position_of(vals[50].as_bytes()).unwrap(), Some(50));
        assert_eq!(cur.position_of(vals[51].as_bytes()).unwrap(), Some(51));
    }

    #[test]
    fn bitmap_dictionary_rank_select() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datatype_int");
        let ints = [-500i64, -3, 0, 7, 42, 1_000_000];
        let encoded: Vec<_> = ints
            .iter()
            .map(|i| ValueCodec::Int32.encode(&i.to_string()).unwrap())
            .collect();
        Dictionary::build(&path, ValueCodec::Int32, &encoded, opts()).unwrap();
        let dict = Dictionary::open(&path, SectionCache::new(1024)).unwrap();
        assert!(matches!(dict, Dictionary::Bitmap(_)));
        assert_eq!(dict.codec(), ValueCodec::Int32);
        assert_eq!(dict.len(), 6);
        for (i, v) in ints.iter().enumerate() {
            assert_eq!(dict.position_of_lex(&v.to_string()).unwrap(), Some(i as u64));
            assert_eq!(dict.lex_of(i as u64).unwrap(), v.to_string());
        }
        assert_eq!(dict.position_of_lex("8").unwrap(), None);
        assert_eq!(dict.position_of_lex("eight").unwrap(), None);
        assert!(matches!(dict.value_of(6), Err(Error::Corrupt(_))));
        let iterated: Vec<_> = dict.iter().map(|r| r.unwrap()).collect();
        assert_eq!(iterated, encoded);
    }

    #[test]
    fn unsorted_input_is_an_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let ints = [ValueCodec::Int64.encode("5").unwrap(), ValueCodec::Int64.encode("5").unwrap()];
        let err = Dictionary::build(&dir.path().join("d"), ValueCodec::Int64, &ints, opts());
        assert!(matches!(err, Err(Error::Invariant(_))));
        let strs = ["b", "a"];
        let err = Dictionary::build(&dir.path().join("s"), ValueCodec::Utf8, strs, opts());
        assert!(matches!(err, Err(Error::Invariant(_))));
    }

    #[test]
    fn open_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, b"JUNKJUNK").unwrap();
        assert!(matches!(
            Dictionary::open(&path, SectionCache::new(1024)),
            Err(Error::Corrupt(_))
        ));
        let mut bytes = Vec::from(&bitmap::MAGIC[..]);
        bytes.extend_from_slice(&[1, 0, 6, 0]);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Dictionary::open(&path, SectionCache::new(1024)),
            Err(Error::Corrupt(_))
        ));
    }
}
