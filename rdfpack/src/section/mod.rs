//! Section store: a sorted list of byte strings split into fixed-capacity,
//! front-coded, optionally zstd-compressed sections.
//!
//! Reading only needs the header, the TOC and each section's first element;
//! sections are decoded lazily and kept in a [`SectionCache`].

pub mod cache;
pub mod header;
mod pool;
mod reader;
mod writer;

pub use cache::{DecodedPairs, DecodedSection, SectionCache};
pub use reader::{SectionCursor, SectionIter, SectionStore};
pub use writer::SectionWriter;

pub(crate) use writer::tmp_path;

use crate::config::IngestConfig;

/// Options for [`SectionWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionOptions {
    pub capacity: u32,
    /// Codec tag recorded in the header.
    pub payload_tag: u16,
    pub compress: bool,
    pub zstd_level: i32,
    /// Encoded sections allowed to wait for their turn to be written.
    pub max_pending: usize,
}

impl Default for SectionOptions {
    fn default() -> Self {
        Self {
            capacity: 2048,
            payload_tag: 0,
            compress: true,
            zstd_level: 0,
            max_pending: 2 * rayon::current_num_threads(),
        }
    }
}

impl SectionOptions {
    pub fn from_config(cfg: &IngestConfig, payload_tag: u16) -> Self {
        Self {
            capacity: cfg.section_capacity,
            payload_tag,
            compress: cfg.compress_sections,
            zstd_level: cfg.zstd_level,
            ..Self::default()
        }
    }
}

/// Summary returned by [`SectionWriter::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionStoreInfo {
    pub element_count: u64,
    pub section_count: u32,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::path::Path;

    fn words(n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| format!("http://example.org/item/{:06}", i * 3).into_bytes())
            .collect()
    }

    fn write(path: &Path, elems: &[Vec<u8>], capacity: u32, compress: bool) -> SectionStoreInfo {
        let opts = SectionOptions {
            capacity,
            payload_tag: 1,
            compress,
            zstd_level: 0,
            max_pending: 2,
        };
        let mut w = SectionWriter::create(path, opts).unwrap();
        for e in elems {
            w.push(e).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn find_get_iter_across_sections() {
        for compress in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("store");
            let elems = words(1000);
            let info = write(&path, &elems, 64, compress);
            assert_eq!(info.element_count, 1000);
            assert_eq!(info.section_count, 16);

            let store = SectionStore::open(&path, SectionCache::new(1 << 20)).unwrap();
            assert_eq!(store.len(), 1000);
            assert_eq!(store.payload_tag(), 1);
            for (i, e) in elems.iter().enumerate() {
                assert_eq!(store.find(e).unwrap(), Some(i as u64));
                assert_eq!(&store.get(i as u64).unwrap(), e);
            }
            assert_eq!(store.find(b"http://example.org/item/000001").unwrap(), None);
            assert_eq!(store.find(b"a").unwrap(), None);
            assert_eq!(store.find(b"z").unwrap(), None);
            let all: Vec<_> = store.iter().map(|r| r.unwrap()).collect();
            assert_eq!(all, elems);
            assert!(matches!(store.get(1000), Err(Error::Corrupt(_))));
        }
    }

    #[test]
    fn cursor_gallops_forward_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let elems = words(5000);
        write(&path, &elems, 16, true);
        let store = SectionStore::open(&path, SectionCache::new(1 << 20)).unwrap();
        let mut cur = store.cursor();
        for (i, e) in elems.iter().enumerate().step_by(7) {
            assert_eq!(cur.seek(e).unwrap(), Some(i as u64));
            assert_eq!(cur.position(), Some((i / 16) as u32));
        }
        assert_eq!(cur.seek(&elems[3]).unwrap(), Some(3));
        assert_eq!(cur.seek(&elems[4999]).unwrap(), Some(4999));
        assert_eq!(cur.seek(b"http://example.org/item/000002").unwrap(), None);
        assert_eq!(cur.seek(b"0").unwrap(), None);
    }

    #[test]
    fn empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        let info = write(&path, &[], 8, true);
        assert_eq!(info.section_count, 0);
        let store = SectionStore::open(&path, SectionCache::new(1024)).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.find(b"x").unwrap(), None);
        assert_eq!(store.iter().count(), 0);
        assert_eq!(store.cursor().seek(b"x").unwrap(), None);
    }

    #[test]
    fn rejects_unsorted_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut w =
            SectionWriter::create(dir.path().join("bad"), SectionOptions::default()).unwrap();
        w.push(b"b").unwrap();
        assert!(matches!(w.push(b"a"), Err(Error::Invariant(_))));
        assert!(matches!(w.push(b"b"), Err(Error::Invariant(_))));
    }

    #[test]
    fn corrupt_section_is_reported_on_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let elems = words(100);
        write(&path, &elems, 10, false);
        let mut data = std::fs::read(&path).unwrap();
        // flip a byte inside the first block's payload
        data[header::HEADER_LEN + header::BLOCK_PREFIX_LEN + 2] ^= 0xFF;
        let store = SectionStore::from_bytes(data, SectionCache::new(1 << 20)).unwrap();
        assert!(matches!(store.get(0), Err(Error::Corrupt(_))));
        assert_eq!(store.get(50).unwrap(), elems[50]);
        let mut it = store.iter();
        assert!(matches!(it.next(), Some(Err(Error::Corrupt(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn corrupt_metadata_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        write(&path, &words(100), 10, true);
        let mut data = std::fs::read(&path).unwrap();
        let n = data.len();
        data[n - header::FOOTER_LEN - 1] ^= 0x01;
        assert!(matches!(
            SectionStore::from_bytes(data, SectionCache::new(1024)),
            Err(Error::Corrupt(_))
        ));
    }
}
