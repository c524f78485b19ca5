use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::cache::{DecodedSection, SectionCache};
use super::header::{
    parse_footer, parse_toc, section_in_bounds, Header, TocEntry, BLOCK_PREFIX_LEN, BLOCK_RAW,
    BLOCK_ZSTD, FOOTER_LEN, HEADER_LEN, MAGIC, TOC_ENTRY_LEN, VERSION,
};
use crate::codec::varint::decode_front_coded;
use crate::error::{Error, Result};

#[derive(Debug)]
enum Backing {
    Owned(Vec<u8>),
    Mmap(memmap2::Mmap),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v.as_slice(),
            Backing::Mmap(m) => m,
        }
    }
}

/// Opened section store. Header, TOC and first elements are parsed on open;
/// section contents are decoded on demand through the shared cache.
#[derive(Debug)]
pub struct SectionStore {
    backing: Backing,
    header: Header,
    toc: Vec<TocEntry>,
    firsts_off: usize,
    cache: Arc<SectionCache>,
    id: u64,
}

impl SectionStore {
    /// Memory-map and validate a section store file.
    pub fn open(path: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        let f = File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }?;
        Self::from_backing(Backing::Mmap(mmap), cache)
            .map_err(|e| with_path(e, path))
    }

    /// Validate a store held in memory.
    pub fn from_bytes(data: Vec<u8>, cache: Arc<SectionCache>) -> Result<Self> {
        Self::from_backing(Backing::Owned(data), cache)
    }

    fn from_backing(backing: Backing, cache: Arc<SectionCache>) -> Result<Self> {
        let data = backing.as_bytes();
        let header =
            Header::parse(data).ok_or_else(|| Error::corrupt("short or invalid header"))?;
        if &header.magic != MAGIC {
            return Err(Error::corrupt("bad section store magic"));
        }
        if header.version != VERSION {
            return Err(Error::corrupt(format!(
                "unsupported section store version {}",
                header.version
            )));
        }
        if header.capacity == 0 {
            return Err(Error::corrupt("zero section capacity"));
        }
        let expected_sections = header.element_count.div_ceil(header.capacity as u64);
        if expected_sections != header.section_count as u64 {
            return Err(Error::corrupt("section count does not match element count"));
        }
        let footer_crc = parse_footer(data).ok_or_else(|| Error::corrupt("bad footer"))?;
        let toc_off = usize::try_from(header.toc_off)
            .map_err(|_| Error::corrupt("TOC offset out of bounds"))?;
        if toc_off < HEADER_LEN || toc_off > data.len().saturating_sub(FOOTER_LEN) {
            return Err(Error::corrupt("TOC offset out of bounds"));
        }
        let toc = parse_toc(data, &header).ok_or_else(|| Error::corrupt("TOC parse failed"))?;
        let firsts_off = toc_off + toc.len() * TOC_ENTRY_LEN;
        let meta_end = data.len() - FOOTER_LEN;
        if firsts_off > meta_end {
            return Err(Error::corrupt("TOC overlaps footer"));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..HEADER_LEN]);
        hasher.update(&data[toc_off..meta_end]);
        if hasher.finalize() != footer_crc {
            return Err(Error::corrupt("metadata CRC mismatch"));
        }
        let firsts_len = (meta_end - firsts_off) as u64;
        let mut prev_end = HEADER_LEN as u64;
        for (i, e) in toc.iter().enumerate() {
            if !section_in_bounds(toc_off, e.section) || e.section.off < prev_end {
                return Err(Error::corrupt(format!("section {} out of bounds", i)));
            }
            if e.section.len < BLOCK_PREFIX_LEN as u64 {
                return Err(Error::corrupt(format!("section {} too short", i)));
            }
            if e.first_off.saturating_add(e.first_len as u64) > firsts_len {
                return Err(Error::corrupt(format!("first element {} out of bounds", i)));
            }
            prev_end = e.section.off + e.section.len;
        }
        let id = cache.register_store();
        Ok(SectionStore {
            backing,
            header,
            toc,
            firsts_off,
            cache,
            id,
        })
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.backing.as_bytes()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload_tag(&self) -> u16 {
        self.header.payload_tag
    }

    /// Number of elements.
    pub fn len(&self) -> u64 {
        self.header.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.header.capacity as u64
    }

    pub fn section_count(&self) -> u32 {
        self.header.section_count
    }

    /// First element of section `idx`, straight from the mapped file.
    pub fn first(&self, idx: u32) -> &[u8] {
        let e = &self.toc[idx as usize];
        let start = self.firsts_off + e.first_off as usize;
        &self.bytes()[start..start + e.first_len as usize]
    }

    fn expected_len(&self, idx: u32) -> usize {
        let start = idx as u64 * self.capacity();
        (self.len() - start).min(self.capacity()) as usize
    }

    /// Decode section `idx` from disk, verifying its CRC.
    pub(crate) fn decode_section(&self, idx: u32) -> Result<Vec<Vec<u8>>> {
        let e = self
            .toc
            .get(idx as usize)
            .ok_or_else(|| Error::corrupt(format!("section {} out of range", idx)))?;
        let start = e.section.off as usize;
        let block = &self.bytes()[start..start + e.section.len as usize];
        if crc32fast::hash(block) != e.crc32 {
            return Err(Error::corrupt(format!("section {} CRC mismatch", idx)));
        }
        let plen = u32::from_le_bytes([block[1], block[2], block[3], block[4]]) as usize;
        let payload = block
            .get(BLOCK_PREFIX_LEN..BLOCK_PREFIX_LEN + plen)
            .ok_or_else(|| Error::corrupt(format!("section {} payload out of bounds", idx)))?;
        let elements = match block[0] {
            BLOCK_RAW => decode_front_coded(payload),
            BLOCK_ZSTD => {
                let raw = zstd::decode_all(std::io::Cursor::new(payload))
                    .map_err(|_| Error::corrupt(format!("section {} zstd decode", idx)))?;
                decode_front_coded(&raw)
            }
            other => {
                return Err(Error::corrupt(format!(
                    "section {} has unknown encoding {}",
                    idx, other
                )))
            }
        }
        .ok_or_else(|| Error::corrupt(format!("section {} front coding", idx)))?;
        if elements.len() != self.expected_len(idx) {
            return Err(Error::corrupt(format!(
                "section {} holds {} elements, expected {}",
                idx,
                elements.len(),
                self.expected_len(idx)
            )));
        }
        Ok(elements)
    }

    /// Decoded section `idx`, through the cache.
    pub fn section(&self, idx: u32) -> Result<DecodedSection> {
        if let Some(hit) = self.cache.get(self.id, idx) {
            return Ok(hit);
        }
        let decoded = Arc::new(self.decode_section(idx)?);
        self.cache.insert(self.id, idx, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// First index in `lo..hi` whose first element is greater than `value`.
    fn upper_bound_first(&self, mut lo: u32, mut hi: u32, value: &[u8]) -> u32 {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.first(mid) <= value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn search_in(&self, idx: u32, elems: &[Vec<u8>], value: &[u8]) -> Option<u64> {
        elems
            .binary_search_by(|e| e.as_slice().cmp(value))
            .ok()
            .map(|local| idx as u64 * self.capacity() + local as u64)
    }

    /// Rank of `value`, or `None` if the store does not contain it.
    pub fn find(&self, value: &[u8]) -> Result<Option<u64>> {
        let idx = self.upper_bound_first(0, self.section_count(), value);
        if idx == 0 {
            return Ok(None);
        }
        let sec = self.section(idx - 1)?;
        Ok(self.search_in(idx - 1, &sec, value))
    }

    /// Element at global `rank`.
    pub fn get(&self, rank: u64) -> Result<Vec<u8>> {
        if rank >= self.len() {
            return Err(Error::corrupt(format!(
                "rank {} out of range ({} elements)",
                rank,
                self.len()
            )));
        }
        let idx = (rank / self.capacity()) as u32;
        let local = (rank % self.capacity()) as usize;
        let sec = self.section(idx)?;
        sec.get(local)
            .cloned()
            .ok_or_else(|| Error::corrupt(format!("rank {} missing from section {}", rank, idx)))
    }

    /// Elements in order. Sections are decoded one at a time and bypass the cache.
    pub fn iter(&self) -> SectionIter<'_> {
        SectionIter {
            store: self,
            next_section: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Cursor for roughly ascending probes.
    pub fn cursor(&self) -> SectionCursor<'_> {
        SectionCursor {
            store: self,
            current: None,
        }
    }
}

fn with_path(e: Error, path: &Path) -> Error {
    match e {
        Error::Corrupt(m) => Error::Corrupt(format!("{}: {}", path.display(), m)),
        other => other,
    }
}

/// Ordered iteration over every element of a store.
pub struct SectionIter<'a> {
    store: &'a SectionStore,
    next_section: u32,
    current: std::vec::IntoIter<Vec<u8>>,
    failed: bool,
}

impl Iterator for SectionIter<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(e) = self.current.next() {
                return Some(Ok(e));
            }
            if self.next_section >= self.store.section_count() {
                return None;
            }
            match self.store.decode_section(self.next_section) {
                Ok(elems) => self.current = elems.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
            self.next_section += 1;
        }
    }
}

/// Stateful lookup that remembers the last section it landed in.
///
/// Probes at or after the current section gallop forward over the first
/// elements instead of binary searching the whole TOC again.
pub struct SectionCursor<'a> {
    store: &'a SectionStore,
    current: Option<(u32, DecodedSection)>,
}

impl SectionCursor<'_> {
    /// Section that may contain `value`, starting from the current position.
    fn locate(&self, value: &[u8]) -> Option<u32> {
        let store = self.store;
        let n = store.section_count();
        match &self.current {
            Some((cur, _)) if store.first(*cur) <= value => {
                let mut known = *cur;
                let mut step = 1u32;
                let upper = loop {
                    let probe = known.saturating_add(step);
                    if probe >= n || store.first(probe) > value {
                        break probe.min(n);
                    }
                    known = probe;
                    step = step.saturating_mul(2);
                };
                Some(store.upper_bound_first(known + 1, upper, value) - 1)
            }
            Some((cur, _)) => {
                let idx = store.upper_bound_first(0, *cur, value);
                idx.checked_sub(1)
            }
            None => store.upper_bound_first(0, n, value).checked_sub(1),
        }
    }

    /// Rank of `value`, moving the cursor to the section that would hold it.
    pub fn seek(&mut self, value: &[u8]) -> Result<Option<u64>> {
        let Some(idx) = self.locate(value) else {
            return Ok(None);
        };
        let reuse = matches!(&self.current, Some((cur, _)) if *cur == idx);
        if !reuse {
            self.current = Some((idx, self.store.section(idx)?));
        }
        Ok(self
            .current
            .as_ref()
            .and_then(|(cur, elems)| self.store.search_in(*cur, elems, value)))
    }

    /// Section the cursor currently sits in.
    pub fn position(&self) -> Option<u32> {
        self.current.as_ref().map(|(idx, _)| *idx)
    }
}
