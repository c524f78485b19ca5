//! Long-buffer adjacency encoding (`.lb`): (key, value) rank pairs sorted by
//! key then value, stored in sections of [`PAIRS_PER_SECTION`].
//!
//! ```text
//! [header 32B][section 0]..[section n-1][toc n*40B][footer 12B]
//! section = [key min u64][key width u8][value min u64][value width u8][keys][values]
//! ```
//!
//! Keys and values are bit-packed against the section minimum when the span
//! fits in 32 bits; width [`RAW_WIDTH`] means plain little-endian u64s.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::{Adjacent, Scan};
use crate::error::{Error, Result};
use crate::section::{tmp_path, DecodedPairs, SectionCache};

pub const MAGIC: &[u8; 4] = b"RPAL";
const END_MAGIC: &[u8; 8] = b"RPAL_END";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 32;
const TOC_ENTRY_LEN: usize = 40;
const FOOTER_LEN: usize = 12;
const SECTION_PREFIX_LEN: usize = 18;

pub const PAIRS_PER_SECTION: usize = 1024;
pub const RAW_WIDTH: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TocEntry {
    off: u64,
    len: u32,
    count: u32,
    crc32: u32,
    first_key: u64,
    first_value: u64,
}

impl TocEntry {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.off.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.first_key.to_le_bytes());
        out.extend_from_slice(&self.first_value.to_le_bytes());
    }

    fn parse(b: &[u8]) -> Option<Self> {
        Some(TocEntry {
            off: u64::from_le_bytes(b.get(0..8)?.try_into().ok()?),
            len: u32::from_le_bytes(b.get(8..12)?.try_into().ok()?),
            count: u32::from_le_bytes(b.get(12..16)?.try_into().ok()?),
            crc32: u32::from_le_bytes(b.get(16..20)?.try_into().ok()?),
            first_key: u64::from_le_bytes(b.get(24..32)?.try_into().ok()?),
            first_value: u64::from_le_bytes(b.get(32..40)?.try_into().ok()?),
        })
    }
}

/// Bits per element for a run spanning `min..=max`.
fn width_for(min: u64, max: u64) -> u8 {
    let span = max - min;
    if span > u32::MAX as u64 {
        RAW_WIDTH
    } else {
        (64 - span.leading_zeros()) as u8
    }
}

fn packed_len(count: usize, width: u8) -> usize {
    (count * width as usize).div_ceil(8)
}

fn pack(values: &[u64], min: u64, width: u8, out: &mut Vec<u8>) {
    if width == RAW_WIDTH {
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        return;
    }
    let mut acc = 0u64;
    let mut bits = 0u32;
    for &v in values {
        acc |= (v - min) << bits;
        bits += width as u32;
        while bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push(acc as u8);
    }
}

fn unpack(buf: &[u8], count: usize, min: u64, width: u8) -> Option<Vec<u64>> {
    if buf.len() < packed_len(count, width) {
        return None;
    }
    let mut out = Vec::with_capacity(count);
    if width == RAW_WIDTH {
        for chunk in buf.chunks_exact(8).take(count) {
            out.push(u64::from_le_bytes(chunk.try_into().ok()?));
        }
        return Some(out);
    }
    let width = width as u32;
    let mask = if width == 0 { 0 } else { (1u64 << width) - 1 };
    let mut acc = 0u64;
    let mut bits = 0u32;
    let mut pos = 0usize;
    for _ in 0..count {
        while bits < width {
            acc |= (buf[pos] as u64) << bits;
            pos += 1;
            bits += 8;
        }
        out.push(min.checked_add(acc & mask)?);
        acc >>= width;
        bits -= width;
    }
    Some(out)
}

/// Writes sorted, distinct (key, value) pairs into a `.lb` file.
pub struct LongBufferWriter {
    path: PathBuf,
    tmp: PathBuf,
    out: BufWriter<File>,
    keys: Vec<u64>,
    values: Vec<u64>,
    toc: Vec<TocEntry>,
    offset: u64,
    count: u64,
    last: Option<(u64, u64)>,
}

impl LongBufferWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let tmp = tmp_path(path);
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(&[0u8; HEADER_LEN])?;
        Ok(LongBufferWriter {
            path: path.to_path_buf(),
            tmp,
            out,
            keys: Vec::with_capacity(PAIRS_PER_SECTION),
            values: Vec::with_capacity(PAIRS_PER_SECTION),
            toc: Vec::new(),
            offset: HEADER_LEN as u64,
            count: 0,
            last: None,
        })
    }

    pub fn push(&mut self, key: u64, value: u64) -> Result<()> {
        if let Some(last) = self.last {
            if (key, value) <= last {
                return Err(Error::invariant(format!(
                    "adjacency pair ({}, {}) not after ({}, {})",
                    key, value, last.0, last.1
                )));
            }
        }
        self.last = Some((key, value));
        self.keys.push(key);
        self.values.push(value);
        self.count += 1;
        if self.keys.len() == PAIRS_PER_SECTION {
            self.seal()?;
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn seal(&mut self) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let key_min = self.keys[0];
        let key_max = self.keys[self.keys.len() - 1];
        let value_min = self.values.iter().copied().min().unwrap_or(0);
        let value_max = self.values.iter().copied().max().unwrap_or(0);
        let key_width = width_for(key_min, key_max);
        let value_width = width_for(value_min, value_max);

        let mut block = Vec::with_capacity(
            SECTION_PREFIX_LEN
                + packed_len(self.keys.len(), key_width)
                + packed_len(self.values.len(), value_width),
        );
        block.extend_from_slice(&key_min.to_le_bytes());
        block.push(key_width);
        block.extend_from_slice(&value_min.to_le_bytes());
        block.push(value_width);
        pack(&self.keys, key_min, key_width, &mut block);
        pack(&self.values, value_min, value_width, &mut block);

        self.toc.push(TocEntry {
            off: self.offset,
            len: u32::try_from(block.len()).map_err(|_| Error::Invalid("section too large"))?,
            count: self.keys.len() as u32,
            crc32: crc32fast::hash(&block),
            first_key: key_min,
            first_value: self.values[0],
        });
        self.out.write_all(&block)?;
        self.offset += block.len() as u64;
        self.keys.clear();
        self.values.clear();
        Ok(())
    }

    /// Returns the number of pairs written.
    pub fn finish(mut self) -> Result<u64> {
        self.seal()?;
        let section_count =
            u32::try_from(self.toc.len()).map_err(|_| Error::Invalid("too many sections"))?;
        let mut head = [0u8; HEADER_LEN];
        head[0..4].copy_from_slice(MAGIC);
        head[4] = VERSION;
        head[8..12].copy_from_slice(&(PAIRS_PER_SECTION as u32).to_le_bytes());
        head[12..16].copy_from_slice(&section_count.to_le_bytes());
        head[16..24].copy_from_slice(&self.count.to_le_bytes());
        head[24..32].copy_from_slice(&self.offset.to_le_bytes());

        let mut meta = Vec::with_capacity(self.toc.len() * TOC_ENTRY_LEN + FOOTER_LEN);
        for e in &self.toc {
            e.write(&mut meta);
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(&meta);
        meta.extend_from_slice(&hasher.finalize().to_le_bytes());
        meta.extend_from_slice(END_MAGIC);

        self.out.write_all(&meta)?;
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&head)?;
        self.out.flush()?;
        drop(self.out);
        fs::rename(&self.tmp, &self.path)?;
        debug!(
            "wrote {} ({} pairs, {} sections)",
            self.path.display(),
            self.count,
            section_count
        );
        Ok(self.count)
    }
}

/// Memory-mapped `.lb` file. Decoded sections go through the shared cache.
#[derive(Debug)]
pub struct LongBufferIndex {
    mmap: memmap2::Mmap,
    cache: Arc<SectionCache>,
    id: u64,
    toc: Vec<TocEntry>,
    count: u64,
    /// Position of the first pair of each section.
    starts: Vec<u64>,
}

impl LongBufferIndex {
    pub fn open(path: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        let f = File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }?;
        Self::parse(mmap, cache).map_err(|e| match e {
            Error::Corrupt(m) => Error::Corrupt(format!("{}: {}", path.display(), m)),
            other => other,
        })
    }

    fn parse(mmap: memmap2::Mmap, cache: Arc<SectionCache>) -> Result<Self> {
        let data: &[u8] = &mmap;
        if data.len() < HEADER_LEN + FOOTER_LEN || &data[0..4] != MAGIC {
            return Err(Error::corrupt("bad long-buffer header"));
        }
        if data[4] != VERSION {
            return Err(Error::corrupt("unsupported long-buffer version"));
        }
        if &data[data.len() - END_MAGIC.len()..] != END_MAGIC {
            return Err(Error::corrupt("bad long-buffer footer"));
        }
        let word = |r: std::ops::Range<usize>| -> u64 {
            let b = &data[r];
            let mut buf = [0u8; 8];
            buf[..b.len()].copy_from_slice(b);
            u64::from_le_bytes(buf)
        };
        let section_count = word(12..16) as usize;
        let count = word(16..24);
        let toc_off = usize::try_from(word(24..32))
            .map_err(|_| Error::corrupt("TOC offset out of bounds"))?;
        let meta_end = data.len() - FOOTER_LEN;
        if toc_off < HEADER_LEN
            || toc_off > meta_end
            || section_count.checked_mul(TOC_ENTRY_LEN) != Some(meta_end - toc_off)
        {
            return Err(Error::corrupt("TOC out of bounds"));
        }
        let stored = word(meta_end..meta_end + 4) as u32;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..HEADER_LEN]);
        hasher.update(&data[toc_off..meta_end]);
        if hasher.finalize() != stored {
            return Err(Error::corrupt("long-buffer metadata CRC mismatch"));
        }
        let mut toc = Vec::with_capacity(section_count);
        let mut starts = Vec::with_capacity(section_count);
        let mut total = 0u64;
        for i in 0..section_count {
            let off = toc_off + i * TOC_ENTRY_LEN;
            let e = TocEntry::parse(&data[off..off + TOC_ENTRY_LEN])
                .ok_or_else(|| Error::corrupt("TOC parse failed"))?;
            let end = e.off.checked_add(e.len as u64);
            if e.off < HEADER_LEN as u64 || end.map_or(true, |end| end > toc_off as u64) {
                return Err(Error::corrupt(format!("section {} out of bounds", i)));
            }
            starts.push(total);
            total += e.count as u64;
            toc.push(e);
        }
        if total != count {
            return Err(Error::corrupt("pair count does not match sections"));
        }
        let id = cache.register_store();
        Ok(LongBufferIndex {
            mmap,
            cache,
            id,
            toc,
            count,
            starts,
        })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn section_count(&self) -> usize {
        self.toc.len()
    }

    fn section(&self, idx: usize) -> Result<DecodedPairs> {
        if let Some(pairs) = self.cache.get_pairs(self.id, idx as u32) {
            return Ok(pairs);
        }
        let pairs = Arc::new(self.decode_section(idx)?);
        self.cache.insert_pairs(self.id, idx as u32, Arc::clone(&pairs));
        Ok(pairs)
    }

    fn decode_section(&self, idx: usize) -> Result<Vec<(u64, u64)>> {
        let e = self.toc[idx];
        let block = &self.mmap[e.off as usize..(e.off + e.len as u64) as usize];
        if crc32fast::hash(block) != e.crc32 {
            return Err(Error::corrupt(format!("long-buffer section {} CRC mismatch", idx)));
        }
        if block.len() < SECTION_PREFIX_LEN {
            return Err(Error::corrupt(format!("long-buffer section {} too short", idx)));
        }
        let bad = || Error::corrupt(format!("long-buffer section {} malformed", idx));
        let key_min = u64::from_le_bytes(block[0..8].try_into().map_err(|_| bad())?);
        let key_width = block[8];
        let value_min = u64::from_le_bytes(block[9..17].try_into().map_err(|_| bad())?);
        let value_width = block[17];
        if (key_width > 32 && key_width != RAW_WIDTH) || (value_width > 32 && value_width != RAW_WIDTH) {
            return Err(bad());
        }
        let n = e.count as usize;
        let body = &block[SECTION_PREFIX_LEN..];
        let key_len = packed_len(n, key_width);
        let keys = unpack(body, n, key_min, key_width).ok_or_else(bad)?;
        let values = unpack(body.get(key_len..).ok_or_else(bad)?, n, value_min, value_width)
            .ok_or_else(bad)?;
        Ok(keys.into_iter().zip(values).collect())
    }

    /// Index of the first section that can hold pairs at or after `(key, value)`.
    fn start_section(&self, key: u64, value: u64) -> usize {
        self.toc
            .partition_point(|e| (e.first_key, e.first_value) <= (key, value))
            .saturating_sub(1)
    }

    pub fn contains(&self, key: u64, value: u64) -> Result<Option<u64>> {
        if self.toc.is_empty() {
            return Ok(None);
        }
        let idx = self.start_section(key, value);
        let pairs = self.section(idx)?;
        Ok(pairs
            .binary_search(&(key, value))
            .ok()
            .map(|i| self.starts[idx] + i as u64))
    }

    /// Pairs filtered by optional key and value, ordered by (key, value).
    pub fn scan(&self, key: Option<u64>, value: Option<u64>) -> Scan<'_> {
        let section = match key {
            Some(k) => self.start_section(k, 0),
            None => 0,
        };
        Box::new(LongBufferScan {
            index: self,
            key,
            value,
            section,
            pairs: Arc::new(Vec::new()),
            next: 0,
            done: self.toc.is_empty(),
        })
    }
}

struct LongBufferScan<'a> {
    index: &'a LongBufferIndex,
    key: Option<u64>,
    value: Option<u64>,
    section: usize,
    pairs: DecodedPairs,
    next: usize,
    done: bool,
}

impl Iterator for LongBufferScan<'_> {
    type Item = Result<Adjacent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.next == self.pairs.len() {
                if self.section >= self.index.toc.len() {
                    self.done = true;
                    return None;
                }
                match self.index.section(self.section) {
                    Ok(p) => self.pairs = p,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                self.next = 0;
                self.section += 1;
            }
            let (k, v) = self.pairs[self.next];
            let position = self.index.starts[self.section - 1] + self.next as u64;
            self.next += 1;
            if let Some(want) = self.key {
                if k < want {
                    continue;
                }
                if k > want {
                    self.done = true;
                    return None;
                }
            }
            if self.value.is_some_and(|want| want != v) {
                continue;
            }
            return Some(Ok(Adjacent {
                position,
                subject: k,
                object: v,
            }));
        }
    }
}
