//! Bitmap adjacency encoding (`.bm`) for buckets with few distinct objects:
//! one roaring bitmap of subject ranks per object rank.
//!
//! ```text
//! [header 32B][bitmap 0]..[bitmap n-1][directory n*32B][footer 12B]
//! directory entry = [object rank u64][entries before u64][off u64][len u32][crc32 u32]
//! ```
//!
//! Entry positions are object-major: the entries of object `i` occupy
//! `before(i)..before(i) + |bitmap(i)|`, ordered by subject.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;
use roaring::RoaringTreemap;

use super::{Adjacent, Scan};
use crate::error::{Error, Result};
use crate::merge::{KWayMerge, Peeked};
use crate::section::tmp_path;

pub const MAGIC: &[u8; 4] = b"RPAB";
const END_MAGIC: &[u8; 8] = b"RPAB_END";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 32;
const DIR_ENTRY_LEN: usize = 32;
const FOOTER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirEntry {
    object: u64,
    before: u64,
    off: u64,
    len: u32,
    crc32: u32,
}

impl DirEntry {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.object.to_le_bytes());
        out.extend_from_slice(&self.before.to_le_bytes());
        out.extend_from_slice(&self.off.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
    }

    fn parse(b: &[u8]) -> Option<Self> {
        Some(DirEntry {
            object: u64::from_le_bytes(b.get(0..8)?.try_into().ok()?),
            before: u64::from_le_bytes(b.get(8..16)?.try_into().ok()?),
            off: u64::from_le_bytes(b.get(16..24)?.try_into().ok()?),
            len: u32::from_le_bytes(b.get(24..28)?.try_into().ok()?),
            crc32: u32::from_le_bytes(b.get(28..32)?.try_into().ok()?),
        })
    }
}

/// Writes per-object subject bitmaps in ascending object order.
pub struct BitmapIndexWriter {
    path: PathBuf,
    tmp: PathBuf,
    out: BufWriter<File>,
    dir: Vec<DirEntry>,
    offset: u64,
    entries: u64,
    buf: Vec<u8>,
}

impl BitmapIndexWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let tmp = tmp_path(path);
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(&[0u8; HEADER_LEN])?;
        Ok(BitmapIndexWriter {
            path: path.to_path_buf(),
            tmp,
            out,
            dir: Vec::new(),
            offset: HEADER_LEN as u64,
            entries: 0,
            buf: Vec::new(),
        })
    }

    pub fn add(&mut self, object: u64, subjects: &RoaringTreemap) -> Result<()> {
        if self.dir.last().is_some_and(|last| last.object >= object) {
            return Err(Error::invariant(format!(
                "bitmap index object {} out of order",
                object
            )));
        }
        if subjects.is_empty() {
            return Err(Error::invariant(format!("object {} has no subjects", object)));
        }
        self.buf.clear();
        subjects.serialize_into(&mut self.buf)?;
        self.dir.push(DirEntry {
            object,
            before: self.entries,
            off: self.offset,
            len: u32::try_from(self.buf.len()).map_err(|_| Error::Invalid("bitmap too large"))?,
            crc32: crc32fast::hash(&self.buf),
        });
        self.out.write_all(&self.buf)?;
        self.offset += self.buf.len() as u64;
        self.entries += subjects.len();
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn finish(mut self) -> Result<u64> {
        let objects =
            u32::try_from(self.dir.len()).map_err(|_| Error::Invalid("too many objects"))?;
        let mut head = [0u8; HEADER_LEN];
        head[0..4].copy_from_slice(MAGIC);
        head[4] = VERSION;
        head[8..12].copy_from_slice(&objects.to_le_bytes());
        head[16..24].copy_from_slice(&self.entries.to_le_bytes());
        head[24..32].copy_from_slice(&self.offset.to_le_bytes());

        let mut meta = Vec::with_capacity(self.dir.len() * DIR_ENTRY_LEN + FOOTER_LEN);
        for e in &self.dir {
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
            "wrote {} ({} objects, {} entries)",
            self.path.display(),
            objects,
            self.entries
        );
        Ok(self.entries)
    }
}

/// Memory-mapped `.bm` file. Bitmaps are deserialized on first use.
#[derive(Debug)]
pub struct BitmapIndex {
    mmap: memmap2::Mmap,
    dir: Vec<DirEntry>,
    bitmaps: Vec<OnceLock<RoaringTreemap>>,
    entries: u64,
}

impl BitmapIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }?;
        Self::parse(mmap).map_err(|e| match e {
            Error::Corrupt(m) => Error::Corrupt(format!("{}: {}", path.display(), m)),
            other => other,
        })
    }

    fn parse(mmap: memmap2::Mmap) -> Result<Self> {
        let data: &[u8] = &mmap;
        if data.len() < HEADER_LEN + FOOTER_LEN || &data[0..4] != MAGIC {
            return Err(Error::corrupt("bad bitmap index header"));
        }
        if data[4] != VERSION {
            return Err(Error::corrupt("unsupported bitmap index version"));
        }
        if &data[data.len() - END_MAGIC.len()..] != END_MAGIC {
            return Err(Error::corrupt("bad bitmap index footer"));
        }
        let u32_at = |o: usize| u32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
        let u64_at = |o: usize| (u32_at(o) as u64) | ((u32_at(o + 4) as u64) << 32);
        let objects = u32_at(8) as usize;
        let entries = u64_at(16);
        let dir_off = usize::try_from(u64_at(24))
            .map_err(|_| Error::corrupt("directory offset out of bounds"))?;
        let meta_end = data.len() - FOOTER_LEN;
        if dir_off < HEADER_LEN
            || dir_off > meta_end
            || objects.checked_mul(DIR_ENTRY_LEN) != Some(meta_end - dir_off)
        {
            return Err(Error::corrupt("directory out of bounds"));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..HEADER_LEN]);
        hasher.update(&data[dir_off..meta_end]);
        if hasher.finalize() != u32_at(meta_end) {
            return Err(Error::corrupt("bitmap index metadata CRC mismatch"));
        }
        let mut dir: Vec<DirEntry> = Vec::with_capacity(objects);
        for i in 0..objects {
            let off = dir_off + i * DIR_ENTRY_LEN;
            let e = DirEntry::parse(&data[off..off + DIR_ENTRY_LEN])
                .ok_or_else(|| Error::corrupt("directory parse failed"))?;
            let end = e.off.checked_add(e.len as u64);
            if e.off < HEADER_LEN as u64 || end.map_or(true, |end| end > dir_off as u64) {
                return Err(Error::corrupt(format!("bitmap {} out of bounds", i)));
            }
            if let Some(prev) = dir.last() {
                if prev.object >= e.object || prev.before >= e.before {
                    return Err(Error::corrupt("directory not ascending"));
                }
            }
            dir.push(e);
        }
        if dir.last().is_some_and(|e| e.before >= entries) {
            return Err(Error::corrupt("entry count does not match directory"));
        }
        let bitmaps = (0..objects).map(|_| OnceLock::new()).collect();
        Ok(BitmapIndex {
            mmap,
            dir,
            bitmaps,
            entries,
        })
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn object_count(&self) -> usize {
        self.dir.len()
    }

    /// Object ranks, ascending.
    pub fn objects(&self) -> impl Iterator<Item = u64> + '_ {
        self.dir.iter().map(|e| e.object)
    }

    fn object_index(&self, object: u64) -> Option<usize> {
        self.dir.binary_search_by(|e| e.object.cmp(&object)).ok()
    }

    fn expected_len(&self, idx: usize) -> u64 {
        let end = self.dir.get(idx + 1).map_or(self.entries, |e| e.before);
        end - self.dir[idx].before
    }

    /// Subject bitmap of the `idx`-th object.
    pub fn bitmap(&self, idx: usize) -> Result<&RoaringTreemap> {
        let cell = self
            .bitmaps
            .get(idx)
            .ok_or_else(|| Error::corrupt(format!("object index {} out of range", idx)))?;
        if let Some(b) = cell.get() {
            return Ok(b);
        }
        let e = self.dir[idx];
        let block = &self.mmap[e.off as usize..(e.off + e.len as u64) as usize];
        if crc32fast::hash(block) != e.crc32 {
            return Err(Error::corrupt(format!("bitmap {} CRC mismatch", idx)));
        }
        let bm = RoaringTreemap::deserialize_from(block)
            .map_err(|err| Error::corrupt(format!("bitmap {}: {}", idx, err)))?;
        if bm.len() != self.expected_len(idx) {
            return Err(Error::corrupt(format!("bitmap {} length mismatch", idx)));
        }
        // a concurrent reader may have won; both decoded the same bytes
        let _ = cell.set(bm);
        cell.get()
            .ok_or_else(|| Error::invariant("bitmap cell empty after set"))
    }

    /// Position of `(subject, object)` if present.
    pub fn contains(&self, subject: u64, object: u64) -> Result<Option<u64>> {
        let Some(idx) = self.object_index(object) else {
            return Ok(None);
        };
        let bm = self.bitmap(idx)?;
        if !bm.contains(subject) {
            return Ok(None);
        }
        Ok(Some(self.dir[idx].before + bm.rank(subject) - 1))
    }

    pub fn scan(&self, subject: Option<u64>, object: Option<u64>) -> Result<Scan<'_>> {
        match (subject, object) {
            (Some(s), Some(o)) => {
                let hit = self.contains(s, o)?.map(|position| {
                    Ok(Adjacent {
                        position,
                        subject: s,
                        object: o,
                    })
                });
                Ok(Box::new(hit.into_iter()))
            }
            (None, Some(o)) => match self.object_index(o) {
                None => Ok(Box::new(std::iter::empty())),
                Some(idx) => Ok(Box::new(ObjectStream::new(self, idx)?)),
            },
            (Some(s), None) => Ok(Box::new((0..self.dir.len()).filter_map(move |idx| {
                let bm = match self.bitmap(idx) {
                    Ok(bm) => bm,
                    Err(e) => return Some(Err(e)),
                };
                bm.contains(s).then(|| {
                    Ok(Adjacent {
                        position: self.dir[idx].before + bm.rank(s) - 1,
                        subject: s,
                        object: self.dir[idx].object,
                    })
                })
            }))),
            (None, None) => {
                let mut streams = Vec::with_capacity(self.dir.len());
                for idx in 0..self.dir.len() {
                    streams.push(Peeked::new(ObjectStream::new(self, idx)?)?);
                }
                let cmp: fn(&Adjacent, &Adjacent) -> Ordering =
                    |a, b| (a.subject, a.object).cmp(&(b.subject, b.object));
                let mut merge = KWayMerge::new(streams, cmp);
                Ok(Box::new(std::iter::from_fn(move || {
                    merge.next_record().transpose()
                })))
            }
        }
    }
}

/// Entries of one object in subject order.
struct ObjectStream<'a> {
    subjects: Box<dyn Iterator<Item = u64> + 'a>,
    object: u64,
    next_position: u64,
}

impl<'a> ObjectStream<'a> {
    fn new(index: &'a BitmapIndex, idx: usize) -> Result<Self> {
        let bm = index.bitmap(idx)?;
        Ok(ObjectStream {
            subjects: Box::new(bm.iter()),
            object: index.dir[idx].object,
            next_position: index.dir[idx].before,
        })
    }
}

impl Iterator for ObjectStream<'_> {
    type Item = Result<Adjacent>;

    fn next(&mut self) -> Option<Self::Item> {
        let subject = self.subjects.next()?;
        let position = self.next_position;
        self.next_position += 1;
        Some(Ok(Adjacent {
            position,
            subject,
            object: self.object,
        }))
    }
}
