use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::header::{write_footer, Header, Section, TocEntry, HEADER_LEN, MAGIC, VERSION};
use super::pool::CompressTask;
use super::{SectionOptions, SectionStoreInfo};
use crate::codec::varint::encode_front_coded;
use crate::error::{Error, Result};

/// Streams ascending elements into a section store file.
///
/// Sections are encoded on the rayon pool while later sections fill up; they
/// are appended strictly in order. The file is written under a temporary name
/// and renamed into place by [`SectionWriter::finish`].
pub struct SectionWriter {
    path: PathBuf,
    tmp: PathBuf,
    out: BufWriter<File>,
    opts: SectionOptions,
    current: Vec<Vec<u8>>,
    pending: VecDeque<(Arc<CompressTask>, Vec<u8>)>,
    toc: Vec<TocEntry>,
    firsts: Vec<u8>,
    offset: u64,
    count: u64,
    last: Option<Vec<u8>>,
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl SectionWriter {
    pub fn create<P: Into<PathBuf>>(path: P, opts: SectionOptions) -> Result<Self> {
        if opts.capacity == 0 {
            return Err(Error::Invalid("section capacity must be positive"));
        }
        let path = path.into();
        let tmp = tmp_path(&path);
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(&[0u8; HEADER_LEN])?;
        Ok(SectionWriter {
            path,
            tmp,
            out,
            current: Vec::with_capacity(opts.capacity as usize),
            opts,
            pending: VecDeque::new(),
            toc: Vec::new(),
            firsts: Vec::new(),
            offset: HEADER_LEN as u64,
            count: 0,
            last: None,
        })
    }

    /// Append the next element; elements must be strictly ascending.
    pub fn push(&mut self, element: &[u8]) -> Result<()> {
        if let Some(last) = &self.last {
            if last.as_slice() >= element {
                return Err(Error::invariant(format!(
                    "section input not strictly ascending at element {} of {}",
                    self.count,
                    self.path.display()
                )));
            }
        }
        self.last = Some(element.to_vec());
        self.current.push(element.to_vec());
        self.count += 1;
        if self.current.len() == self.opts.capacity as usize {
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
        if self.current.is_empty() {
            return Ok(());
        }
        let elements = std::mem::take(&mut self.current);
        let mut raw = Vec::new();
        encode_front_coded(elements.iter().map(|e| e.as_slice()), elements.len(), &mut raw);
        let first = elements.into_iter().next().unwrap_or_default();
        let level = self.opts.compress.then_some(self.opts.zstd_level);
        self.pending
            .push_back((CompressTask::spawn(raw, level), first));
        self.current = Vec::with_capacity(self.opts.capacity as usize);
        while self.pending.len() > self.opts.max_pending.max(1) {
            self.flush_one()?;
        }
        Ok(())
    }

    fn flush_one(&mut self) -> Result<()> {
        let Some((task, first)) = self.pending.pop_front() else {
            return Ok(());
        };
        let block = task.wait()?;
        let first_len = u32::try_from(first.len())
            .map_err(|_| Error::Invalid("section element too large"))?;
        self.toc.push(TocEntry {
            section: Section {
                off: self.offset,
                len: block.len() as u64,
            },
            crc32: crc32fast::hash(&block),
            first_off: self.firsts.len() as u64,
            first_len,
        });
        self.firsts.extend_from_slice(&first);
        self.out.write_all(&block)?;
        self.offset += block.len() as u64;
        Ok(())
    }

    /// Flush remaining sections, write TOC, firsts and footer, then move the
    /// file into place.
    pub fn finish(mut self) -> Result<SectionStoreInfo> {
        self.seal()?;
        while !self.pending.is_empty() {
            self.flush_one()?;
        }
        let section_count = u32::try_from(self.toc.len())
            .map_err(|_| Error::Invalid("too many sections"))?;
        let header = Header {
            magic: *MAGIC,
            version: VERSION,
            flags: self.opts.compress as u8,
            payload_tag: self.opts.payload_tag,
            capacity: self.opts.capacity,
            section_count,
            element_count: self.count,
            toc_off: self.offset,
        };
        let mut head = [0u8; HEADER_LEN];
        header.write(&mut head);

        let mut meta = Vec::with_capacity(self.toc.len() * 32 + self.firsts.len());
        for e in &self.toc {
            e.write(&mut meta);
        }
        meta.extend_from_slice(&self.firsts);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(&meta);
        let mut footer = Vec::with_capacity(16);
        write_footer(hasher.finalize(), &mut footer);

        self.out.write_all(&meta)?;
        self.out.write_all(&footer)?;
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&head)?;
        self.out.flush()?;
        let bytes = self.offset + meta.len() as u64 + footer.len() as u64;
        drop(self.out);
        fs::rename(&self.tmp, &self.path)?;
        debug!(
            "wrote {} ({} elements, {} sections, {} bytes)",
            self.path.display(),
            self.count,
            section_count,
            bytes
        );
        Ok(SectionStoreInfo {
            element_count: self.count,
            section_count,
            bytes,
        })
    }
}
