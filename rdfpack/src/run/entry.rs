use std::cmp::Ordering;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::{RunSink, RunSource, TempCompression};
use crate::codec::varint::push_uvarint;
use crate::error::{Error, Result};

/// One (subject, object) pair with the graphs it was seen in.
///
/// `graphs` holds ascending, distinct temporary graph ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub subject: Vec<u8>,
    pub object: Vec<u8>,
    pub graphs: Vec<u32>,
}

impl RunEntry {
    pub fn new(subject: Vec<u8>, object: Vec<u8>, graph: u32) -> Self {
        RunEntry {
            subject,
            object,
            graphs: vec![graph],
        }
    }

    /// Order by (subject, object); graphs do not take part.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        self.subject
            .cmp(&other.subject)
            .then_with(|| self.object.cmp(&other.object))
    }

    pub fn same_key(&self, other: &Self) -> bool {
        self.subject == other.subject && self.object == other.object
    }

    /// Union `other`'s graphs into this entry's graph set.
    pub fn absorb_graphs(&mut self, other: &[u32]) {
        if other.iter().all(|g| self.graphs.binary_search(g).is_ok()) {
            return;
        }
        self.graphs.extend_from_slice(other);
        self.graphs.sort_unstable();
        self.graphs.dedup();
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        push_uvarint(self.subject.len() as u64, out);
        out.extend_from_slice(&self.subject);
        push_uvarint(self.object.len() as u64, out);
        out.extend_from_slice(&self.object);
        push_uvarint(self.graphs.len() as u64, out);
        let mut prev = 0u32;
        for (i, &g) in self.graphs.iter().enumerate() {
            let delta = if i == 0 { g } else { g - prev };
            push_uvarint(delta as u64, out);
            prev = g;
        }
    }
}

/// Read one varint from a stream; `Ok(None)` on a clean end of stream.
fn read_stream_uvarint<R: Read>(r: &mut R) -> io::Result<Option<u64>> {
    let (mut x, mut s) = (0u64, 0u32);
    let mut byte = [0u8; 1];
    for i in 0..10 {
        if r.read(&mut byte)? == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let b = byte[0] as u64;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Ok(Some(x));
        }
        s += 7;
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"))
}

fn require_uvarint<R: Read>(r: &mut R) -> io::Result<u64> {
    read_stream_uvarint(r)?.ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
}

fn read_bytes<R: Read>(r: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length overflow"))?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_error(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            Error::corrupt(format!("{}: {}", path.display(), e))
        }
        _ => Error::Io(e),
    }
}

/// Appends encoded entries to a run file.
pub struct RunWriter {
    path: PathBuf,
    sink: RunSink,
    buf: Vec<u8>,
    bytes: u64,
    entries: u64,
}

impl RunWriter {
    pub fn create(path: &Path, compression: TempCompression, level: i32) -> Result<Self> {
        Ok(RunWriter {
            path: path.to_path_buf(),
            sink: compression.open_sink(path, level)?,
            buf: Vec::with_capacity(256),
            bytes: 0,
            entries: 0,
        })
    }

    pub fn write(&mut self, entry: &RunEntry) -> Result<()> {
        self.buf.clear();
        entry.encode(&mut self.buf);
        self.sink.write_all(&self.buf)?;
        self.bytes += self.buf.len() as u64;
        self.entries += 1;
        Ok(())
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(self) -> Result<PathBuf> {
        self.sink.finish()?;
        Ok(self.path)
    }
}

/// Reads entries back from a run file.
pub struct RunReader {
    path: PathBuf,
    source: BufReader<RunSource>,
}

impl RunReader {
    pub fn open(path: &Path, compression: TempCompression) -> Result<Self> {
        Ok(RunReader {
            path: path.to_path_buf(),
            source: BufReader::new(compression.open_source(path)?),
        })
    }

    pub fn next_entry(&mut self) -> Result<Option<RunEntry>> {
        self.read_entry().map_err(|e| read_error(&self.path, e))
    }

    fn read_entry(&mut self) -> io::Result<Option<RunEntry>> {
        let r = &mut self.source;
        let Some(slen) = read_stream_uvarint(r)? else {
            return Ok(None);
        };
        let subject = read_bytes(r, slen)?;
        let olen = require_uvarint(r)?;
        let object = read_bytes(r, olen)?;
        let n = require_uvarint(r)?;
        let mut graphs = Vec::with_capacity(n.min(1024) as usize);
        let mut prev = 0u64;
        for i in 0..n {
            let delta = require_uvarint(r)?;
            if i > 0 && delta == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "graph ids not strictly ascending",
                ));
            }
            let g = prev + delta;
            let g32 = u32::try_from(g)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "graph id overflow"))?;
            graphs.push(g32);
            prev = g;
        }
        Ok(Some(RunEntry {
            subject,
            object,
            graphs,
        }))
    }
}

impl Iterator for RunReader {
    type Item = Result<RunEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Writes a list of byte strings, length-prefixed.
pub struct ValueListWriter {
    path: PathBuf,
    sink: RunSink,
    len_buf: Vec<u8>,
    count: u64,
    bytes: u64,
}

impl ValueListWriter {
    pub fn create(path: &Path, compression: TempCompression, level: i32) -> Result<Self> {
        Ok(ValueListWriter {
            path: path.to_path_buf(),
            sink: compression.open_sink(path, level)?,
            len_buf: Vec::with_capacity(10),
            count: 0,
            bytes: 0,
        })
    }

    pub fn write(&mut self, value: &[u8]) -> Result<()> {
        self.len_buf.clear();
        push_uvarint(value.len() as u64, &mut self.len_buf);
        self.sink.write_all(&self.len_buf)?;
        self.sink.write_all(value)?;
        self.count += 1;
        self.bytes += (self.len_buf.len() + value.len()) as u64;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> Result<PathBuf> {
        self.sink.finish()?;
        Ok(self.path)
    }
}

/// Reads a list written by [`ValueListWriter`].
pub struct ValueListReader {
    path: PathBuf,
    source: BufReader<RunSource>,
}

impl ValueListReader {
    pub fn open(path: &Path, compression: TempCompression) -> Result<Self> {
        Ok(ValueListReader {
            path: path.to_path_buf(),
            source: BufReader::new(compression.open_source(path)?),
        })
    }

    pub fn next_value(&mut self) -> Result<Option<Vec<u8>>> {
        let r = &mut self.source;
        let res = match read_stream_uvarint(r) {
            Ok(Some(len)) => read_bytes(r, len).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        res.map_err(|e| read_error(&self.path, e))
    }
}

impl Iterator for ValueListReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }
}
