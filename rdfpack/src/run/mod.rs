//! Intermediate run files written during ingestion.
//!
//! Every temp file goes through one "open sink / open source" seam so the
//! byte-stream codec can be chosen per run.

mod entry;

pub use entry::{RunEntry, RunReader, RunWriter, ValueListReader, ValueListWriter};

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Compression applied to intermediate run files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TempCompression {
    #[default]
    None,
    Zstd,
}

impl std::str::FromStr for TempCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TempCompression::None),
            "zstd" => Ok(TempCompression::Zstd),
            other => Err(format!("unknown temp compression '{}'", other)),
        }
    }
}

impl TempCompression {
    pub fn open_sink(self, path: &Path, level: i32) -> io::Result<RunSink> {
        let file = BufWriter::new(File::create(path)?);
        Ok(match self {
            TempCompression::None => RunSink::Plain(file),
            TempCompression::Zstd => RunSink::Zstd(zstd::Encoder::new(file, level)?),
        })
    }

    pub fn open_source(self, path: &Path) -> io::Result<RunSource> {
        let file = File::open(path)?;
        Ok(match self {
            TempCompression::None => RunSource::Plain(BufReader::new(file)),
            TempCompression::Zstd => RunSource::Zstd(zstd::Decoder::new(file)?),
        })
    }
}

/// Compression choice plus level, passed to everything that writes temp files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TempCodec {
    pub compression: TempCompression,
    pub level: i32,
}

impl TempCodec {
    pub fn new(compression: TempCompression, level: i32) -> Self {
        TempCodec { compression, level }
    }

    pub fn run_writer(self, path: &Path) -> crate::Result<RunWriter> {
        RunWriter::create(path, self.compression, self.level)
    }

    pub fn run_reader(self, path: &Path) -> crate::Result<RunReader> {
        RunReader::open(path, self.compression)
    }

    pub fn list_writer(self, path: &Path) -> crate::Result<ValueListWriter> {
        ValueListWriter::create(path, self.compression, self.level)
    }

    pub fn list_reader(self, path: &Path) -> crate::Result<ValueListReader> {
        ValueListReader::open(path, self.compression)
    }
}

pub enum RunSink {
    Plain(BufWriter<File>),
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

impl Write for RunSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RunSink::Plain(w) => w.write(buf),
            RunSink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RunSink::Plain(w) => w.flush(),
            RunSink::Zstd(w) => w.flush(),
        }
    }
}

impl RunSink {
    /// Flush buffered data and, for zstd, write the end of the frame.
    pub fn finish(self) -> io::Result<()> {
        match self {
            RunSink::Plain(mut w) => w.flush(),
            RunSink::Zstd(w) => w.finish()?.flush(),
        }
    }
}

pub enum RunSource {
    Plain(BufReader<File>),
    Zstd(zstd::Decoder<'static, BufReader<File>>),
}

impl Read for RunSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RunSource::Plain(r) => r.read(buf),
            RunSource::Zstd(r) => r.read(buf),
        }
    }
}
