//! Error type shared by the ingestion pipeline and the read path.

use std::path::PathBuf;

/// Errors raised while building or reading a corpus.
///
/// Read-path callers see "value not found" as `Ok(None)`; any `Err` coming back
/// from a lookup means the files on disk are inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Structural problem with inputs or an unsupported feature.
    #[error("{0}")]
    Invalid(&'static str),
    /// A file failed an integrity or bounds check (corpus inconsistency).
    #[error("corpus inconsistency: {0}")]
    Corrupt(String),
    /// An internal invariant did not hold; this is a defect.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// A manifest line could not be understood.
    #[error("manifest line {line}: {reason}")]
    Manifest { line: usize, reason: String },
    /// No parser is known for this input.
    #[error("unrecognized input format: {}", .0.display())]
    UnknownFormat(PathBuf),
    /// A graph name was a blank node or otherwise not an IRI.
    #[error("graph term is not an IRI: {0}")]
    NonIriGraph(String),
    /// One input failed to parse or decompress.
    #[error("failed to read {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },
    /// Resume requested from a stage whose predecessors never completed.
    #[error("cannot resume: {0}")]
    Resume(String),
    /// Configuration could not be loaded or is out of range.
    #[error("configuration: {0}")]
    Config(String),
}

impl Error {
    /// Process exit code for this failure category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Manifest { .. } => 2,
            Error::UnknownFormat(_) => 3,
            Error::NonIriGraph(_) => 4,
            Error::Resume(_) => 5,
            Error::Invariant(_) | Error::Corrupt(_) => 6,
            Error::Io(_)
            | Error::Invalid(_)
            | Error::Parse { .. }
            | Error::Config(_) => 1,
        }
    }

    /// True for failures that must abort the whole ingestion run, as opposed to
    /// per-input problems that only skip one file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Parse { .. })
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
