//! Ingestion: manifests, quad sources, and the staged coordinator that turns
//! a set of input files into a corpus directory.

mod coordinator;
mod manifest;
mod source;
mod staging;

pub use coordinator::{IngestReport, Ingestor, Stage, GRAPHS, INGEST_DIR, IRIS, PREDICATES};

pub(crate) use coordinator::read_lines;
pub use manifest::{Manifest, ManifestEntry};
pub use source::{detect_format, OxigraphSource, QuadSource};

use crate::codec::Term;

/// One parsed statement. `graph` is always an IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quad {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub graph: String,
}
