//! Write-once, read-many storage for large RDF quad corpora.
//!
//! A corpus is built in one batch run from a manifest of input files. Every
//! value is dictionary-encoded once into sorted, sectioned, memory-mappable
//! files, and every (predicate, subject kind, object kind) bucket is compacted
//! into a subject→object adjacency index with per-graph membership bitmaps.
//! After that, all access is read-only random lookup.
//!
//! Build a corpus
//!
//! ```no_run
//! use rdfpack::{IngestConfig, Ingestor, Manifest};
//! use std::path::Path;
//!
//! let manifest = Manifest::from_file(Path::new("inputs.manifest")).expect("manifest");
//! let config = IngestConfig::default();
//! Ingestor::new(Path::new("corpus"), config)
//!     .run(&manifest, 1)
//!     .expect("ingest");
//! ```
//!
//! Query it
//!
//! ```no_run
//! use rdfpack::{Corpus, QuadIndex, Term};
//! use std::path::Path;
//!
//! let corpus = Corpus::open(Path::new("corpus")).expect("open");
//! let rdf_type = Term::iri("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
//! let bag = Term::iri("http://example.org/Bag");
//! let hits = corpus.lookup_adjacency(&rdf_type, None, Some(&bag), None).expect("lookup");
//! for pair in hits.iter() {
//!     let (s, o) = pair.expect("corpus is consistent");
//!     println!("{} {}", s, o);
//! }
//! ```

pub mod adjacency;
pub mod bucket;
pub mod codec;
pub mod config;
pub mod corpus;
pub mod dictionary;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod run;
pub mod section;
pub mod task;

pub use codec::{Kind, LiteralGroup, Term, ValueCodec, XsdDatatype};
pub use config::{IngestConfig, IngestConfigBuilder};
pub use corpus::{Corpus, Lookup, QuadIndex};
pub use dictionary::Dictionary;
pub use error::{Error, Result};
pub use ingest::{IngestReport, Ingestor, Manifest, Quad, Stage};
pub use run::TempCompression;
pub use section::{SectionCache, SectionStore, SectionWriter};
