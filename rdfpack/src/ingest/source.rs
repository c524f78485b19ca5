//! Quad sources. Parsing is delegated to oxigraph; a `.zst` suffix on any
//! supported extension means the file is zstd-compressed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::debug;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{GraphName, NamedOrBlankNode};

use super::Quad;
use crate::codec::Term;
use crate::error::{Error, Result};

/// Anything that can stream quads out of one input.
pub trait QuadSource {
    fn path(&self) -> &Path;

    /// Hand every quad to `sink`. Returns the number of quads read.
    fn read_quads(&mut self, sink: &mut dyn FnMut(Quad) -> Result<()>) -> Result<u64>;
}

fn format_for_extension(ext: &str) -> Option<RdfFormat> {
    match ext.to_ascii_lowercase().as_str() {
        "nq" | "nquads" => Some(RdfFormat::NQuads),
        "nt" | "ntriples" => Some(RdfFormat::NTriples),
        "ttl" | "turtle" => Some(RdfFormat::Turtle),
        "trig" => Some(RdfFormat::TriG),
        "rdf" | "xml" | "rdfxml" | "owl" => Some(RdfFormat::RdfXml),
        "n3" => Some(RdfFormat::N3),
        _ => None,
    }
}

/// Parser choice for `path`, and whether it is zstd-compressed.
pub fn detect_format(path: &Path) -> Result<(RdfFormat, bool)> {
    let unknown = || Error::UnknownFormat(path.to_path_buf());
    let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(unknown)?;
    if ext.eq_ignore_ascii_case("zst") {
        let inner = path
            .file_stem()
            .map(Path::new)
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .ok_or_else(unknown)?;
        let format = format_for_extension(inner).ok_or_else(unknown)?;
        return Ok((format, true));
    }
    Ok((format_for_extension(ext).ok_or_else(unknown)?, false))
}

/// Reads one RDF file with oxigraph's parsers.
///
/// Default-graph quads go to the manifest graph; named graphs inside dataset
/// files override it. Blank node labels are prefixed with `scope` so labels
/// from different files never collide.
#[derive(Debug, Clone)]
pub struct OxigraphSource {
    path: PathBuf,
    format: RdfFormat,
    compressed: bool,
    graph: String,
    scope: String,
}

impl OxigraphSource {
    pub fn open(path: &Path, graph: &str, scope: &str) -> Result<Self> {
        let (format, compressed) = detect_format(path)?;
        Ok(OxigraphSource {
            path: path.to_path_buf(),
            format,
            compressed,
            graph: graph.to_string(),
            scope: scope.to_string(),
        })
    }

    pub fn format(&self) -> RdfFormat {
        self.format
    }

    fn parse_error(&self, reason: impl ToString) -> Error {
        Error::Parse {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn reader(&self) -> Result<Box<dyn BufRead>> {
        let file = File::open(&self.path).map_err(|e| self.parse_error(e))?;
        if self.compressed {
            let decoder = zstd::Decoder::new(file).map_err(|e| self.parse_error(e))?;
            Ok(Box::new(BufReader::new(decoder)))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }

    fn node(&self, n: NamedOrBlankNode) -> Term {
        match n {
            NamedOrBlankNode::NamedNode(n) => Term::Iri(n.into_string()),
            NamedOrBlankNode::BlankNode(b) => self.blank(b.as_str()),
        }
    }

    fn blank(&self, label: &str) -> Term {
        Term::BNode(format!("_:{}_{}", self.scope, label))
    }

    fn object(&self, t: oxigraph::model::Term) -> Result<Term> {
        use oxigraph::model::Term as Ox;
        Ok(match t {
            Ox::NamedNode(n) => Term::Iri(n.into_string()),
            Ox::BlankNode(b) => self.blank(b.as_str()),
            Ox::Literal(l) => {
                let lex = l.value().to_string();
                match l.language() {
                    Some(lang) => Term::Literal {
                        lex,
                        dt: None,
                        lang: Some(lang.to_string()),
                    },
                    None => Term::Literal {
                        lex,
                        dt: Some(l.datatype().as_str().to_string()),
                        lang: None,
                    },
                }
            }
            #[allow(unreachable_patterns)]
            _ => return Err(self.parse_error("quoted triples are not supported")),
        })
    }
}

impl QuadSource for OxigraphSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_quads(&mut self, sink: &mut dyn FnMut(Quad) -> Result<()>) -> Result<u64> {
        let parser = RdfParser::from_format(self.format).for_reader(self.reader()?);
        let mut n = 0u64;
        for q in parser {
            let q = q.map_err(|e| self.parse_error(e))?;
            let graph = match q.graph_name {
                GraphName::DefaultGraph => self.graph.clone(),
                GraphName::NamedNode(g) => g.into_string(),
                GraphName::BlankNode(b) => {
                    return Err(Error::NonIriGraph(format!("_:{}", b.as_str())))
                }
            };
            sink(Quad {
                subject: self.node(q.subject),
                predicate: q.predicate.into_string(),
                object: self.object(q.object)?,
                graph,
            })?;
            n += 1;
        }
        debug!("read {} quads from {}", n, self.path.display());
        Ok(n)
    }
}
