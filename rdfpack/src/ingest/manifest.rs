use std::fs;
use std::path::{Path, PathBuf};

use oxigraph::model::NamedNode;

use crate::error::{Error, Result};

/// One input file and the graph its default-graph quads belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub graph: String,
}

/// List of inputs for one ingestion run.
///
/// One entry per line: a path, whitespace, then a graph IRI (optionally in
/// angle brackets). Blank lines and lines starting with `#` are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// Accept `<iri>` or a bare absolute IRI; anything else is not a graph name.
pub(crate) fn parse_graph_iri(raw: &str) -> Result<String> {
    let iri = raw
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .unwrap_or(raw);
    if iri.starts_with("_:") {
        return Err(Error::NonIriGraph(raw.to_string()));
    }
    NamedNode::new(iri)
        .map(|n| n.into_string())
        .map_err(|_| Error::NonIriGraph(raw.to_string()))
}

impl Manifest {
    /// Parse manifest text. Relative paths are resolved against `base`.
    pub fn parse(text: &str, base: Option<&Path>) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(path), Some(graph), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(Error::Manifest {
                    line: line_no,
                    reason: "expected '<path> <graph-iri>'".to_string(),
                });
            };
            let graph = parse_graph_iri(graph)?;
            let path = PathBuf::from(path);
            let path = match base {
                Some(base) if path.is_relative() => base.join(path),
                _ => path,
            };
            entries.push(ManifestEntry { path, graph });
        }
        Ok(Manifest { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text, path.parent())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct graph IRIs in first-seen order.
    pub fn graphs(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.graph.as_str()))
            .map(|e| e.graph.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_skips_comments() {
        let text = "# inputs\n\n data/a.ttl  <http://ex/g1>\n/abs/b.nq\thttp://ex/g2\nc.nt http://ex/g1\n";
        let m = Manifest::parse(text, Some(Path::new("/base"))).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.entries[0].path, PathBuf::from("/base/data/a.ttl"));
        assert_eq!(m.entries[0].graph, "http://ex/g1");
        assert_eq!(m.entries[1].path, PathBuf::from("/abs/b.nq"));
        assert_eq!(m.graphs(), vec!["http://ex/g1", "http://ex/g2"]);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = Manifest::parse("a.ttl http://ex/g\nlonely\n", None).unwrap_err();
        assert!(matches!(err, Error::Manifest { line: 2, .. }));
        assert_eq!(err.exit_code(), 2);
        let err = Manifest::parse("a.ttl http://ex/g extra\n", None).unwrap_err();
        assert!(matches!(err, Error::Manifest { line: 1, .. }));
    }

    #[test]
    fn non_iri_graph_is_rejected() {
        for bad in ["_:g", "notaniri", "relative/path"] {
            let text = format!("a.ttl {}\n", bad);
            let err = Manifest::parse(&text, None).unwrap_err();
            assert!(matches!(err, Error::NonIriGraph(_)), "{}", bad);
            assert_eq!(err.exit_code(), 4);
        }
    }
}
