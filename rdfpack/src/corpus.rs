//! Read path over a finished corpus directory.
//!
//! [`Corpus`] opens every dictionary, adjacency file and graph file of a
//! corpus and answers lookups through the [`QuadIndex`] trait, which is the
//! only surface a query engine adapter needs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::adjacency::{AdjacencyIndex, Encoding, GraphMap};
use crate::bucket::{BucketKey, ObjectKind};
use crate::codec::{Kind, LiteralGroup, Term};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::ingest::{read_lines, GRAPHS, INGEST_DIR, IRIS, PREDICATES};
use crate::section::SectionCache;

/// Default byte budget of the section cache of an opened corpus.
pub const DEFAULT_CACHE_BUDGET: u64 = 256 * 1024 * 1024;

/// Lookups over a read-only quad corpus.
///
/// A value that is not in the corpus is `Ok(None)` or an empty result; an
/// `Err` always means the corpus files are inconsistent.
pub trait QuadIndex {
    /// Every (subject, object) pair stored under `predicate`, restricted to
    /// the bound subject, object and graphs. `None` leaves a position unbound;
    /// `Some(&[])` for graphs matches nothing.
    fn lookup_adjacency(
        &self,
        predicate: &Term,
        subject: Option<&Term>,
        object: Option<&Term>,
        graphs: Option<&[Term]>,
    ) -> Result<Lookup<'_>>;

    /// Rank of `term` in the dictionary it belongs to.
    fn dictionary_rank(&self, term: &Term) -> Result<Option<u64>>;

    /// Object term of `bucket` with dictionary rank `rank`.
    fn value_of(&self, bucket: &BucketKey, rank: u64) -> Result<Term>;

    /// IRI or blank node with rank `rank` in the `iris` dictionary.
    fn iri_of(&self, rank: u64) -> Result<Term>;

    /// Number of (subject, object) entries stored under `predicate`.
    fn predicate_cardinality(&self, predicate: &Term) -> Result<u64>;

    /// Number of those entries that belong to `graph`.
    fn graph_cardinality(&self, predicate: &Term, graph: &Term) -> Result<u64>;
}

/// One compacted bucket: its adjacency index and graph bitmaps.
#[derive(Debug)]
pub struct BucketIndex {
    key: BucketKey,
    path: PathBuf,
    index: AdjacencyIndex,
    graphs: GraphMap,
}

impl BucketIndex {
    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> Encoding {
        self.index.encoding()
    }

    pub fn index(&self) -> &AdjacencyIndex {
        &self.index
    }

    pub fn graphs(&self) -> &GraphMap {
        &self.graphs
    }

    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// An opened corpus directory.
#[derive(Debug)]
pub struct Corpus {
    root: PathBuf,
    iris: Dictionary,
    literals: BTreeMap<LiteralGroup, Dictionary>,
    predicates: Vec<String>,
    predicate_ids: HashMap<String, u32>,
    graphs: Vec<String>,
    buckets: BTreeMap<BucketKey, BucketIndex>,
}

impl Corpus {
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_cache(root, SectionCache::new(DEFAULT_CACHE_BUDGET))
    }

    pub fn open_with_cache(root: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        if root.join(INGEST_DIR).exists() {
            return Err(Error::corrupt(format!(
                "{}: ingestion did not finish",
                root.display()
            )));
        }
        let iris = Dictionary::open(&root.join(IRIS), cache.clone())?;
        let predicates = read_lines(&root.join(PREDICATES))?;
        let graphs = read_lines(&root.join(GRAPHS))?;
        let predicate_ids = predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as u32))
            .collect();

        let mut literals = BTreeMap::new();
        let mut buckets = BTreeMap::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(group) = LiteralGroup::from_file_name(name) {
                literals.insert(group, Dictionary::open(&entry.path(), cache.clone())?);
            } else if let Some(n) = name.strip_prefix("pred_") {
                let predicate: u32 = n
                    .parse()
                    .map_err(|_| Error::corrupt(format!("bad predicate directory {}", name)))?;
                if predicate as usize >= predicates.len() {
                    return Err(Error::corrupt(format!(
                        "{} has no entry in the predicates file",
                        name
                    )));
                }
                load_predicate(&entry.path(), predicate, &cache, &mut buckets)?;
            }
        }

        for key in buckets.keys() {
            if let ObjectKind::Literal(group) = &key.object {
                if !literals.contains_key(group) {
                    return Err(Error::corrupt(format!(
                        "no dictionary {} for bucket {:?}",
                        group.file_name(),
                        key
                    )));
                }
            }
        }
        info!(
            "opened corpus {} ({} buckets, {} literal dictionaries)",
            root.display(),
            buckets.len(),
            literals.len()
        );
        Ok(Corpus {
            root: root.to_path_buf(),
            iris,
            literals,
            predicates,
            predicate_ids,
            graphs,
            buckets,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iris(&self) -> &Dictionary {
        &self.iris
    }

    /// Literal dictionaries, keyed by group.
    pub fn literal_dictionaries(&self) -> impl Iterator<Item = (&LiteralGroup, &Dictionary)> {
        self.literals.iter()
    }

    /// Predicate IRIs, indexed by predicate id.
    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }

    /// Graph IRIs in first-seen order.
    pub fn graphs(&self) -> &[String] {
        &self.graphs
    }

    /// Buckets ordered by key.
    pub fn buckets(&self) -> impl Iterator<Item = &BucketIndex> {
        self.buckets.values()
    }

    fn predicate_id(&self, predicate: &Term) -> Option<u32> {
        match predicate {
            Term::Iri(iri) => self.predicate_ids.get(iri).copied(),
            _ => None,
        }
    }

    fn buckets_of(&self, predicate: u32) -> impl Iterator<Item = &BucketIndex> {
        self.buckets
            .values()
            .filter(move |b| b.key.predicate == predicate)
    }

    fn objects_dictionary(&self, object: &ObjectKind) -> Result<&Dictionary> {
        match object {
            ObjectKind::Iri | ObjectKind::BNode => Ok(&self.iris),
            ObjectKind::Literal(group) => self.literals.get(group).ok_or_else(|| {
                Error::corrupt(format!("no dictionary {}", group.file_name()))
            }),
        }
    }

    fn node_rank(&self, term: &Term) -> Result<Option<u64>> {
        match term.node_bytes() {
            Some(bytes) => self.iris.position_of(&bytes),
            None => Ok(None),
        }
    }
}

fn load_predicate(
    dir: &Path,
    predicate: u32,
    cache: &Arc<SectionCache>,
    buckets: &mut BTreeMap<BucketKey, BucketIndex>,
) -> Result<()> {
    for kind_entry in fs::read_dir(dir)? {
        let kind_entry = kind_entry?;
        let kind = kind_entry
            .file_name()
            .to_str()
            .and_then(Kind::from_dir_name)
            .filter(|k| *k != Kind::Literal)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "unexpected subject directory {}",
                    kind_entry.path().display()
                ))
            })?;
        let kind_dir = kind_entry.path();
        for file in fs::read_dir(&kind_dir)? {
            let path = file?.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if Encoding::from_extension(ext).is_none() {
                continue;
            }
            let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_owned)
            else {
                continue;
            };
            let object = ObjectKind::from_file_name(&name).ok_or_else(|| {
                Error::corrupt(format!("unexpected adjacency file {}", path.display()))
            })?;
            let key = BucketKey {
                predicate,
                subject_kind: kind,
                object,
            };
            let index = AdjacencyIndex::open(&path, cache.clone())?;
            let graphs = GraphMap::load(&kind_dir, &name)?;
            debug!(
                "loaded {} ({} entries, {} graphs)",
                path.display(),
                index.len(),
                graphs.len()
            );
            let bucket = BucketIndex {
                key: key.clone(),
                path,
                index,
                graphs,
            };
            if buckets.insert(key, bucket).is_some() {
                return Err(Error::corrupt(format!(
                    "two adjacency files for bucket {} in {}",
                    name,
                    kind_dir.display()
                )));
            }
        }
    }
    Ok(())
}

/// A bucket scan with bound ranks.
#[derive(Debug)]
struct Plan<'a> {
    bucket: &'a BucketIndex,
    objects: &'a Dictionary,
    iris: &'a Dictionary,
    subject: Option<u64>,
    object: Option<u64>,
    graphs: Option<Vec<u64>>,
}

impl Plan<'_> {
    fn subject_term(&self, rank: u64) -> Result<Term> {
        node_term(self.iris, rank)
    }

    fn object_term(&self, rank: u64) -> Result<Term> {
        match &self.bucket.key.object {
            ObjectKind::Literal(group) => Ok(group.literal(self.objects.lex_of(rank)?)),
            _ => node_term(self.objects, rank),
        }
    }

    fn pairs(&self) -> Box<dyn Iterator<Item = Result<(Term, Term)>> + '_> {
        let scan = match self.bucket.index.scan(self.subject, self.object) {
            Ok(scan) => scan,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        Box::new(scan.filter_map(move |hit| {
            let hit = match hit {
                Ok(hit) => hit,
                Err(e) => return Some(Err(e)),
            };
            if let Some(graphs) = &self.graphs {
                if !self.bucket.graphs.in_any(hit.position, graphs) {
                    return None;
                }
            }
            Some(
                self.subject_term(hit.subject)
                    .and_then(|s| Ok((s, self.object_term(hit.object)?))),
            )
        }))
    }
}

fn node_term(dict: &Dictionary, rank: u64) -> Result<Term> {
    let bytes = dict.value_of(rank)?;
    Term::from_node_bytes(&bytes)
        .ok_or_else(|| Error::corrupt(format!("rank {} is not a valid node", rank)))
}

/// Result of [`QuadIndex::lookup_adjacency`]. Every call to [`Lookup::iter`]
/// starts the scan over, so a lookup can be consumed any number of times.
#[derive(Debug, Default)]
pub struct Lookup<'a> {
    plans: Vec<Plan<'a>>,
}

impl Lookup<'_> {
    /// Pairs ordered bucket by bucket, then by (subject rank, object rank).
    pub fn iter(&self) -> impl Iterator<Item = Result<(Term, Term)>> + '_ {
        self.plans.iter().flat_map(|p| p.pairs())
    }

    /// True when no bucket can contribute; a non-empty lookup may still
    /// yield nothing.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Number of buckets the lookup scans.
    pub fn buckets(&self) -> usize {
        self.plans.len()
    }

    pub fn collect_pairs(&self) -> Result<Vec<(Term, Term)>> {
        self.iter().collect()
    }
}

impl QuadIndex for Corpus {
    fn lookup_adjacency(
        &self,
        predicate: &Term,
        subject: Option<&Term>,
        object: Option<&Term>,
        graphs: Option<&[Term]>,
    ) -> Result<Lookup<'_>> {
        let none = Ok(Lookup::default());
        let Some(pid) = self.predicate_id(predicate) else {
            return none;
        };

        let subject_rank = match subject {
            Some(s) => match self.node_rank(s)? {
                Some(rank) => Some((s.kind(), rank)),
                None => return none,
            },
            None => None,
        };

        // which buckets an object term can live in, and its encoded bytes there
        let object_probe = match object {
            Some(o) => match o {
                Term::Iri(_) => Some((ObjectKind::Iri, o.node_bytes())),
                Term::BNode(_) => Some((ObjectKind::BNode, o.node_bytes())),
                Term::Literal { .. } => match o.literal_parts() {
                    Some((group, bytes)) => Some((ObjectKind::Literal(group), Some(bytes))),
                    None => return none,
                },
            },
            None => None,
        };

        let graph_ranks = match graphs {
            Some(gs) => {
                let mut ranks = Vec::with_capacity(gs.len());
                for g in gs {
                    if let Term::Iri(_) = g {
                        if let Some(rank) = self.node_rank(g)? {
                            ranks.push(rank);
                        }
                    }
                }
                if ranks.is_empty() {
                    return none;
                }
                Some(ranks)
            }
            None => None,
        };

        let mut plans = Vec::new();
        for bucket in self.buckets_of(pid) {
            if let Some((kind, _)) = subject_rank {
                if bucket.key.subject_kind != kind {
                    continue;
                }
            }
            let objects = self.objects_dictionary(&bucket.key.object)?;
            let object_rank = match &object_probe {
                Some((kind, bytes)) => {
                    if *kind != bucket.key.object {
                        continue;
                    }
                    let Some(bytes) = bytes else { continue };
                    match objects.position_of(bytes)? {
                        Some(rank) => Some(rank),
                        None => continue,
                    }
                }
                None => None,
            };
            plans.push(Plan {
                bucket,
                objects,
                iris: &self.iris,
                subject: subject_rank.map(|(_, r)| r),
                object: object_rank,
                graphs: graph_ranks.clone(),
            });
        }
        Ok(Lookup { plans })
    }

    fn dictionary_rank(&self, term: &Term) -> Result<Option<u64>> {
        match term {
            Term::Iri(_) | Term::BNode(_) => self.node_rank(term),
            Term::Literal { .. } => {
                let Some((group, bytes)) = term.literal_parts() else {
                    return Ok(None);
                };
                match self.literals.get(&group) {
                    Some(dict) => dict.position_of(&bytes),
                    None => Ok(None),
                }
            }
        }
    }

    fn value_of(&self, bucket: &BucketKey, rank: u64) -> Result<Term> {
        let dict = self.objects_dictionary(&bucket.object)?;
        match &bucket.object {
            ObjectKind::Literal(group) => Ok(group.literal(dict.lex_of(rank)?)),
            _ => node_term(dict, rank),
        }
    }

    fn iri_of(&self, rank: u64) -> Result<Term> {
        node_term(&self.iris, rank)
    }

    fn predicate_cardinality(&self, predicate: &Term) -> Result<u64> {
        Ok(match self.predicate_id(predicate) {
            Some(pid) => self.buckets_of(pid).map(|b| b.len()).sum(),
            None => 0,
        })
    }

    fn graph_cardinality(&self, predicate: &Term, graph: &Term) -> Result<u64> {
        let Some(pid) = self.predicate_id(predicate) else {
            return Ok(0);
        };
        let Some(rank) = self.node_rank(graph)? else {
            return Ok(0);
        };
        Ok(self
            .buckets_of(pid)
            .map(|b| b.graphs.cardinality(rank))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::XsdDatatype;
    use crate::config::IngestConfig;
    use crate::ingest::{Ingestor, Manifest, ManifestEntry};

    fn build(files: &[(&str, &str, &str)]) -> (tempfile::TempDir, Corpus) {
        let cfg = IngestConfig::builder()
            .section_capacity(4)
            .parse_concurrency(1)
            .build()
            .unwrap();
        let (dir, root) = build_with(files, cfg);
        let corpus = Corpus::open(&root).unwrap();
        (dir, corpus)
    }

    fn build_with(
        files: &[(&str, &str, &str)],
        cfg: IngestConfig,
    ) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = Vec::new();
        for (name, text, graph) in files {
            let path = dir.path().join(name);
            fs::write(&path, text).unwrap();
            entries.push(ManifestEntry {
                path,
                graph: graph.to_string(),
            });
        }
        let root = dir.path().join("corpus");
        Ingestor::new(&root, cfg)
            .run(&Manifest { entries }, 1)
            .unwrap();
        (dir, root)
    }

    #[test]
    fn literal_objects_resolve_through_their_dictionary() {
        let (_dir, corpus) = build(&[(
            "a.ttl",
            "@prefix ex: <http://ex/> .\nex:a ex:age 30 ; ex:name \"Ann\"@en .\nex:b ex:age 4 .\n",
            "http://ex/g",
        )]);
        let age = Term::iri("http://ex/age");
        let all = corpus
            .lookup_adjacency(&age, None, None, None)
            .unwrap()
            .collect_pairs()
            .unwrap();
        assert_eq!(
            all,
            vec![
                (Term::iri("http://ex/a"), Term::typed("30", XsdDatatype::Integer.iri())),
                (Term::iri("http://ex/b"), Term::typed("4", XsdDatatype::Integer.iri())),
            ]
        );
        let four = Term::typed("4", XsdDatatype::Integer.iri());
        assert_eq!(corpus.dictionary_rank(&four).unwrap(), Some(0));
        let hits = corpus
            .lookup_adjacency(&age, None, Some(&four), None)
            .unwrap()
            .collect_pairs()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(corpus.predicate_cardinality(&age).unwrap(), 2);

        let name = Term::iri("http://ex/name");
        let ann = corpus
            .lookup_adjacency(&name, Some(&Term::iri("http://ex/a")), None, None)
            .unwrap()
            .collect_pairs()
            .unwrap();
        assert_eq!(
            ann[0].1,
            Term::Literal {
                lex: "Ann".into(),
                dt: None,
                lang: Some("en".into())
            }
        );
    }

    #[test]
    fn unknown_terms_give_empty_lookups() {
        let (_dir, corpus) = build(&[(
            "a.nt",
            "<http://ex/a> <http://ex/p> <http://ex/b> .\n",
            "http://ex/g",
        )]);
        let p = Term::iri("http://ex/p");
        let missing = Term::iri("http://ex/missing");
        assert!(corpus.lookup_adjacency(&missing, None, None, None).unwrap().is_empty());
        assert!(corpus
            .lookup_adjacency(&p, Some(&missing), None, None)
            .unwrap()
            .is_empty());
        assert!(corpus
            .lookup_adjacency(&p, None, Some(&Term::plain("b")), None)
            .unwrap()
            .is_empty());
        let no_graphs: [Term; 0] = [];
        assert!(corpus
            .lookup_adjacency(&p, None, None, Some(&no_graphs[..]))
            .unwrap()
            .is_empty());
        assert_eq!(corpus.dictionary_rank(&missing).unwrap(), None);
        assert_eq!(corpus.predicate_cardinality(&missing).unwrap(), 0);
    }

    #[test]
    fn lookups_restart_and_ranks_round_trip() {
        let (_dir, corpus) = build(&[(
            "a.nt",
            "<http://ex/a> <http://ex/p> <http://ex/b> .\n<http://ex/a> <http://ex/p> _:x .\n",
            "http://ex/g",
        )]);
        let p = Term::iri("http://ex/p");
        let lookup = corpus.lookup_adjacency(&p, None, None, None).unwrap();
        assert_eq!(lookup.buckets(), 2);
        let first = lookup.collect_pairs().unwrap();
        let second = lookup.collect_pairs().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].1, Term::iri("http://ex/b"));
        assert!(matches!(first[1].1, Term::BNode(_)));

        let g = Term::iri("http://ex/g");
        let rank = corpus.dictionary_rank(&g).unwrap().unwrap();
        assert_eq!(corpus.iri_of(rank).unwrap(), g);
        assert_eq!(corpus.graph_cardinality(&p, &g).unwrap(), 2);
    }

    #[test]
    fn unfinished_corpus_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(INGEST_DIR)).unwrap();
        let err = Corpus::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn bucket_stored_in_both_encodings_is_rejected() {
        let files = [(
            "a.nt",
            "<http://ex/a> <http://ex/p> <http://ex/b> .\n",
            "http://ex/g",
        )];
        let (_bm_dir, bm_root) = build_with(&files, IngestConfig::default());
        let long = IngestConfig::builder().bitmap_ceiling(0).build().unwrap();
        let (_lb_dir, lb_root) = build_with(&files, long);
        fs::copy(
            lb_root.join("pred_0/iri/iri.lb"),
            bm_root.join("pred_0/iri/iri.lb"),
        )
        .unwrap();
        let err = Corpus::open(&bm_root).unwrap_err();
        assert!(
            matches!(err, Error::Corrupt(ref m) if m.contains("two adjacency files for bucket iri")),
            "{}",
            err
        );
    }
}
