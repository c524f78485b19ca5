use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rdfpack::adjacency::Encoding;
use rdfpack::{Corpus, IngestConfig, Ingestor, Manifest, QuadIndex, Term, XsdDatatype};

type Quad = (Term, Term, Term, Term);

fn ex(local: String) -> Term {
    Term::iri(format!("http://example.org/{}", local))
}

fn random_quads(n: usize) -> Vec<Quad> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            let s = ex(format!("s{}", rng.random_range(0..60)));
            let p = ex(format!("p{}", rng.random_range(0..3)));
            let o = match rng.random_range(0..3) {
                0 => ex(format!("o{}", rng.random_range(0..30))),
                1 => Term::typed(
                    rng.random_range(-50..50).to_string(),
                    XsdDatatype::Integer.iri(),
                ),
                _ => Term::Literal {
                    lex: format!("w{}", rng.random_range(0..10)),
                    dt: None,
                    lang: Some("en".into()),
                },
            };
            let g = ex(format!("g{}", rng.random_range(0..4)));
            (s, p, o, g)
        })
        .collect()
}

fn ingest(dir: &Path, quads: &[Quad], cfg: IngestConfig) -> Corpus {
    let mut manifest = String::new();
    for (i, chunk) in quads.chunks(quads.len() / 3 + 1).enumerate() {
        let mut text = String::new();
        for (s, p, o, g) in chunk {
            writeln!(text, "{} {} {} {} .", s, p, o, g).unwrap();
        }
        let name = format!("part{}.nq", i);
        fs::write(dir.join(&name), text).unwrap();
        writeln!(manifest, "{} http://example.org/default", name).unwrap();
    }
    fs::write(dir.join("inputs.manifest"), manifest).unwrap();
    let manifest = Manifest::from_file(&dir.join("inputs.manifest")).unwrap();
    let root = dir.join("corpus");
    Ingestor::new(&root, cfg).run(&manifest, 1).unwrap();
    Corpus::open(&root).unwrap()
}

fn small_config() -> IngestConfig {
    IngestConfig::builder()
        .section_capacity(16)
        .roll_threshold(2048)
        .writer_slots(3)
        .fan_in(3)
        .parse_concurrency(3)
        .build()
        .unwrap()
}

fn expected(quads: &[Quad], p: &Term, graphs: Option<&[Term]>) -> BTreeSet<(Term, Term)> {
    quads
        .iter()
        .filter(|(_, qp, _, g)| qp == p && graphs.map_or(true, |gs| gs.contains(g)))
        .map(|(s, _, o, _)| (s.clone(), o.clone()))
        .collect()
}

fn lookup(
    corpus: &Corpus,
    p: &Term,
    s: Option<&Term>,
    o: Option<&Term>,
    graphs: Option<&[Term]>,
) -> BTreeSet<(Term, Term)> {
    let pairs = corpus
        .lookup_adjacency(p, s, o, graphs)
        .unwrap()
        .collect_pairs()
        .unwrap();
    let set: BTreeSet<_> = pairs.iter().cloned().collect();
    assert_eq!(set.len(), pairs.len(), "duplicate pairs in lookup");
    set
}

fn check_fidelity(corpus: &Corpus, quads: &[Quad]) {
    let graphs: Vec<Term> = (0..4).map(|i| ex(format!("g{}", i))).collect();
    for pi in 0..3 {
        let p = ex(format!("p{}", pi));
        assert_eq!(lookup(corpus, &p, None, None, None), expected(quads, &p, None));
        let total = expected(quads, &p, None).len() as u64;
        assert_eq!(corpus.predicate_cardinality(&p).unwrap(), total);

        for g in &graphs {
            let one = std::slice::from_ref(g);
            assert_eq!(
                lookup(corpus, &p, None, None, Some(one)),
                expected(quads, &p, Some(one))
            );
            assert_eq!(
                corpus.graph_cardinality(&p, g).unwrap(),
                expected(quads, &p, Some(one)).len() as u64
            );
        }
        let two = [graphs[0].clone(), graphs[2].clone()];
        assert_eq!(
            lookup(corpus, &p, None, None, Some(&two[..])),
            expected(quads, &p, Some(&two[..]))
        );

        for (s, qp, o, _) in quads.iter().filter(|q| q.1 == p).take(25) {
            let by_subject: BTreeSet<_> = expected(quads, qp, None)
                .into_iter()
                .filter(|(es, _)| es == s)
                .collect();
            assert_eq!(lookup(corpus, &p, Some(s), None, None), by_subject);
            let by_object: BTreeSet<_> = expected(quads, qp, None)
                .into_iter()
                .filter(|(_, eo)| eo == o)
                .collect();
            assert_eq!(lookup(corpus, &p, None, Some(o), None), by_object);
            let both = lookup(corpus, &p, Some(s), Some(o), None);
            assert_eq!(both.len(), 1);
        }
    }
}

#[test]
fn every_quad_is_found_per_graph_and_across_graphs() {
    let dir = tempfile::tempdir().unwrap();
    let quads = random_quads(3000);
    let corpus = ingest(dir.path(), &quads, small_config());
    assert!(corpus.buckets().all(|b| b.encoding() == Encoding::Bitmap));
    check_fidelity(&corpus, &quads);
}

#[test]
fn bitmap_and_long_buffer_encodings_agree() {
    let quads = random_quads(3000);
    let bitmap_dir = tempfile::tempdir().unwrap();
    let bitmap = ingest(bitmap_dir.path(), &quads, small_config());
    let long_dir = tempfile::tempdir().unwrap();
    let mut cfg = small_config();
    cfg.bitmap_ceiling = 0;
    let long = ingest(long_dir.path(), &quads, cfg);
    assert!(long.buckets().all(|b| b.encoding() == Encoding::LongBuffer));

    check_fidelity(&long, &quads);
    for pi in 0..3 {
        let p = ex(format!("p{}", pi));
        let a = bitmap
            .lookup_adjacency(&p, None, None, None)
            .unwrap()
            .collect_pairs()
            .unwrap();
        let b = long
            .lookup_adjacency(&p, None, None, None)
            .unwrap()
            .collect_pairs()
            .unwrap();
        // both encodings yield (subject rank, object rank) order
        assert_eq!(a, b);
    }
}
