use std::fs;
use std::path::Path;

use rdfpack::{Corpus, IngestConfig, Ingestor, Manifest, QuadIndex, Term};

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example.org/{}", local))
}

fn build_corpus(dir: &Path, cfg: IngestConfig) -> Corpus {
    fs::write(
        dir.join("g1.nt"),
        format!(
            "<http://example.org/a> <{t}> <http://example.org/Bag> .\n\
             <http://example.org/a> <{t}> <http://example.org/Alt> .\n",
            t = RDF_TYPE
        ),
    )
    .unwrap();
    fs::write(
        dir.join("g2.nt"),
        format!(
            "<http://example.org/b> <{t}> <http://example.org/Bag> .\n",
            t = RDF_TYPE
        ),
    )
    .unwrap();
    fs::write(
        dir.join("inputs.manifest"),
        "g1.nt <http://example.org/g1>\ng2.nt <http://example.org/g2>\n",
    )
    .unwrap();
    let manifest = Manifest::from_file(&dir.join("inputs.manifest")).unwrap();
    let root = dir.join("corpus");
    Ingestor::new(&root, cfg).run(&manifest, 1).unwrap();
    Corpus::open(&root).unwrap()
}

#[test]
fn object_and_graph_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = build_corpus(dir.path(), IngestConfig::default());
    let rdf_type = Term::iri(RDF_TYPE);

    let bags = corpus
        .lookup_adjacency(&rdf_type, None, Some(&ex("Bag")), None)
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(bags, vec![(ex("a"), ex("Bag")), (ex("b"), ex("Bag"))]);

    let g2 = [ex("g2")];
    let in_g2 = corpus
        .lookup_adjacency(&rdf_type, None, None, Some(&g2[..]))
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(in_g2, vec![(ex("b"), ex("Bag"))]);

    let g1 = [ex("g1")];
    let a_in_g1 = corpus
        .lookup_adjacency(&rdf_type, Some(&ex("a")), None, Some(&g1[..]))
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(a_in_g1, vec![(ex("a"), ex("Alt")), (ex("a"), ex("Bag"))]);

    assert_eq!(corpus.predicate_cardinality(&rdf_type).unwrap(), 3);
    assert_eq!(corpus.graph_cardinality(&rdf_type, &ex("g1")).unwrap(), 2);
    assert_eq!(corpus.graph_cardinality(&rdf_type, &ex("g2")).unwrap(), 1);
}

#[test]
fn long_buffer_encoding_answers_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = IngestConfig::builder().bitmap_ceiling(0).build().unwrap();
    let corpus = build_corpus(dir.path(), cfg);
    assert!(corpus.root().join("pred_0/iri/iri.lb").exists());
    let rdf_type = Term::iri(RDF_TYPE);

    let bags = corpus
        .lookup_adjacency(&rdf_type, None, Some(&ex("Bag")), None)
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(bags, vec![(ex("a"), ex("Bag")), (ex("b"), ex("Bag"))]);
    let g2 = [ex("g2")];
    let in_g2 = corpus
        .lookup_adjacency(&rdf_type, None, None, Some(&g2[..]))
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(in_g2, vec![(ex("b"), ex("Bag"))]);
}

#[test]
fn same_pair_in_two_graphs_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let line = "<http://example.org/s> <http://example.org/p> <http://example.org/o> .\n";
    fs::write(dir.path().join("x.nt"), line).unwrap();
    fs::write(dir.path().join("y.nt"), line).unwrap();
    fs::write(
        dir.path().join("m"),
        "x.nt http://example.org/gx\ny.nt http://example.org/gy\n",
    )
    .unwrap();
    let manifest = Manifest::from_file(&dir.path().join("m")).unwrap();
    let root = dir.path().join("corpus");
    Ingestor::new(&root, IngestConfig::default())
        .run(&manifest, 1)
        .unwrap();
    let corpus = Corpus::open(&root).unwrap();
    let p = ex("p");
    assert_eq!(corpus.predicate_cardinality(&p).unwrap(), 1);
    assert_eq!(corpus.graph_cardinality(&p, &ex("gx")).unwrap(), 1);
    assert_eq!(corpus.graph_cardinality(&p, &ex("gy")).unwrap(), 1);
    let gy = [ex("gy")];
    let hits = corpus
        .lookup_adjacency(&p, None, None, Some(&gy[..]))
        .unwrap()
        .collect_pairs()
        .unwrap();
    assert_eq!(hits, vec![(ex("s"), ex("o"))]);
}
