use std::fs;
use std::path::{Path, PathBuf};

use rdfpack::{Corpus, Error, IngestConfig, Ingestor, Manifest, QuadIndex, Term};

fn build(dir: &Path) -> PathBuf {
    let mut text = String::new();
    for i in 0..40 {
        text.push_str(&format!(
            "<http://example.org/s{:02}> <http://example.org/p> <http://example.org/o{}> .\n",
            i,
            i % 5
        ));
    }
    fs::write(dir.join("a.nt"), text).unwrap();
    fs::write(dir.join("m"), "a.nt http://example.org/g\n").unwrap();
    let manifest = Manifest::from_file(&dir.join("m")).unwrap();
    let root = dir.join("corpus");
    let cfg = IngestConfig::builder()
        .section_capacity(8)
        .compress_sections(false)
        .build()
        .unwrap();
    Ingestor::new(&root, cfg).run(&manifest, 1).unwrap();
    root
}

fn flip(path: &Path, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    fs::write(path, &bytes).unwrap();
}

#[test]
fn corrupt_dictionary_section_is_reported_on_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let root = build(dir.path());
    // first byte after the 32-byte header belongs to section 0
    flip(&root.join("iris"), 40);

    let corpus = Corpus::open(&root).unwrap();
    let first = Term::iri("http://example.org/g");
    let err = corpus.dictionary_rank(&first).unwrap_err();
    assert!(matches!(err, Error::Corrupt(ref m) if m.contains("CRC")), "{}", err);
    assert_eq!(err.exit_code(), 6);
}

#[test]
fn corrupt_dictionary_metadata_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let root = build(dir.path());
    let iris = root.join("iris");
    let len = fs::metadata(&iris).unwrap().len() as usize;
    // inside the TOC / first-element area, before the footer
    flip(&iris, len - 20);
    assert!(matches!(Corpus::open(&root), Err(Error::Corrupt(_))));
}

#[test]
fn corrupt_adjacency_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let root = build(dir.path());
    let adjacency = root.join("pred_0/iri/iri.bm");
    let len = fs::metadata(&adjacency).unwrap().len() as usize;
    // bitmap payloads sit between the header and the trailing directory
    flip(&adjacency, 40.min(len - 1));

    let outcome = Corpus::open(&root).and_then(|corpus| {
        corpus
            .lookup_adjacency(&Term::iri("http://example.org/p"), None, None, None)?
            .collect_pairs()
    });
    assert!(matches!(outcome, Err(Error::Corrupt(_))), "{:?}", outcome);
}
