use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rdfpack::merge::{merge_runs, merge_values, MergeLadder};
use rdfpack::run::{RunEntry, TempCodec};
use rdfpack::TempCompression;

fn codec() -> TempCodec {
    TempCodec::new(TempCompression::Zstd, 1)
}

fn entry(s: u32, o: u32, g: u32) -> RunEntry {
    RunEntry::new(
        format!("s{:04}", s).into_bytes(),
        format!("o{:04}", o).into_bytes(),
        g,
    )
}

fn write_sorted(path: &Path, mut entries: Vec<RunEntry>) -> PathBuf {
    entries.sort_by(|a, b| a.key_cmp(b));
    entries.dedup_by(|b, a| {
        if a.same_key(b) {
            a.absorb_graphs(&b.graphs);
            true
        } else {
            false
        }
    });
    let mut w = codec().run_writer(path).unwrap();
    for e in &entries {
        w.write(e).unwrap();
    }
    w.finish().unwrap()
}

fn read(path: &Path) -> Vec<RunEntry> {
    codec().run_reader(path).unwrap().map(|e| e.unwrap()).collect()
}

/// (subject, object) -> graph set, the reference result of a distinct merge.
fn expected(inputs: &[Vec<RunEntry>]) -> Vec<RunEntry> {
    let mut map: BTreeMap<(Vec<u8>, Vec<u8>), Vec<u32>> = BTreeMap::new();
    for e in inputs.iter().flatten() {
        let gs = map.entry((e.subject.clone(), e.object.clone())).or_default();
        gs.extend_from_slice(&e.graphs);
        gs.sort_unstable();
        gs.dedup();
    }
    map.into_iter()
        .map(|((subject, object), graphs)| RunEntry {
            subject,
            object,
            graphs,
        })
        .collect()
}

fn check_distinct_merge(dir: &Path, inputs: Vec<Vec<RunEntry>>) {
    std::fs::create_dir_all(dir).unwrap();
    let paths: Vec<PathBuf> = inputs
        .iter()
        .enumerate()
        .map(|(i, es)| write_sorted(&dir.join(format!("in-{}", i)), es.clone()))
        .collect();
    let out = dir.join("out");
    let n = merge_runs(&paths, &out, true, codec()).unwrap();
    let merged = read(&out);
    assert_eq!(n as usize, merged.len());
    assert_eq!(merged, expected(&inputs));

    // merging the result again changes nothing
    let again = dir.join("again");
    merge_runs(&[out.clone(), out], &again, true, codec()).unwrap();
    assert_eq!(read(&again), merged);
}

#[test]
fn disjoint_nested_and_overlapping_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let disjoint = vec![
        (0..50).map(|i| entry(i, i, 0)).collect(),
        (50..100).map(|i| entry(i, i, 1)).collect(),
    ];
    check_distinct_merge(&dir.path().join("disjoint"), disjoint);

    let nested = vec![
        (0..100).map(|i| entry(i, 0, 0)).collect(),
        (20..40).map(|i| entry(i, 0, 2)).collect(),
    ];
    check_distinct_merge(&dir.path().join("nested"), nested);

    let overlapping = vec![
        (0..60).map(|i| entry(i, i % 3, 0)).collect(),
        (40..100).map(|i| entry(i, i % 3, 1)).collect(),
        (30..70).map(|i| entry(i, i % 3, 2)).collect(),
    ];
    check_distinct_merge(&dir.path().join("overlap"), overlapping);
}

#[test]
fn random_inputs_match_reference() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let inputs: Vec<Vec<RunEntry>> = (0..6)
        .map(|_| {
            (0..400)
                .map(|_| {
                    entry(
                        rng.random_range(0..200),
                        rng.random_range(0..20),
                        rng.random_range(0..5),
                    )
                })
                .collect()
        })
        .collect();
    check_distinct_merge(dir.path(), inputs);
}

#[test]
fn graph_union_is_order_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_sorted(&dir.path().join("a"), vec![entry(1, 1, 3), entry(1, 1, 1)]);
    let b = write_sorted(&dir.path().join("b"), vec![entry(1, 1, 2)]);
    let ab = dir.path().join("ab");
    let ba = dir.path().join("ba");
    merge_runs(&[a.clone(), b.clone()], &ab, true, codec()).unwrap();
    merge_runs(&[b, a], &ba, true, codec()).unwrap();
    assert_eq!(read(&ab), read(&ba));
    assert_eq!(read(&ab)[0].graphs, vec![1, 2, 3]);
}

#[test]
fn non_distinct_merge_keeps_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_sorted(&dir.path().join("a"), vec![entry(1, 1, 0), entry(2, 2, 0)]);
    let b = write_sorted(&dir.path().join("b"), vec![entry(1, 1, 1)]);
    let out = dir.path().join("out");
    assert_eq!(merge_runs(&[a, b], &out, false, codec()).unwrap(), 3);
    let got = read(&out);
    assert!(got.windows(2).all(|w| w[0].key_cmp(&w[1]).is_le()));
}

#[test]
fn value_merge_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut lists = Vec::new();
    for (i, range) in [(0..30), (10..50), (45..60)].into_iter().enumerate() {
        let path = dir.path().join(format!("list-{}", i));
        let mut w = codec().list_writer(&path).unwrap();
        for v in range {
            w.write(format!("v{:03}", v).as_bytes()).unwrap();
        }
        lists.push(w.finish().unwrap());
    }
    let out = dir.path().join("merged");
    assert_eq!(merge_values(&lists, &out, codec()).unwrap(), 60);
    let again = dir.path().join("again");
    assert_eq!(merge_values(&[out.clone()], &again, codec()).unwrap(), 60);
    let a: Vec<_> = codec().list_reader(&out).unwrap().map(|v| v.unwrap()).collect();
    let b: Vec<_> = codec().list_reader(&again).unwrap().map(|v| v.unwrap()).collect();
    assert_eq!(a, b);
}

#[test]
fn ladder_with_small_fan_in_merges_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut ladder = MergeLadder::new(dir.path(), 2);
    let mut all = Vec::new();
    for i in 0..11u32 {
        let es: Vec<RunEntry> = (0..20).map(|j| entry(j * 11 + i, j % 4, i % 3)).collect();
        all.push(es.clone());
        let path = write_sorted(&dir.path().join(format!("local-{}", i)), es);
        let mut pending = ladder.add(0, path);
        while let Some(merge) = pending {
            let out = merge.run(codec()).unwrap();
            pending = ladder.add(merge.level, out);
        }
    }
    let out = dir.path().join("final.run");
    let n = ladder.finish(&out, codec()).unwrap();
    assert_eq!(n, 220);
    assert_eq!(read(&out), expected(&all));
}
