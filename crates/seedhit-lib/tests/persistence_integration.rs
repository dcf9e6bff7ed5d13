//! Integration tests for persisted indexes and histograms
//!
//! Builds hash-table indexes, writes them to disk, reopens them through the
//! memory map and checks that lookups agree.

use std::collections::BTreeSet;

use seedhit_lib::builder::{FnSink, IndexBuilder, IndexConfig, SeedEnumerator, SeedHistogram};
use seedhit_lib::serialization::IndexFileHeader;
use seedhit_lib::{open_hash_index, save_hash_index, SeedError, SequenceSet};
use tempfile::tempdir;

const PROTEINS: &[&str] = &[
    "MQIFVKTLTGKTITLEVEPSDTIENVKAKIQDKEGIPPDQQRLIFAGKQLEDGRTLSDYNIQKESTLHLVLRLRGG",
    "MALWMRLLPLLALLALWGPDPAAAFVNQHLCGSHLVEALYLVCGERGFFYTPKTRREAEDLQVGQVELGGGPGAGSLQPLALEGSLQKRGIVEQCCTSICSLYQLENYCN",
    "MSKGEELFTGVVPILVELDGDVNGHKFSVSGEGEGDATYGKLTLKFICTTGKLPVPWPTLVTTFSYGVQCFSRYPDHMKQHDFFKSAMPEGYVQERTIFFKDDGNYK",
    "MQIFVKTLTGKTITLEVEPSDTIENVKAKIQDKEGIPPDQQRLIFAGKQLEDGRTLSDYNIQKESTLHLVLRLRGG",
];

fn setup() -> (IndexConfig, SequenceSet) {
    let config = IndexConfig {
        partition_bits: 6,
        seq_chunks: 3,
        num_threads: 2,
        ..IndexConfig::default()
    };
    let seqs = SequenceSet::from_residues(PROTEINS, &config.reduction).unwrap();
    (config, seqs)
}

fn emitted_keys(config: &IndexConfig, seqs: &SequenceSet, shape: usize) -> BTreeSet<u64> {
    let e = SeedEnumerator::new(seqs, config).unwrap();
    let mut keys = BTreeSet::new();
    let mut sink = FnSink::new(|key, _, _, _| {
        keys.insert(key);
        true
    });
    e.enumerate_shape(0..seqs.len(), shape, &mut sink);
    keys
}

#[test]
fn test_hash_index_survives_reopen() {
    let (config, seqs) = setup();
    let builder = IndexBuilder::new(config.clone()).unwrap();
    let built = builder.build_hash_indexes(&seqs).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("ref.seedhit");
    save_hash_index(&path, &built).unwrap();
    let reopened = open_hash_index(&path, built.len()).unwrap();

    assert_eq!(reopened.len(), built.len());
    for (shape, (a, b)) in built.iter().zip(&reopened).enumerate() {
        assert_eq!(a.shape_id(), b.shape_id());
        assert_eq!(a.len(), b.len());
        assert_eq!(a.num_keys(), b.num_keys());
        let keys = emitted_keys(&config, &seqs, shape);
        assert_eq!(keys.len(), b.num_keys());
        for &key in &keys {
            assert!(b.contains(key));
            assert_eq!(a.get(key), b.get(key));
        }
        // keys that never occur
        for key in (0..1000u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 24) {
            if !keys.contains(&key) {
                assert!(!b.contains(key));
            }
        }
    }
}

#[test]
fn test_repeated_sequence_doubles_runs() {
    let (config, seqs) = setup();
    let index = IndexBuilder::new(config.clone()).unwrap().build_hash_indexes(&seqs).unwrap();
    for key in emitted_keys(&config, &seqs, 0) {
        let seq_ids: Vec<u32> = index[0].positions(key).map(|p| p.seq_id()).collect();
        // sequences 0 and 3 are identical
        assert_eq!(
            seq_ids.iter().filter(|&&s| s == 0).count(),
            seq_ids.iter().filter(|&&s| s == 3).count()
        );
    }
}

#[test]
fn test_open_rejects_shape_count_mismatch() {
    let (config, seqs) = setup();
    let built = IndexBuilder::new(config).unwrap().build_hash_indexes(&seqs).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("ref.seedhit");
    save_hash_index(&path, &built).unwrap();

    let err = open_hash_index(&path, built.len() + 1).unwrap_err();
    assert!(matches!(err, SeedError::Format { .. }), "{err}");
    assert!(err.to_string().contains("shape"));
}

#[test]
fn test_open_rejects_foreign_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("not-an-index");
    std::fs::write(&path, b">seq1\nMKVLAAGIVG\n").unwrap();
    let err = open_hash_index(&path, 2).unwrap_err();
    assert!(matches!(err, SeedError::Format { .. }), "{err}");
}

#[test]
fn test_open_rejects_implausible_shape_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("huge-header");
    let mut bytes = Vec::new();
    IndexFileHeader::new(u32::MAX).write(&mut bytes).unwrap();
    std::fs::write(&path, &bytes).unwrap();
    let err = open_hash_index(&path, u32::MAX as usize).unwrap_err();
    assert!(matches!(err, SeedError::Format { .. }), "{err}");

    let err = SeedHistogram::load(&path).unwrap_err();
    assert!(matches!(err, SeedError::Format { .. }), "{err}");
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = open_hash_index(&dir.path().join("missing"), 1).unwrap_err();
    assert!(matches!(err, SeedError::Io { .. }), "{err}");
}

#[test]
fn test_histogram_reuse_after_reload() {
    let (config, seqs) = setup();
    let builder = IndexBuilder::new(config).unwrap();
    let histogram = builder.count(&seqs).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("counts.hist");
    histogram.save(&path).unwrap();
    let loaded = SeedHistogram::load(&path).unwrap();
    assert_eq!(loaded.chunk_bounds(), histogram.chunk_bounds());
    for shape in 0..histogram.num_shapes() {
        assert_eq!(loaded.counts(shape), histogram.counts(shape));
    }

    let from_loaded = builder.build_hash_indexes_from(&seqs, &loaded).unwrap();
    let direct = builder.build_hash_indexes(&seqs).unwrap();
    assert_eq!(from_loaded, direct);
}
