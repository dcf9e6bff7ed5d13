//! Integration tests for hit culling
//!
//! Candidate pools are generated from a small deterministic generator so the
//! properties are checked over many shapes of input.

use std::collections::{BTreeMap, BTreeSet};

use seedhit_lib::culling::{cull, CullingConfig, CullingOptions, HspOrder, StreamingCuller, TargetSelection};
use seedhit_lib::{Hsp, Interval, SeedError, TargetHits};

/// Linear congruential generator, enough for reproducible pools
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn pool(seed: u64, len: usize, targets: u64) -> Vec<Hsp> {
    let mut rng = Lcg(seed);
    (0..len)
        .map(|_| {
            let exponent = rng.below(60) as i32;
            let begin = rng.below(400) as i32;
            let span = 20 + rng.below(200) as i32;
            let t_begin = rng.below(1000) as i32;
            let bit_score = 15.0 + 3.3 * exponent as f64 + rng.below(10) as f64 / 10.0;
            Hsp {
                target: rng.below(targets) as u32,
                score: (bit_score * 2.2) as i32,
                bit_score,
                evalue: 10f64.powi(1 - exponent),
                query_range: Interval::new(begin, begin + span),
                target_range: Interval::new(t_begin, t_begin + span),
            }
        })
        .collect()
}

/// Pool with many score ties, including zero and negative bit scores
fn tied_pool(seed: u64, len: usize, targets: u64) -> Vec<Hsp> {
    let mut rng = Lcg(seed);
    (0..len)
        .map(|_| {
            let bit_score = rng.below(12) as f64 * 5.0 - 20.0;
            let begin = rng.below(300) as i32;
            Hsp {
                target: rng.below(targets) as u32,
                score: bit_score as i32,
                bit_score,
                evalue: 1e-5,
                query_range: Interval::new(begin, begin + 50),
                target_range: Interval::new(0, 50),
            }
        })
        .collect()
}

fn shuffled(mut hsps: Vec<Hsp>, seed: u64) -> Vec<Hsp> {
    let mut rng = Lcg(seed);
    for i in (1..hsps.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        hsps.swap(i, j);
    }
    hsps
}

fn ids(targets: &[TargetHits]) -> Vec<u32> {
    targets.iter().map(|t| t.target).collect()
}

fn hit(target: u32, bit_score: f64, evalue: f64) -> Hsp {
    Hsp {
        target,
        score: bit_score as i32,
        bit_score,
        evalue,
        query_range: Interval::new(0, 100),
        target_range: Interval::new(0, 100),
    }
}

#[test]
fn test_max_target_seqs_extends_over_evalue_ties() {
    let config = CullingConfig {
        selection: TargetSelection::MaxTargetSeqs(2),
        ..CullingConfig::default()
    };
    let candidates = vec![
        hit(3, 30.0, 1e-5),
        hit(1, 150.0, 1e-40),
        hit(0, 180.0, 1e-50),
        hit(2, 150.0, 1e-40),
    ];
    let reported = cull(candidates, &config).unwrap();
    assert_eq!(ids(&reported), vec![0, 1, 2]);
}

#[test]
fn test_max_target_seqs_zero_keeps_every_significant_target() {
    let config = CullingConfig {
        selection: TargetSelection::MaxTargetSeqs(0),
        ..CullingConfig::default()
    };
    let candidates = pool(7, 300, 40);
    let significant: BTreeSet<u32> = candidates
        .iter()
        .filter(|h| h.evalue <= config.max_evalue)
        .map(|h| h.target)
        .collect();
    let reported: BTreeSet<u32> = ids(&cull(candidates, &config).unwrap()).into_iter().collect();
    assert_eq!(reported, significant);
}

#[test]
fn test_top_percent_is_monotone() {
    for seed in 1..20 {
        let candidates = pool(seed, 200, 30);
        let mut previous: BTreeSet<u32> = BTreeSet::new();
        for p in [0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0] {
            let config = CullingConfig {
                selection: TargetSelection::TopPercent(p),
                ..CullingConfig::default()
            };
            let reported: BTreeSet<u32> = ids(&cull(candidates.clone(), &config).unwrap()).into_iter().collect();
            assert!(previous.is_subset(&reported), "seed {} top {}%", seed, p);
            previous = reported;
        }
    }
}

#[test]
fn test_top_percent_keeps_every_better_target() {
    for seed in 1..30 {
        let candidates = tied_pool(seed, 120, 25);
        let mut best: BTreeMap<u32, f64> = BTreeMap::new();
        for h in &candidates {
            let b = best.entry(h.target).or_insert(f64::NEG_INFINITY);
            *b = b.max(h.bit_score);
        }
        for p in [0.0, 5.0, 20.0, 50.0, 100.0] {
            let config = CullingConfig {
                selection: TargetSelection::TopPercent(p),
                ..CullingConfig::default()
            };
            let reported = cull(candidates.clone(), &config).unwrap();
            assert!(!reported.is_empty(), "seed {} top {}%", seed, p);
            let kept: BTreeSet<u32> = ids(&reported).into_iter().collect();
            for a in &kept {
                for (b, score) in &best {
                    if *score > best[a] {
                        assert!(kept.contains(b), "seed {} top {}%: {} kept, {} dropped", seed, p, a, b);
                    }
                }
            }
            let reshuffled: BTreeSet<u32> = ids(&cull(shuffled(candidates.clone(), seed), &config).unwrap())
                .into_iter()
                .collect();
            assert_eq!(reshuffled, kept, "seed {} top {}%", seed, p);
        }
    }
}

#[test]
fn test_reported_targets_are_ranked() {
    let evalue_config = CullingConfig {
        selection: TargetSelection::MaxTargetSeqs(10),
        ..CullingConfig::default()
    };
    let score_config = CullingConfig {
        selection: TargetSelection::TopPercent(30.0),
        ..CullingConfig::default()
    };
    for seed in 1..10 {
        let by_evalue = cull(pool(seed, 150, 25), &evalue_config).unwrap();
        assert!(by_evalue.windows(2).all(|w| w[0].best_evalue() <= w[1].best_evalue()));
        let by_score = cull(pool(seed, 150, 25), &score_config).unwrap();
        assert!(by_score.windows(2).all(|w| w[0].best_bit_score() >= w[1].best_bit_score()));
    }
}

#[test]
fn test_single_hsp_is_the_best() {
    for order in [HspOrder::Evalue, HspOrder::Score] {
        let config = CullingConfig {
            max_hsps: 1,
            hsp_order: order,
            selection: TargetSelection::MaxTargetSeqs(0),
            ..CullingConfig::default()
        };
        let candidates = pool(11, 400, 15);
        for target in cull(candidates.clone(), &config).unwrap() {
            assert_eq!(target.hsps.len(), 1);
            let best = candidates
                .iter()
                .filter(|h| h.target == target.target && h.evalue <= config.max_evalue)
                .min_by(|a, b| match order {
                    HspOrder::Evalue => a.cmp_evalue(b),
                    HspOrder::Score => a.cmp_score(b),
                })
                .unwrap();
            assert_eq!(&target.hsps[0], best);
        }
    }
}

#[test]
fn test_kept_hsps_do_not_envelope_each_other() {
    let config = CullingConfig {
        selection: TargetSelection::MaxTargetSeqs(0),
        ..CullingConfig::default()
    };
    for target in cull(pool(5, 500, 10), &config).unwrap() {
        for (i, later) in target.hsps.iter().enumerate() {
            for earlier in &target.hsps[..i] {
                assert!(later.query_range.overlap_factor(&earlier.query_range) < config.overlap);
            }
        }
    }
}

#[test]
fn test_streaming_matches_single_pass() {
    for selection in [TargetSelection::MaxTargetSeqs(5), TargetSelection::TopPercent(20.0)] {
        let config = CullingConfig {
            selection,
            ..CullingConfig::default()
        };
        for seed in 1..8 {
            let candidates = pool(seed, 300, 30);
            let expected = cull(candidates.clone(), &config).unwrap();

            let culler = StreamingCuller::new(config.clone()).unwrap();
            for chunk in 0..4u32 {
                let part: Vec<Hsp> = candidates.iter().filter(|h| h.target % 4 == chunk).copied().collect();
                culler.add_chunk(part).unwrap();
            }
            assert_eq!(culler.chunks(), 4);
            assert_eq!(culler.finish(), expected, "{} seed {}", selection, seed);
        }
    }
}

#[test]
fn test_streaming_reports_admission() {
    let config = CullingConfig {
        selection: TargetSelection::MaxTargetSeqs(1),
        ..CullingConfig::default()
    };
    let culler = StreamingCuller::new(config).unwrap();
    assert!(culler.add_chunk(vec![hit(0, 100.0, 1e-30)]).unwrap());
    assert!(!culler.add_chunk(vec![hit(1, 50.0, 1e-10)]).unwrap());
    assert!(culler.add_chunk(vec![hit(2, 200.0, 1e-60)]).unwrap());
    assert_eq!(ids(&culler.reported()), vec![2]);
}

#[test]
fn test_nan_scores_are_rejected() {
    let config = CullingConfig::default();
    let err = cull(vec![hit(0, 50.0, 1e-10), hit(4, 40.0, f64::NAN)], &config).unwrap_err();
    assert!(matches!(err, SeedError::Comparator { target: 4, field: "evalue", .. }));

    let culler = StreamingCuller::new(config).unwrap();
    culler.add_chunk(vec![hit(0, 50.0, 1e-10)]).unwrap();
    assert!(culler.add_chunk(vec![hit(1, f64::NAN, 1e-20)]).is_err());
    assert_eq!(ids(&culler.reported()), vec![0]);
}

#[test]
fn test_empty_pool_reports_nothing() {
    assert!(cull(Vec::new(), &CullingConfig::default()).unwrap().is_empty());
}

#[test]
fn test_options_resolution() {
    let both = CullingOptions {
        max_target_seqs: Some(10),
        top_percent: Some(5.0),
        ..CullingOptions::default()
    };
    assert!(matches!(both.resolve(), Err(SeedError::Config { .. })));

    let top = CullingOptions {
        top_percent: Some(5.0),
        overlap_percent: Some(80.0),
        ..CullingOptions::default()
    }
    .resolve()
    .unwrap();
    assert_eq!(top.selection, TargetSelection::TopPercent(5.0));
    assert!(top.ranks_by_score());
    assert!((top.overlap - 0.8).abs() < 1e-12);

    assert_eq!(CullingOptions::default().resolve().unwrap(), CullingConfig::default());
}
