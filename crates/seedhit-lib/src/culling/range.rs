//! Query-range culling
//!
//! Global selection keeps the best targets of the whole query. Range culling
//! keeps a target as long as the query positions its HSPs align to are not
//! already covered by enough better targets, so a query with several domains
//! reports the best hits of each domain.
//!
//! Coverage lives in a [`RangePartition`]: the query axis is cut at every
//! kept HSP boundary, and each segment records how many kept HSPs span it
//! and the best bit score among them. Targets are visited in ranking order:
//! - with `max_target_seqs = k`, a position is covered once `k` kept HSPs
//!   span it (`k = 0` never covers anything)
//! - with `top_percent = p`, a position is covered for an HSP with bit score
//!   `b` once a kept HSP spanning it scores at least `b / (1 - p/100)`
//!
//! A target is kept while the covered share of its summed HSP query lengths
//! stays below the `range_cover` percentage.

use std::collections::BTreeMap;

use crate::culling::candidate::{Interval, TargetHits};
use crate::culling::config::{CullingConfig, TargetSelection};

/// Coverage of one segment of the query axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Kept HSPs spanning the segment
    pub count: usize,
    /// Best bit score among them
    pub max_bit_score: f64,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            count: 0,
            max_bit_score: f64::NEG_INFINITY,
        }
    }
}

impl Segment {
    #[inline]
    fn add(&mut self, bit_score: f64) {
        self.count += 1;
        self.max_bit_score = self.max_bit_score.max(bit_score);
    }
}

/// The query axis split at HSP boundaries
#[derive(Debug, Clone, PartialEq)]
pub struct RangePartition {
    // segment start -> coverage up to the next start
    segments: BTreeMap<i32, Segment>,
}

impl Default for RangePartition {
    fn default() -> Self {
        Self::new()
    }
}

impl RangePartition {
    /// One uncovered segment over the whole axis
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::from([(i32::MIN, Segment::default())]),
        }
    }

    /// Number of segments
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn split_at(&mut self, at: i32) {
        if self.segments.contains_key(&at) {
            return;
        }
        let left = self
            .segments
            .range(..at)
            .next_back()
            .map(|(_, s)| *s)
            .unwrap_or_default();
        self.segments.insert(at, left);
    }

    /// Record a kept HSP over `range`
    pub fn insert(&mut self, range: Interval, bit_score: f64) {
        if range.is_empty() {
            return;
        }
        self.split_at(range.begin());
        self.split_at(range.end());
        for segment in self.segments.range_mut(range.begin()..range.end()).map(|(_, s)| s) {
            segment.add(bit_score);
        }
    }

    /// Segments overlapping `range`, with their extent
    pub fn segments(&self, range: Interval) -> impl Iterator<Item = (Interval, &Segment)> + '_ {
        let start = self
            .segments
            .range(..=range.begin())
            .next_back()
            .map_or(i32::MIN, |(&k, _)| k);
        let mut iter = self.segments.range(start..).peekable();
        std::iter::from_fn(move || {
            let (&begin, segment) = iter.next()?;
            if begin >= range.end() {
                return None;
            }
            let end = iter.peek().map_or(i32::MAX, |(&k, _)| k);
            Some((Interval::new(begin, end), segment))
        })
    }

    fn covered_by(&self, range: Interval, covers: impl Fn(&Segment) -> bool) -> i32 {
        self.segments(range)
            .filter(|(_, s)| covers(s))
            .map(|(extent, _)| range.intersect_len(&extent))
            .sum()
    }

    /// Positions of `range` spanned by at least `cap` kept HSPs
    pub fn covered(&self, range: Interval, cap: usize) -> i32 {
        self.covered_by(range, |s| s.count >= cap)
    }

    /// Positions of `range` spanned by a kept HSP scoring at least `min_bit_score`
    pub fn covered_above(&self, range: Interval, min_bit_score: f64) -> i32 {
        self.covered_by(range, |s| s.count > 0 && s.max_bit_score >= min_bit_score)
    }
}

/// Bit score a kept HSP needs to cover an HSP scoring `bit_score`
#[inline]
pub fn range_cutoff(bit_score: f64, percent: f64) -> f64 {
    if percent >= 100.0 {
        f64::INFINITY
    } else {
        bit_score / (1.0 - percent / 100.0)
    }
}

/// Greedy range culling over targets visited in ranking order
#[derive(Debug, Clone)]
pub struct RangeCuller {
    selection: TargetSelection,
    cover: f64,
    partition: RangePartition,
}

impl RangeCuller {
    /// Culler covering `cover` percent of a target before dropping it
    pub fn new(selection: TargetSelection, cover: f64) -> Self {
        Self {
            selection,
            cover,
            partition: RangePartition::new(),
        }
    }

    /// Culler for a configuration with range culling enabled
    pub fn from_config(config: &CullingConfig) -> Option<Self> {
        config.range_cover.map(|cover| Self::new(config.selection, cover))
    }

    /// The query coverage of the targets kept so far
    pub fn partition(&self) -> &RangePartition {
        &self.partition
    }

    /// Share of the target's HSP query lengths already covered
    pub fn coverage(&self, target: &TargetHits) -> f64 {
        let mut covered = 0i64;
        let mut len = 0i64;
        for hsp in &target.hsps {
            let c = match self.selection {
                TargetSelection::MaxTargetSeqs(0) => 0,
                TargetSelection::MaxTargetSeqs(k) => self.partition.covered(hsp.query_range, k),
                TargetSelection::TopPercent(p) => self
                    .partition
                    .covered_above(hsp.query_range, range_cutoff(hsp.bit_score, p)),
            };
            covered += c as i64;
            len += hsp.query_range.len() as i64;
        }
        if len == 0 {
            0.0
        } else {
            covered as f64 / len as f64
        }
    }

    /// Whether the target is still mostly uncovered
    #[inline]
    pub fn admits(&self, target: &TargetHits) -> bool {
        self.coverage(target) * 100.0 < self.cover
    }

    /// Record a kept target
    pub fn add(&mut self, target: &TargetHits) {
        for hsp in &target.hsps {
            self.partition.insert(hsp.query_range, hsp.bit_score);
        }
    }

    /// Keep, in order, every target not covered by the ones kept before it
    pub fn select(mut self, targets: Vec<TargetHits>) -> Vec<TargetHits> {
        targets
            .into_iter()
            .filter(|t| {
                let keep = self.admits(t);
                if keep {
                    self.add(t);
                }
                keep
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::candidate::Hsp;

    fn target(id: u32, hsps: &[(f64, (i32, i32))]) -> TargetHits {
        TargetHits {
            target: id,
            hsps: hsps
                .iter()
                .map(|&(bit_score, (b, e))| Hsp {
                    target: id,
                    score: bit_score as i32,
                    bit_score,
                    evalue: 1e-10,
                    query_range: Interval::new(b, e),
                    target_range: Interval::new(0, e - b),
                })
                .collect(),
        }
    }

    #[test]
    fn test_partition_counts_nested_ranges() {
        let mut p = RangePartition::new();
        p.insert(Interval::new(0, 100), 50.0);
        p.insert(Interval::new(50, 150), 80.0);
        p.insert(Interval::new(60, 60), 99.0);
        assert_eq!(p.num_segments(), 5);
        let cover: Vec<(i32, i32, usize)> = p
            .segments(Interval::new(0, 200))
            .map(|(r, s)| (r.begin(), r.end().min(1000), s.count))
            .collect();
        assert_eq!(cover, vec![(0, 50, 1), (50, 100, 2), (100, 150, 1), (150, 1000, 0)]);
        assert_eq!(p.covered(Interval::new(0, 200), 1), 150);
        assert_eq!(p.covered(Interval::new(0, 200), 2), 50);
        assert_eq!(p.covered(Interval::new(-20, 10), 1), 10);
        assert_eq!(p.covered_above(Interval::new(0, 200), 60.0), 100);
        assert_eq!(p.covered_above(Interval::new(0, 200), 81.0), 0);
    }

    #[test]
    fn test_separate_domains_are_both_reported() {
        // target 1 covers the first domain twice over, target 2 the second
        let targets = vec![
            target(0, &[(200.0, (0, 100))]),
            target(1, &[(190.0, (0, 100))]),
            target(2, &[(180.0, (5, 95))]),
            target(3, &[(60.0, (300, 400))]),
        ];
        let reported = RangeCuller::new(TargetSelection::MaxTargetSeqs(2), 50.0).select(targets);
        let ids: Vec<u32> = reported.iter().map(|t| t.target).collect();
        // a global cap of two would drop target 3
        assert_eq!(ids, vec![0, 1, 3]);
    }

    #[test]
    fn test_cover_threshold_is_exclusive() {
        let mut culler = RangeCuller::new(TargetSelection::MaxTargetSeqs(1), 50.0);
        culler.add(&target(0, &[(100.0, (0, 100))]));
        let half = target(1, &[(90.0, (50, 150))]);
        assert_eq!(culler.coverage(&half), 0.5);
        assert!(!culler.admits(&half));
        let less = target(2, &[(90.0, (51, 151))]);
        assert!(culler.admits(&less));
    }

    #[test]
    fn test_coverage_sums_over_hsps() {
        let mut culler = RangeCuller::new(TargetSelection::MaxTargetSeqs(1), 50.0);
        culler.add(&target(0, &[(100.0, (0, 100))]));
        // 100 of 300 positions covered
        let two = target(1, &[(90.0, (0, 100)), (80.0, (200, 400))]);
        assert!((culler.coverage(&two) - 1.0 / 3.0).abs() < 1e-12);
        assert!(culler.admits(&two));
    }

    #[test]
    fn test_top_percent_covers_only_far_better_hits() {
        let mut culler = RangeCuller::new(TargetSelection::TopPercent(10.0), 50.0);
        culler.add(&target(0, &[(100.0, (0, 100))]));
        // within 10% of the kept hit: not covered
        assert!(culler.admits(&target(1, &[(91.0, (0, 100))])));
        // more than 10% below it: covered
        assert!(!culler.admits(&target(2, &[(89.0, (0, 100))])));
        assert!(culler.admits(&target(3, &[(50.0, (200, 300))])));

        let mut all = RangeCuller::new(TargetSelection::TopPercent(100.0), 50.0);
        all.add(&target(0, &[(100.0, (0, 100))]));
        assert!(all.admits(&target(2, &[(1.0, (0, 100))])));
    }

    #[test]
    fn test_zero_cap_keeps_everything() {
        let targets: Vec<TargetHits> = (0..10).map(|t| target(t, &[(100.0, (0, 100))])).collect();
        let reported = RangeCuller::new(TargetSelection::MaxTargetSeqs(0), 50.0).select(targets);
        assert_eq!(reported.len(), 10);
    }
}
