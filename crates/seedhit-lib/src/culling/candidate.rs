//! Alignment candidates and their ordering

use std::cmp::Ordering;

use crate::error::{Result, SeedError};

/// Half-open coordinate range `[begin, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    begin: i32,
    end: i32,
}

impl Interval {
    /// Range between two coordinates, in either order
    pub fn new(a: i32, b: i32) -> Self {
        Self {
            begin: a.min(b),
            end: a.max(b),
        }
    }

    /// First coordinate
    #[inline]
    pub fn begin(&self) -> i32 {
        self.begin
    }

    /// One past the last coordinate
    #[inline]
    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of coordinates covered
    #[inline]
    pub fn len(&self) -> i32 {
        self.end - self.begin
    }

    /// Whether the range is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Length of the intersection with `other`
    pub fn intersect_len(&self, other: &Interval) -> i32 {
        (self.end.min(other.end) - self.begin.max(other.begin)).max(0)
    }

    /// Fraction of this range covered by `other`
    pub fn overlap_factor(&self, other: &Interval) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.intersect_len(other) as f64 / self.len() as f64
    }
}

/// One scored local alignment between the query and a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsp {
    /// Target id
    pub target: u32,
    /// Raw alignment score
    pub score: i32,
    /// Bit score
    pub bit_score: f64,
    /// Expect value
    pub evalue: f64,
    /// Aligned query range
    pub query_range: Interval,
    /// Aligned target range
    pub target_range: Interval,
}

impl Hsp {
    /// Fail on scores that cannot be ordered
    pub fn check_comparable(&self) -> Result<()> {
        if self.evalue.is_nan() {
            return Err(SeedError::Comparator {
                target: self.target,
                field: "evalue",
                value: self.evalue,
            });
        }
        if self.bit_score.is_nan() {
            return Err(SeedError::Comparator {
                target: self.target,
                field: "bit_score",
                value: self.bit_score,
            });
        }
        Ok(())
    }

    /// E-value ascending, then bit score and raw score descending
    pub fn cmp_evalue(&self, other: &Hsp) -> Ordering {
        self.evalue
            .total_cmp(&other.evalue)
            .then_with(|| self.cmp_score(other))
    }

    /// Bit score and raw score descending, then e-value ascending
    pub fn cmp_score(&self, other: &Hsp) -> Ordering {
        other
            .bit_score
            .total_cmp(&self.bit_score)
            .then_with(|| other.score.cmp(&self.score))
            .then_with(|| self.evalue.total_cmp(&other.evalue))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| self.query_range.begin().cmp(&other.query_range.begin()))
            .then_with(|| self.target_range.begin().cmp(&other.target_range.begin()))
    }

    /// Whether at least `threshold` of this query range is covered by `other`
    ///
    /// The bound is inclusive: an overlap of exactly `threshold` envelopes.
    #[inline]
    pub fn is_enveloped_by(&self, other: &Hsp, threshold: f64) -> bool {
        self.query_range.overlap_factor(&other.query_range) >= threshold
    }
}

/// A target and its reported HSPs, best first
#[derive(Debug, Clone, PartialEq)]
pub struct TargetHits {
    /// Target id
    pub target: u32,
    /// Kept HSPs in ranking order
    pub hsps: Vec<Hsp>,
}

impl TargetHits {
    /// Best HSP
    ///
    /// Culled targets always keep at least one HSP.
    #[inline]
    pub fn best(&self) -> Option<&Hsp> {
        self.hsps.first()
    }

    /// Lowest e-value of the target
    pub fn best_evalue(&self) -> f64 {
        self.hsps.iter().map(|h| h.evalue).fold(f64::INFINITY, f64::min)
    }

    /// Highest bit score of the target
    pub fn best_bit_score(&self) -> f64 {
        self.hsps.iter().map(|h| h.bit_score).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Highest raw score of the target
    pub fn best_score(&self) -> i32 {
        self.hsps.iter().map(|h| h.score).max().unwrap_or(i32::MIN)
    }

    /// Target ranking by e-value: best e-value ascending, best bit score
    /// descending, then target id
    pub fn cmp_evalue(&self, other: &TargetHits) -> Ordering {
        self.best_evalue()
            .total_cmp(&other.best_evalue())
            .then_with(|| other.best_bit_score().total_cmp(&self.best_bit_score()))
            .then_with(|| self.target.cmp(&other.target))
    }

    /// Target ranking by score: best bit score and raw score descending,
    /// best e-value ascending, then target id
    pub fn cmp_score(&self, other: &TargetHits) -> Ordering {
        other
            .best_bit_score()
            .total_cmp(&self.best_bit_score())
            .then_with(|| other.best_score().cmp(&self.best_score()))
            .then_with(|| self.best_evalue().total_cmp(&other.best_evalue()))
            .then_with(|| self.target.cmp(&other.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hsp(target: u32, bit_score: f64, evalue: f64, q: (i32, i32)) -> Hsp {
        Hsp {
            target,
            score: bit_score as i32,
            bit_score,
            evalue,
            query_range: Interval::new(q.0, q.1),
            target_range: Interval::new(q.0, q.1),
        }
    }

    #[test]
    fn test_interval_overlap() {
        let a = Interval::new(0, 100);
        let b = Interval::new(50, 250);
        assert_eq!(a.intersect_len(&b), 50);
        assert_eq!(a.overlap_factor(&b), 0.5);
        assert_eq!(b.overlap_factor(&a), 0.25);
        assert_eq!(Interval::new(10, 0), Interval::new(0, 10));
        assert_eq!(Interval::new(0, 10).intersect_len(&Interval::new(20, 30)), 0);
        assert_eq!(Interval::default().overlap_factor(&a), 0.0);
    }

    #[test]
    fn test_hsp_ordering() {
        let a = hsp(1, 50.0, 1e-10, (0, 10));
        let b = hsp(2, 60.0, 1e-10, (0, 10));
        let c = hsp(3, 70.0, 1e-5, (0, 10));
        assert_eq!(b.cmp_evalue(&a), Ordering::Less);
        assert_eq!(a.cmp_evalue(&c), Ordering::Less);
        assert_eq!(c.cmp_score(&b), Ordering::Less);
    }

    #[test]
    fn test_nan_is_not_comparable() {
        let bad = hsp(7, 10.0, f64::NAN, (0, 10));
        let err = bad.check_comparable().unwrap_err();
        assert!(matches!(err, SeedError::Comparator { target: 7, field: "evalue", .. }));
        assert!(hsp(7, f64::NAN, 1.0, (0, 1)).check_comparable().is_err());
        assert!(hsp(7, 1.0, 1.0, (0, 1)).check_comparable().is_ok());
    }

    #[test]
    fn test_envelope_threshold_is_inclusive() {
        let kept = hsp(1, 90.0, 1e-20, (0, 100));
        let half = hsp(1, 50.0, 1e-5, (50, 150));
        assert!(half.is_enveloped_by(&kept, 0.5));
        assert!(!half.is_enveloped_by(&kept, 0.51));
    }
}
