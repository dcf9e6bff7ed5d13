//! Seed enumeration
//!
//! The enumerator walks a range of sequences and, for every active shape,
//! reports the seeds selected by the extraction policy to a caller-supplied
//! [`SeedSink`]. Within one sequence and shape, seeds arrive in increasing
//! offset order. Each call is a fresh traversal; the enumerator holds no
//! per-call state, so the counting and filling passes can run it twice over
//! the same chunk and observe exactly the same seeds.
//!
//! Offsets are skipped (not reported as errors) when an informative
//! position is masked, when the seed fails the complexity cut, or when the
//! optional [`SeedFilter`] rejects the key.

use std::ops::Range;

use ahash::AHashSet;

use crate::builder::config::{ExtractionPolicy, IndexConfig};
use crate::constants::MAX_SEED_WEIGHT;
use crate::error::{Location, Phase, Result, SeedError};
use crate::hasher::DeterministicHasher;
use crate::minimizer::MinimizerIterator;
use crate::sequence::{PackedPosition, SequenceSet};
use crate::shape::SeedCodec;

/// Receiver of enumerated seeds
pub trait SeedSink {
    /// Accept one seed. Returning `false` stops enumeration of the current
    /// sequence for the current shape; other sequences are unaffected.
    fn push(&mut self, key: u64, position: PackedPosition, seq_id: u32, shape_id: usize) -> bool;

    /// Called once after the enumerated range is exhausted
    fn finish(&mut self) {}
}

/// Adapter turning a closure into a [`SeedSink`]
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: FnMut(u64, PackedPosition, u32, usize) -> bool,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SeedSink for FnSink<F>
where
    F: FnMut(u64, PackedPosition, u32, usize) -> bool,
{
    #[inline]
    fn push(&mut self, key: u64, position: PackedPosition, seq_id: u32, shape_id: usize) -> bool {
        (self.0)(key, position, seq_id, shape_id)
    }
}

/// Membership test gating which seeds are enumerated
pub trait SeedFilter: Sync {
    /// Whether `key` of shape `shape_id` may be enumerated
    fn contains(&self, key: u64, shape_id: usize) -> bool;
}

/// Filter accepting every seed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl SeedFilter for NoFilter {
    #[inline]
    fn contains(&self, _key: u64, _shape_id: usize) -> bool {
        true
    }
}

/// Counters describing one enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    /// Seeds handed to the sink
    pub emitted: u64,
    /// Offsets whose window touched a masked residue
    pub masked: u64,
    /// Offsets rejected by the complexity cut
    pub low_complexity: u64,
    /// Selected seeds rejected by the seed filter
    pub filtered: u64,
    /// Sequences skipped by the skip list or the length cut
    pub skipped_sequences: u64,
}

impl EnumerationStats {
    /// Add the counters of another enumeration
    pub fn merge(&mut self, other: &EnumerationStats) {
        self.emitted += other.emitted;
        self.masked += other.masked;
        self.low_complexity += other.low_complexity;
        self.filtered += other.filtered;
        self.skipped_sequences += other.skipped_sequences;
    }
}

enum SeedCheck {
    Valid(u64),
    Masked,
    LowComplexity,
}

/// Enumerates the seeds of a sequence set under one configuration
pub struct SeedEnumerator<'a> {
    sequences: &'a SequenceSet,
    config: &'a IndexConfig,
    codecs: Vec<SeedCodec>,
    filter: &'a dyn SeedFilter,
    skip: Option<&'a [bool]>,
    lnfact: [f64; MAX_SEED_WEIGHT + 1],
    hasher: DeterministicHasher,
}

impl<'a> SeedEnumerator<'a> {
    /// Create an enumerator over `sequences`
    ///
    /// # Errors
    /// `SeedError::Config` if the configuration is invalid or its encoding is
    /// unsupported for the active alphabet.
    pub fn new(sequences: &'a SequenceSet, config: &'a IndexConfig) -> Result<Self> {
        config.validate()?;
        let codecs = config.codecs()?;
        let mut lnfact = [0.0f64; MAX_SEED_WEIGHT + 1];
        for i in 1..=MAX_SEED_WEIGHT {
            lnfact[i] = lnfact[i - 1] + (i as f64).ln();
        }
        Ok(Self {
            sequences,
            config,
            codecs,
            filter: &NoFilter,
            skip: None,
            lnfact,
            hasher: DeterministicHasher::new(config.hash_seed),
        })
    }

    /// Only enumerate seeds accepted by `filter`
    pub fn with_filter(mut self, filter: &'a dyn SeedFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Skip every sequence `i` with `skip[i] == true`
    ///
    /// # Errors
    /// `SeedError::Config` if the skip list length differs from the number
    /// of sequences.
    pub fn with_skip(mut self, skip: &'a [bool]) -> Result<Self> {
        if skip.len() != self.sequences.len() {
            return Err(SeedError::config(
                Location::phase(Phase::Enumerate),
                format!(
                    "skip list has {} entries for {} sequences",
                    skip.len(),
                    self.sequences.len()
                ),
            ));
        }
        self.skip = Some(skip);
        Ok(self)
    }

    /// The sequences being enumerated
    pub fn sequences(&self) -> &'a SequenceSet {
        self.sequences
    }

    /// The configuration in effect
    pub fn config(&self) -> &'a IndexConfig {
        self.config
    }

    /// One compiled codec per shape
    pub fn codecs(&self) -> &[SeedCodec] {
        &self.codecs
    }

    /// Number of active shapes
    pub fn num_shapes(&self) -> usize {
        self.codecs.len()
    }

    /// Letter-balanced sequence chunk boundaries for the parallel passes
    pub fn chunk_bounds(&self) -> Vec<usize> {
        self.sequences.partition(self.config.seq_chunks)
    }

    /// Enumerate all shapes over sequences `seqs`
    pub fn enumerate<S: SeedSink>(&self, seqs: Range<usize>, sink: &mut S) -> EnumerationStats {
        self.enumerate_shapes(seqs, 0..self.codecs.len(), sink)
    }

    /// Enumerate one shape over sequences `seqs`
    pub fn enumerate_shape<S: SeedSink>(&self, seqs: Range<usize>, shape_id: usize, sink: &mut S) -> EnumerationStats {
        self.enumerate_shapes(seqs, shape_id..shape_id + 1, sink)
    }

    /// Enumerate shapes `shapes` over sequences `seqs`, then call `finish`
    pub fn enumerate_shapes<S: SeedSink>(
        &self,
        seqs: Range<usize>,
        shapes: Range<usize>,
        sink: &mut S,
    ) -> EnumerationStats {
        let mut stats = EnumerationStats::default();
        let mut keys: Vec<Option<u64>> = Vec::new();
        for seq_id in seqs {
            if !self.is_indexed(seq_id) {
                stats.skipped_sequences += 1;
                continue;
            }
            for shape_id in shapes.clone() {
                match self.config.extraction {
                    ExtractionPolicy::Exact => self.enumerate_exact(seq_id, shape_id, sink, &mut stats),
                    ExtractionPolicy::Minimizer { window } => {
                        self.enumerate_minimizers(seq_id, shape_id, window, &mut keys, sink, &mut stats)
                    }
                    ExtractionPolicy::Sketch { size } => {
                        self.enumerate_sketch(seq_id, shape_id, size, sink, &mut stats)
                    }
                }
            }
        }
        sink.finish();
        stats
    }

    fn is_indexed(&self, seq_id: usize) -> bool {
        if self.skip.is_some_and(|skip| skip[seq_id]) {
            return false;
        }
        self.sequences.seq_len(seq_id) >= self.config.min_seq_len
    }

    #[inline]
    fn check(&self, codec: &SeedCodec, window: &[u8]) -> SeedCheck {
        let Some(key) = codec.encode(window) else {
            return SeedCheck::Masked;
        };
        if !self.is_complex(codec, window) {
            return SeedCheck::LowComplexity;
        }
        SeedCheck::Valid(key)
    }

    /// Composition entropy `ln(w!) - sum(ln(c_i!))` against the configured cut
    fn is_complex(&self, codec: &SeedCodec, window: &[u8]) -> bool {
        if self.config.complexity_cut <= 0.0 {
            return true;
        }
        let mut letters = [0u8; MAX_SEED_WEIGHT];
        let weight = codec.informative_letters(window, &mut letters);
        let letters = &mut letters[..weight];
        letters.sort_unstable();
        let mut entropy = self.lnfact[weight];
        for run in letters.chunk_by(|a, b| a == b) {
            entropy -= self.lnfact[run.len()];
        }
        entropy >= self.config.complexity_cut
    }

    fn offsets(&self, seq_id: usize, codec: &SeedCodec) -> Range<usize> {
        let len = self.sequences.seq_len(seq_id);
        if len < codec.length() {
            0..0
        } else {
            0..len - codec.length() + 1
        }
    }

    fn enumerate_exact<S: SeedSink>(&self, seq_id: usize, shape_id: usize, sink: &mut S, stats: &mut EnumerationStats) {
        let codec = &self.codecs[shape_id];
        let seq = self.sequences.get(seq_id);
        for offset in self.offsets(seq_id, codec) {
            match self.check(codec, &seq[offset..]) {
                SeedCheck::Masked => stats.masked += 1,
                SeedCheck::LowComplexity => stats.low_complexity += 1,
                SeedCheck::Valid(key) => {
                    if !self.emit(key, seq_id, offset, shape_id, sink, stats) {
                        break;
                    }
                }
            }
        }
    }

    fn enumerate_minimizers<S: SeedSink>(
        &self,
        seq_id: usize,
        shape_id: usize,
        window: usize,
        keys: &mut Vec<Option<u64>>,
        sink: &mut S,
        stats: &mut EnumerationStats,
    ) {
        let codec = &self.codecs[shape_id];
        let seq = self.sequences.get(seq_id);
        keys.clear();
        for offset in self.offsets(seq_id, codec) {
            keys.push(match self.check(codec, &seq[offset..]) {
                SeedCheck::Valid(key) => Some(key),
                SeedCheck::Masked => {
                    stats.masked += 1;
                    None
                }
                SeedCheck::LowComplexity => {
                    stats.low_complexity += 1;
                    None
                }
            });
        }
        let keys: &[Option<u64>] = keys;
        for offset in MinimizerIterator::new(keys, window) {
            let Some(key) = keys[offset] else { continue };
            if !self.emit(key, seq_id, offset, shape_id, sink, stats) {
                break;
            }
        }
    }

    fn enumerate_sketch<S: SeedSink>(
        &self,
        seq_id: usize,
        shape_id: usize,
        size: usize,
        sink: &mut S,
        stats: &mut EnumerationStats,
    ) {
        let codec = &self.codecs[shape_id];
        let seq = self.sequences.get(seq_id);
        let mut seen = AHashSet::new();
        // (hash, key, offset) of the first occurrence of every key
        let mut candidates: Vec<(u64, u64, usize)> = Vec::new();
        for offset in self.offsets(seq_id, codec) {
            match self.check(codec, &seq[offset..]) {
                SeedCheck::Masked => stats.masked += 1,
                SeedCheck::LowComplexity => stats.low_complexity += 1,
                SeedCheck::Valid(key) => {
                    if seen.insert(key) {
                        candidates.push((self.hasher.hash_key(key), key, offset));
                    }
                }
            }
        }
        candidates.sort_unstable();
        candidates.truncate(size);
        candidates.sort_unstable_by_key(|&(_, _, offset)| offset);
        for (_, key, offset) in candidates {
            if !self.emit(key, seq_id, offset, shape_id, sink, stats) {
                break;
            }
        }
    }

    /// Hand one seed to the sink, returns `false` to stop the sequence
    #[inline]
    fn emit<S: SeedSink>(
        &self,
        key: u64,
        seq_id: usize,
        offset: usize,
        shape_id: usize,
        sink: &mut S,
        stats: &mut EnumerationStats,
    ) -> bool {
        if !self.filter.contains(key, shape_id) {
            stats.filtered += 1;
            return true;
        }
        stats.emitted += 1;
        // sequence ids and offsets were bounds-checked when the set was built
        let position = PackedPosition::new(seq_id as u32, offset as u32);
        sink.push(key, position, seq_id as u32, shape_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Reduction;

    fn config(codes: &[&str]) -> IndexConfig {
        IndexConfig {
            reduction: Reduction::new("A C D E F G H I").unwrap(),
            partition_bits: 1,
            seq_chunks: 2,
            ..IndexConfig::new(codes).unwrap()
        }
    }

    fn collect(e: &SeedEnumerator<'_>, seqs: Range<usize>) -> Vec<(u64, PackedPosition, usize)> {
        let mut out = Vec::new();
        let mut sink = FnSink::new(|key, pos, _seq, shape| {
            out.push((key, pos, shape));
            true
        });
        e.enumerate(seqs, &mut sink);
        out
    }

    #[test]
    fn test_exact_enumeration_counts_every_window() {
        let cfg = config(&["11"]);
        let seqs = SequenceSet::from_residues(["ACDE", "FG", "H"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let seeds = collect(&e, 0..seqs.len());
        // 3 windows in seq 0, 1 in seq 1, none in seq 2
        assert_eq!(seeds.len(), 4);
        // A=0, C=1 -> 0 * 8 + 1
        assert_eq!(seeds[0], (1, PackedPosition::new(0, 0), 0));
        assert_eq!(seeds[3].1, PackedPosition::new(1, 0));
    }

    #[test]
    fn test_masked_windows_are_skipped() {
        let cfg = config(&["11"]);
        let seqs = SequenceSet::from_residues(["ACXDE"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let mut sink = FnSink::new(|_, _, _, _| true);
        let stats = e.enumerate(0..1, &mut sink);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.masked, 2);
    }

    #[test]
    fn test_sink_rejection_stops_only_current_sequence() {
        let cfg = config(&["11"]);
        let seqs = SequenceSet::from_residues(["ACDEF", "ACDEF"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let mut per_seq = [0usize; 2];
        let mut sink = FnSink::new(|_, _, seq: u32, _| {
            per_seq[seq as usize] += 1;
            per_seq[seq as usize] < 2
        });
        e.enumerate(0..2, &mut sink);
        assert_eq!(per_seq, [2, 2]);
    }

    #[test]
    fn test_finish_called_once() {
        struct Counting {
            pushed: usize,
            finished: usize,
        }
        impl SeedSink for Counting {
            fn push(&mut self, _: u64, _: PackedPosition, _: u32, _: usize) -> bool {
                self.pushed += 1;
                true
            }
            fn finish(&mut self) {
                self.finished += 1;
            }
        }
        let cfg = config(&["11", "101"]);
        let seqs = SequenceSet::from_residues(["ACDEF"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let mut sink = Counting { pushed: 0, finished: 0 };
        e.enumerate(0..1, &mut sink);
        assert_eq!(sink.pushed, 4 + 3);
        assert_eq!(sink.finished, 1);
    }

    #[test]
    fn test_complexity_cut_rejects_repeats() {
        let mut cfg = config(&["1111"]);
        // entropy of AAAA is 0, of ACDE is ln(24)
        cfg.complexity_cut = 1.0;
        let seqs = SequenceSet::from_residues(["AAAA", "ACDE"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let mut sink = FnSink::new(|_, _, _, _| true);
        let stats = e.enumerate(0..2, &mut sink);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.low_complexity, 1);
    }

    #[test]
    fn test_skip_list_and_min_length() {
        let mut cfg = config(&["11"]);
        cfg.min_seq_len = 3;
        let seqs = SequenceSet::from_residues(["ACD", "AC", "ACDE"], &cfg.reduction).unwrap();
        let skip = [false, false, true];
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap().with_skip(&skip).unwrap();
        let seeds = collect(&e, 0..3);
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|s| s.1.seq_id() == 0));
        assert!(SeedEnumerator::new(&seqs, &cfg).unwrap().with_skip(&[true]).is_err());
    }

    #[test]
    fn test_filter_rejects_keys() {
        struct OnlyKey(u64);
        impl SeedFilter for OnlyKey {
            fn contains(&self, key: u64, _shape_id: usize) -> bool {
                key == self.0
            }
        }
        let cfg = config(&["11"]);
        let seqs = SequenceSet::from_residues(["ACAC"], &cfg.reduction).unwrap();
        let filter = OnlyKey(1);
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap().with_filter(&filter);
        let seeds = collect(&e, 0..1);
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|s| s.0 == 1));
    }

    #[test]
    fn test_enumeration_is_restartable() {
        for extraction in [
            ExtractionPolicy::Exact,
            ExtractionPolicy::Minimizer { window: 3 },
            ExtractionPolicy::Sketch { size: 4 },
        ] {
            let cfg = IndexConfig { extraction, ..config(&["111"]) };
            let seqs = SequenceSet::from_residues(["ACDEFGHIACDEFGHHHA", "GGGHHHIIIAAC"], &cfg.reduction).unwrap();
            let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
            let first = collect(&e, 0..2);
            let second = collect(&e, 0..2);
            assert_eq!(first, second);
            for seq in 0..2u32 {
                let offsets: Vec<u32> = first
                    .iter()
                    .filter(|s| s.1.seq_id() == seq)
                    .map(|s| s.1.offset())
                    .collect();
                assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{} not ordered", extraction);
            }
        }
    }

    #[test]
    fn test_sketch_bounds_seeds_per_sequence() {
        let cfg = IndexConfig { extraction: ExtractionPolicy::Sketch { size: 3 }, ..config(&["11"]) };
        let seqs = SequenceSet::from_residues(["ACDEFGHIAC"], &cfg.reduction).unwrap();
        let e = SeedEnumerator::new(&seqs, &cfg).unwrap();
        let seeds = collect(&e, 0..1);
        assert_eq!(seeds.len(), 3);
        let keys: AHashSet<u64> = seeds.iter().map(|s| s.0).collect();
        assert_eq!(keys.len(), 3);
    }
}
