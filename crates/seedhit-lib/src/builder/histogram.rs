//! Seed histogram
//!
//! The counting pass runs the enumerator once over every sequence chunk and
//! counts, per `(shape, chunk, key partition)`, how many seeds it emits. The
//! counts are exact and size the sorted-list buffers: the fill pass writes
//! exactly `counts[shape][chunk][partition]` entries into the window reserved
//! for that cell.
//!
//! [`ApproximateHistogram`] is a separate, explicitly approximate mode: a
//! Flajolet-Martin estimate of the number of *distinct* seeds per partition.
//! It only plans the initial size of hashed membership sets and is never used
//! to size index buffers.
//!
//! A histogram can be persisted with zero-run-length encoding (a negative
//! value stands for that many consecutive zero counts) and reused between
//! runs over the same sequences and configuration.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::builder::enumerate::{EnumerationStats, FnSink, SeedEnumerator};
use crate::constants::{MAX_PARTITION_BITS, MAX_SEQ_CHUNKS, MAX_SHAPES};
use crate::error::{Result, SeedError};
use crate::hasher::DeterministicHasher;

/// Magic bytes of a persisted histogram
const HISTOGRAM_MAGIC: &[u8; 8] = b"SEEDHIST";

/// Persisted histogram version
const HISTOGRAM_VERSION: u32 = 1;

/// Flajolet-Martin bias correction constant
pub const FM_PHI: f64 = 0.77351;

/// Number of stochastic-averaging registers per estimator
pub const FM_REGISTERS: usize = 16;

/// A contiguous range `[begin, end)` of key partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPartitionRange {
    begin: usize,
    end: usize,
}

impl SeedPartitionRange {
    /// Range `[begin, end)`
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end: end.max(begin) }
    }

    /// All `partition_count` partitions
    pub fn full(partition_count: usize) -> Self {
        Self::new(0, partition_count)
    }

    /// Split `partition_count` partitions into `chunks` contiguous ranges
    /// of near-equal length
    pub fn split(partition_count: usize, chunks: usize) -> Vec<Self> {
        let chunks = chunks.clamp(1, partition_count.max(1));
        (0..chunks)
            .map(|i| Self::new(partition_count * i / chunks, partition_count * (i + 1) / chunks))
            .collect()
    }

    /// First partition
    #[inline]
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// One past the last partition
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of partitions
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Whether the range is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Whether partition `p` is in the range
    #[inline]
    pub fn contains(&self, p: usize) -> bool {
        p >= self.begin && p < self.end
    }

    /// Iterate partitions
    pub fn iter(&self) -> std::ops::Range<usize> {
        self.begin..self.end
    }
}

/// Exact per-`(shape, chunk, partition)` seed counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedHistogram {
    partition_bits: u32,
    chunk_bounds: Vec<usize>,
    /// counts[shape][chunk][partition]
    counts: Vec<Vec<Vec<u64>>>,
    stats: EnumerationStats,
}

impl SeedHistogram {
    /// Count every seed the enumerator emits, one parallel task per chunk
    pub fn build(enumerator: &SeedEnumerator<'_>) -> Self {
        let partition_bits = enumerator.config().partition_bits;
        let partition_count = 1usize << partition_bits;
        let mask = (partition_count - 1) as u64;
        let num_shapes = enumerator.num_shapes();
        let chunk_bounds = enumerator.chunk_bounds();
        let num_chunks = chunk_bounds.len() - 1;

        let per_chunk: Vec<(Vec<Vec<u64>>, EnumerationStats)> = (0..num_chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut counts = vec![vec![0u64; partition_count]; num_shapes];
                let mut sink = FnSink::new(|key, _pos, _seq, shape_id| {
                    counts[shape_id][(key & mask) as usize] += 1;
                    true
                });
                let stats = enumerator.enumerate(chunk_bounds[chunk]..chunk_bounds[chunk + 1], &mut sink);
                (counts, stats)
            })
            .collect();

        let mut counts = vec![Vec::with_capacity(num_chunks); num_shapes];
        let mut stats = EnumerationStats::default();
        for (chunk_counts, chunk_stats) in per_chunk {
            stats.merge(&chunk_stats);
            for (shape, row) in chunk_counts.into_iter().enumerate() {
                counts[shape].push(row);
            }
        }

        let histogram = Self {
            partition_bits,
            chunk_bounds,
            counts,
            stats,
        };
        for shape in 0..num_shapes {
            debug!("  shape {}: {} seeds counted", shape, histogram.total(shape));
        }
        histogram
    }

    /// Number of key-partition bits
    pub fn partition_bits(&self) -> u32 {
        self.partition_bits
    }

    /// Number of key partitions
    pub fn partition_count(&self) -> usize {
        1usize << self.partition_bits
    }

    /// Number of shapes counted
    pub fn num_shapes(&self) -> usize {
        self.counts.len()
    }

    /// Number of sequence chunks
    pub fn num_chunks(&self) -> usize {
        self.chunk_bounds.len() - 1
    }

    /// Sequence chunk boundaries the counts were taken over
    pub fn chunk_bounds(&self) -> &[usize] {
        &self.chunk_bounds
    }

    /// Per-chunk partition counts of one shape
    pub fn counts(&self, shape: usize) -> &[Vec<u64>] {
        &self.counts[shape]
    }

    /// Seeds of `shape` emitted by `chunk` into `partition`
    #[inline]
    pub fn cell(&self, shape: usize, chunk: usize, partition: usize) -> u64 {
        self.counts[shape][chunk][partition]
    }

    /// Seeds of `shape` in `partition`, summed over chunks
    pub fn partition_size(&self, shape: usize, partition: usize) -> u64 {
        self.counts[shape].iter().map(|row| row[partition]).sum()
    }

    /// Seeds of `shape` in the partitions of `range`
    pub fn range_size(&self, shape: usize, range: SeedPartitionRange) -> u64 {
        range.iter().map(|p| self.partition_size(shape, p)).sum()
    }

    /// All seeds of `shape`
    pub fn total(&self, shape: usize) -> u64 {
        self.counts[shape].iter().flatten().sum()
    }

    /// Largest number of entries any one `(shape, range)` build will hold
    pub fn max_chunk_size(&self, ranges: &[SeedPartitionRange]) -> u64 {
        (0..self.num_shapes())
            .flat_map(|shape| ranges.iter().map(move |&r| (shape, r)))
            .map(|(shape, range)| self.range_size(shape, range))
            .max()
            .unwrap_or(0)
    }

    /// Enumeration counters of the counting pass
    pub fn stats(&self) -> &EnumerationStats {
        &self.stats
    }

    /// Write the histogram with zero-run-length encoding
    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(HISTOGRAM_MAGIC)?;
        writer.write_all(&HISTOGRAM_VERSION.to_le_bytes())?;
        writer.write_all(&self.partition_bits.to_le_bytes())?;
        writer.write_all(&(self.num_shapes() as u32).to_le_bytes())?;
        writer.write_all(&(self.num_chunks() as u32).to_le_bytes())?;
        for &bound in &self.chunk_bounds {
            writer.write_all(&(bound as u64).to_le_bytes())?;
        }

        let mut zeros: i64 = 0;
        for &count in self.counts.iter().flatten().flatten() {
            if count == 0 {
                zeros += 1;
                continue;
            }
            if zeros > 0 {
                writer.write_all(&(-zeros).to_le_bytes())?;
                zeros = 0;
            }
            let value = i64::try_from(count)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "histogram count overflows i64"))?;
            writer.write_all(&value.to_le_bytes())?;
        }
        if zeros > 0 {
            writer.write_all(&(-zeros).to_le_bytes())?;
        }
        Ok(())
    }

    /// Read a histogram written by [`SeedHistogram::write`]
    pub fn read(reader: &mut dyn Read) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != HISTOGRAM_MAGIC {
            return Err(invalid("invalid magic number for seed histogram".to_string()));
        }
        let version = read_u32(reader)?;
        if version != HISTOGRAM_VERSION {
            return Err(invalid(format!(
                "unsupported histogram version {} (expected {})",
                version, HISTOGRAM_VERSION
            )));
        }
        let partition_bits = read_u32(reader)?;
        if partition_bits > MAX_PARTITION_BITS {
            return Err(invalid(format!("invalid partition bits {}", partition_bits)));
        }
        let num_shapes = read_u32(reader)? as usize;
        if num_shapes > MAX_SHAPES {
            return Err(invalid(format!("{} shapes exceed the maximum of {}", num_shapes, MAX_SHAPES)));
        }
        let num_chunks = read_u32(reader)? as usize;
        if num_chunks > MAX_SEQ_CHUNKS {
            return Err(invalid(format!(
                "{} sequence chunks exceed the maximum of {}",
                num_chunks, MAX_SEQ_CHUNKS
            )));
        }
        let mut chunk_bounds = Vec::new();
        for _ in 0..=num_chunks {
            chunk_bounds.push(read_u64(reader)? as usize);
        }
        if chunk_bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(invalid("chunk bounds are not monotone".to_string()));
        }

        let partition_count = 1usize << partition_bits;
        let total = num_shapes
            .checked_mul(num_chunks)
            .and_then(|n| n.checked_mul(partition_count))
            .ok_or_else(|| invalid("histogram dimensions overflow".to_string()))?;
        let mut flat: Vec<u64> = Vec::new();
        while flat.len() < total {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            let value = i64::from_le_bytes(buf);
            if value < 0 {
                let run = usize::try_from(value.unsigned_abs())
                    .ok()
                    .filter(|&run| run <= total - flat.len())
                    .ok_or_else(|| invalid("zero run exceeds histogram size".to_string()))?;
                flat.try_reserve(run)
                    .map_err(|e| invalid(format!("cannot hold {} histogram cells: {}", total, e)))?;
                flat.resize(flat.len() + run, 0);
            } else {
                flat.push(value as u64);
            }
        }

        let mut cells = flat.chunks_exact(partition_count.max(1));
        let mut counts = Vec::with_capacity(num_shapes);
        for _ in 0..num_shapes {
            let mut rows = Vec::with_capacity(num_chunks);
            for _ in 0..num_chunks {
                let row = cells
                    .next()
                    .ok_or_else(|| invalid("histogram truncated".to_string()))?;
                rows.push(row.to_vec());
            }
            counts.push(rows);
        }

        Ok(Self {
            partition_bits,
            chunk_bounds,
            counts,
            stats: EnumerationStats::default(),
        })
    }

    /// Save to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| SeedError::io(path, "create histogram", e))?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| SeedError::io(path, "write histogram", e))?;
        info!("Saved seed histogram to {}", path.display());
        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SeedError::io(path, "open histogram", e))?;
        let mut reader = BufReader::new(file);
        Self::read(&mut reader).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => SeedError::format(path, e.to_string()),
            _ => SeedError::io(path, "read histogram", e),
        })
    }
}

fn read_u32(reader: &mut dyn Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut dyn Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Probabilistic distinct counter (PCSA with stochastic averaging)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlajoletMartin {
    bitmaps: [u64; FM_REGISTERS],
}

impl FlajoletMartin {
    /// Record one hashed item
    #[inline]
    pub fn add(&mut self, hash: u64) {
        let register = (hash as usize) & (FM_REGISTERS - 1);
        let rank = (hash >> FM_REGISTERS.trailing_zeros()).trailing_zeros().min(63);
        self.bitmaps[register] |= 1u64 << rank;
    }

    /// Combine with another estimator over a disjoint or overlapping stream
    pub fn merge(&mut self, other: &FlajoletMartin) {
        for (a, b) in self.bitmaps.iter_mut().zip(other.bitmaps.iter()) {
            *a |= *b;
        }
    }

    /// Estimated number of distinct items
    pub fn estimate(&self) -> u64 {
        if self.bitmaps.iter().all(|&b| b == 0) {
            return 0;
        }
        let m = FM_REGISTERS as f64;
        let mean_rank = self.bitmaps.iter().map(|b| b.trailing_ones() as f64).sum::<f64>() / m;
        (m / FM_PHI * mean_rank.exp2()).round() as u64
    }
}

/// Approximate distinct-seed counts per `(shape, partition)`
#[derive(Debug, Clone)]
pub struct ApproximateHistogram {
    estimates: Vec<Vec<u64>>,
}

impl ApproximateHistogram {
    /// Estimate distinct seeds, one parallel task per chunk
    pub fn build(enumerator: &SeedEnumerator<'_>) -> Self {
        let partition_count = enumerator.config().partition_count();
        let mask = (partition_count - 1) as u64;
        let num_shapes = enumerator.num_shapes();
        let hasher = DeterministicHasher::new(enumerator.config().hash_seed.rotate_left(17));
        let chunk_bounds = enumerator.chunk_bounds();

        let merged = (0..chunk_bounds.len() - 1)
            .into_par_iter()
            .map(|chunk| {
                let mut sketches = vec![vec![FlajoletMartin::default(); partition_count]; num_shapes];
                let mut sink = FnSink::new(|key, _pos, _seq, shape_id| {
                    sketches[shape_id][(key & mask) as usize].add(hasher.hash_key(key));
                    true
                });
                enumerator.enumerate(chunk_bounds[chunk]..chunk_bounds[chunk + 1], &mut sink);
                sketches
            })
            .reduce(
                || vec![vec![FlajoletMartin::default(); partition_count]; num_shapes],
                |mut a, b| {
                    for (row_a, row_b) in a.iter_mut().zip(b.iter()) {
                        for (x, y) in row_a.iter_mut().zip(row_b.iter()) {
                            x.merge(y);
                        }
                    }
                    a
                },
            );

        let estimates = merged
            .iter()
            .map(|row| row.iter().map(FlajoletMartin::estimate).collect())
            .collect();
        Self { estimates }
    }

    /// Approximate distinct seeds of `shape` in `partition`
    pub fn estimate(&self, shape: usize, partition: usize) -> u64 {
        self.estimates[shape][partition]
    }

    /// Approximate distinct seeds of `shape`
    pub fn total(&self, shape: usize) -> u64 {
        self.estimates[shape].iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::config::IndexConfig;
    use crate::encoding::Reduction;
    use crate::sequence::SequenceSet;

    fn setup() -> (SequenceSet, IndexConfig) {
        let config = IndexConfig {
            reduction: Reduction::new("A C D E F G H I").unwrap(),
            partition_bits: 2,
            seq_chunks: 3,
            ..IndexConfig::new(&["11", "101"]).unwrap()
        };
        let seqs = SequenceSet::from_residues(
            ["ACDEFGHI", "IHGFEDCA", "AAAAAA", "ACXDE", "C", "GGHHIIAACC"],
            &config.reduction,
        )
        .unwrap();
        (seqs, config)
    }

    #[test]
    fn test_counts_match_emitted_seeds() {
        let (seqs, config) = setup();
        let e = SeedEnumerator::new(&seqs, &config).unwrap();
        let hist = SeedHistogram::build(&e);
        for shape in 0..2 {
            let mut emitted = 0u64;
            let mut sink = FnSink::new(|_, _, _, _| {
                emitted += 1;
                true
            });
            e.enumerate_shape(0..seqs.len(), shape, &mut sink);
            assert_eq!(hist.total(shape), emitted);
        }
        assert_eq!(hist.num_chunks(), 3);
        assert_eq!(hist.stats().emitted, hist.total(0) + hist.total(1));
    }

    #[test]
    fn test_partition_size_sums_chunks() {
        let (seqs, config) = setup();
        let e = SeedEnumerator::new(&seqs, &config).unwrap();
        let hist = SeedHistogram::build(&e);
        let by_partition: u64 = (0..4).map(|p| hist.partition_size(0, p)).sum();
        assert_eq!(by_partition, hist.total(0));
        let whole = SeedPartitionRange::full(4);
        assert_eq!(hist.range_size(0, whole), hist.total(0));
        assert_eq!(hist.max_chunk_size(&[whole]), hist.total(0).max(hist.total(1)));
    }

    #[test]
    fn test_partition_range_split() {
        let ranges = SeedPartitionRange::split(256, 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].begin(), 0);
        assert_eq!(ranges[2].end(), 256);
        assert!(ranges.windows(2).all(|w| w[0].end() == w[1].begin()));
        assert_eq!(ranges.iter().map(SeedPartitionRange::len).sum::<usize>(), 256);
        assert_eq!(SeedPartitionRange::split(2, 8).len(), 2);
        assert!(ranges[1].contains(ranges[1].begin()));
        assert!(!ranges[1].contains(ranges[1].end()));
    }

    #[test]
    fn test_zero_rle_roundtrip() {
        let (seqs, config) = setup();
        let e = SeedEnumerator::new(&seqs, &config).unwrap();
        let hist = SeedHistogram::build(&e);
        let mut buf = Vec::new();
        hist.write(&mut buf).unwrap();
        let restored = SeedHistogram::read(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.counts, hist.counts);
        assert_eq!(restored.chunk_bounds(), hist.chunk_bounds());
    }

    #[test]
    fn test_zero_runs_are_compact() {
        let hist = SeedHistogram {
            partition_bits: 8,
            chunk_bounds: vec![0, 1],
            counts: vec![vec![{
                let mut row = vec![0u64; 256];
                row[100] = 7;
                row
            }]],
            stats: EnumerationStats::default(),
        };
        let mut buf = Vec::new();
        hist.write(&mut buf).unwrap();
        // header 24 + bounds 16 + three values (-100, 7, -155)
        assert_eq!(buf.len(), 24 + 16 + 3 * 8);
        let restored = SeedHistogram::read(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.cell(0, 0, 100), 7);
        assert_eq!(restored.total(0), 7);
    }

    #[test]
    fn test_read_rejects_bad_magic() {
        let buf = b"NOTAHIST\x01\x00\x00\x00".to_vec();
        let err = SeedHistogram::read(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    fn header(partition_bits: u32, num_shapes: u32, num_chunks: u32) -> Vec<u8> {
        let mut buf = HISTOGRAM_MAGIC.to_vec();
        for field in [HISTOGRAM_VERSION, partition_bits, num_shapes, num_chunks] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_read_rejects_oversized_dimensions() {
        let mut buf = header(16, u32::MAX, 1);
        buf.extend_from_slice(&[0u8; 16]);
        let err = SeedHistogram::read(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("shapes"));

        let buf = header(16, 1, u32::MAX);
        let err = SeedHistogram::read(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("chunks"));
    }

    #[test]
    fn test_read_rejects_oversized_zero_run() {
        let mut buf = header(2, 1, 1);
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&5u64.to_le_bytes());
        buf.extend_from_slice(&i64::MIN.to_le_bytes());
        let err = SeedHistogram::read(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("zero run"));
    }

    #[test]
    fn test_flajolet_martin_estimate_order_of_magnitude() {
        let hasher = DeterministicHasher::new(7);
        let mut fm = FlajoletMartin::default();
        assert_eq!(fm.estimate(), 0);
        for key in 0..10_000u64 {
            fm.add(hasher.hash_key(key));
            // duplicates do not change the sketch
            fm.add(hasher.hash_key(key));
        }
        let est = fm.estimate() as f64;
        assert!(est > 2_500.0 && est < 40_000.0, "estimate {}", est);
    }

    #[test]
    fn test_approximate_histogram_is_labelled_distinct() {
        let (seqs, config) = setup();
        let e = SeedEnumerator::new(&seqs, &config).unwrap();
        let approx = ApproximateHistogram::build(&e);
        let exact = SeedHistogram::build(&e);
        // the repeated AA seeds collapse in the distinct estimate
        assert!(approx.total(0) > 0);
        assert!(exact.total(0) > 0);
        for p in 0..4 {
            if exact.partition_size(0, p) == 0 {
                assert_eq!(approx.estimate(0, p), 0);
            }
        }
    }
}
