//! Sorted-list seed index
//!
//! For one shape and a range of key partitions, the sorted list holds one
//! array of `(key remainder, position)` entries per partition, sorted by
//! remainder. Entries sharing a key form a contiguous run.
//!
//! Construction is two-pass and lock-free:
//!
//! 1. **Count**: the [`SeedHistogram`] gives the exact number of seeds every
//!    sequence chunk emits into every partition.
//! 2. **Allocate**: each partition array is allocated at its exact size and
//!    carved with `split_at_mut` into one disjoint window per chunk.
//! 3. **Fill**: one task per chunk re-runs the enumerator. Seeds are staged in
//!    a small per-partition buffer and copied into the chunk's own window when
//!    the buffer is full or the chunk is done. Windows never overlap, so tasks
//!    share nothing.
//! 4. **Sort**: every partition is sorted by remainder, in parallel.
//!
//! A chunk that writes more or fewer entries than it was counted for aborts
//! the build with a capacity error.

use rayon::prelude::*;
use tracing::debug;

use crate::builder::buckets::RunStatistics;
use crate::builder::enumerate::{SeedEnumerator, SeedSink};
use crate::builder::histogram::{SeedHistogram, SeedPartitionRange};
use crate::constants::WRITE_BUFFER_SIZE;
use crate::error::{Location, Phase, Result, SeedError};
use crate::sequence::PackedPosition;

/// One index entry: the key without its partition bits, and where it occurs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeedEntry {
    /// Key remainder (`key >> partition_bits`)
    pub key: u32,
    /// Seed position
    pub value: PackedPosition,
}

impl SeedEntry {
    /// Create an entry
    #[inline]
    pub const fn new(key: u32, value: PackedPosition) -> Self {
        Self { key, value }
    }
}

/// Sorted-list index of one shape over a range of key partitions
#[derive(Debug, Clone)]
pub struct SortedList {
    shape_id: usize,
    partition_bits: u32,
    range: SeedPartitionRange,
    partitions: Vec<Vec<SeedEntry>>,
}

impl SortedList {
    /// Build the sorted list of `shape_id` over `range` from a counted histogram
    ///
    /// # Errors
    /// `SeedError::Config` if the histogram was counted under a different
    /// partitioning or chunking; `SeedError::Capacity` if the fill pass
    /// disagrees with the counts.
    pub fn build(
        enumerator: &SeedEnumerator<'_>,
        histogram: &SeedHistogram,
        shape_id: usize,
        range: SeedPartitionRange,
    ) -> Result<Self> {
        let partition_bits = enumerator.config().partition_bits;
        check_histogram(enumerator, histogram, shape_id, range)?;

        let mut partitions = allocate(histogram, shape_id, range);
        debug!(
            "  shape {}: allocated {} entries for partitions {}..{}",
            shape_id,
            partitions.iter().map(Vec::len).sum::<usize>(),
            range.begin(),
            range.end()
        );

        fill(enumerator, histogram, shape_id, range, &mut partitions)?;

        partitions.par_iter_mut().for_each(|p| p.sort_by_key(|e| e.key));
        debug!("  shape {}: sorted {} partitions", shape_id, partitions.len());

        Ok(Self {
            shape_id,
            partition_bits,
            range,
            partitions,
        })
    }

    /// Shape this list indexes
    pub fn shape_id(&self) -> usize {
        self.shape_id
    }

    /// Number of key-partition bits
    pub fn partition_bits(&self) -> u32 {
        self.partition_bits
    }

    /// Partition range covered
    pub fn range(&self) -> SeedPartitionRange {
        self.range
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    /// Whether the list holds no entries
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    /// Entries of partition `p` (empty if `p` is outside the range)
    pub fn partition(&self, p: usize) -> &[SeedEntry] {
        if self.range.contains(p) {
            &self.partitions[p - self.range.begin()]
        } else {
            &[]
        }
    }

    /// Partition and remainder of a key
    #[inline]
    pub fn split_key(&self, key: u64) -> (usize, u64) {
        let mask = (1u64 << self.partition_bits) - 1;
        ((key & mask) as usize, key >> self.partition_bits)
    }

    /// Reassemble a full key from its partition and remainder
    #[inline]
    pub fn full_key(&self, partition: usize, remainder: u32) -> u64 {
        ((remainder as u64) << self.partition_bits) | partition as u64
    }

    /// The run of entries for `key`; empty if the key does not occur
    pub fn get(&self, key: u64) -> &[SeedEntry] {
        let (p, rem) = self.split_key(key);
        let Ok(rem) = u32::try_from(rem) else {
            return &[];
        };
        find_run(self.partition(p), rem)
    }

    /// Positions of `key`
    pub fn positions(&self, key: u64) -> impl Iterator<Item = PackedPosition> + '_ {
        self.get(key).iter().map(|e| e.value)
    }

    /// Whether `key` occurs
    pub fn contains(&self, key: u64) -> bool {
        !self.get(key).is_empty()
    }

    /// Runs of partition `p` in ascending key order
    pub fn runs(&self, p: usize) -> Runs<'_> {
        Runs {
            entries: self.partition(p),
            partition: p as u64,
            partition_bits: self.partition_bits,
        }
    }

    /// Runs of every partition in the range
    pub fn iter_runs(&self) -> impl Iterator<Item = (u64, &[SeedEntry])> + '_ {
        self.range.iter().flat_map(move |p| self.runs(p))
    }

    /// Check every partition holds exactly the entries counted for it
    pub fn verify_against(&self, histogram: &SeedHistogram) -> Result<()> {
        for p in self.range.iter() {
            let expected = histogram.partition_size(self.shape_id, p);
            let actual = self.partition(p).len() as u64;
            if expected != actual {
                return Err(SeedError::capacity(
                    Location::phase(Phase::Sort).shape(self.shape_id).partition(p),
                    format!("partition holds {} entries, histogram counted {}", actual, expected),
                ));
            }
        }
        Ok(())
    }

    /// Run length statistics
    pub fn run_statistics(&self) -> RunStatistics {
        self.range
            .iter()
            .into_par_iter()
            .map(|p| {
                let mut stats = RunStatistics::new();
                for (_, run) in self.runs(p) {
                    stats.add_run(run);
                }
                stats
            })
            .reduce(RunStatistics::new, |mut a, b| {
                a.merge(&b);
                a
            })
    }

    pub(crate) fn into_partitions(self) -> Vec<Vec<SeedEntry>> {
        self.partitions
    }
}

/// The run with remainder `rem` in a sorted partition
#[inline]
pub(crate) fn find_run(entries: &[SeedEntry], rem: u32) -> &[SeedEntry] {
    let start = entries.partition_point(|e| e.key < rem);
    let len = entries[start..].partition_point(|e| e.key == rem);
    &entries[start..start + len]
}

/// Iterator over the runs of one partition, yielding `(full key, run)`
pub struct Runs<'a> {
    entries: &'a [SeedEntry],
    partition: u64,
    partition_bits: u32,
}

impl<'a> Iterator for Runs<'a> {
    type Item = (u64, &'a [SeedEntry]);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.entries.first()?;
        let len = self.entries.partition_point(|e| e.key == first.key);
        let (run, rest) = self.entries.split_at(len);
        self.entries = rest;
        Some((((first.key as u64) << self.partition_bits) | self.partition, run))
    }
}

fn check_histogram(
    enumerator: &SeedEnumerator<'_>,
    histogram: &SeedHistogram,
    shape_id: usize,
    range: SeedPartitionRange,
) -> Result<()> {
    let location = Location::phase(Phase::Allocate).shape(shape_id);
    if shape_id >= histogram.num_shapes() || shape_id >= enumerator.num_shapes() {
        return Err(SeedError::config(location, "shape id out of range"));
    }
    if histogram.partition_bits() != enumerator.config().partition_bits {
        return Err(SeedError::config(
            location,
            format!(
                "histogram counted with {} partition bits, configuration uses {}",
                histogram.partition_bits(),
                enumerator.config().partition_bits
            ),
        ));
    }
    if histogram.chunk_bounds() != enumerator.chunk_bounds().as_slice() {
        return Err(SeedError::config(location, "histogram was counted over different sequence chunks"));
    }
    if range.end() > histogram.partition_count() {
        return Err(SeedError::config(
            location,
            format!("partition range ends at {} of {}", range.end(), histogram.partition_count()),
        ));
    }
    Ok(())
}

fn allocate(histogram: &SeedHistogram, shape_id: usize, range: SeedPartitionRange) -> Vec<Vec<SeedEntry>> {
    range
        .iter()
        .map(|p| vec![SeedEntry::default(); histogram.partition_size(shape_id, p) as usize])
        .collect()
}

fn fill(
    enumerator: &SeedEnumerator<'_>,
    histogram: &SeedHistogram,
    shape_id: usize,
    range: SeedPartitionRange,
    partitions: &mut [Vec<SeedEntry>],
) -> Result<()> {
    let num_chunks = histogram.num_chunks();
    let bounds = histogram.chunk_bounds();

    // windows[chunk][local partition]
    let mut windows: Vec<Vec<&mut [SeedEntry]>> =
        (0..num_chunks).map(|_| Vec::with_capacity(range.len())).collect();
    for (local, buffer) in partitions.iter_mut().enumerate() {
        let p = range.begin() + local;
        let mut rest: &mut [SeedEntry] = buffer.as_mut_slice();
        for (chunk, chunk_windows) in windows.iter_mut().enumerate() {
            let n = histogram.cell(shape_id, chunk, p) as usize;
            let (window, tail) = std::mem::take(&mut rest).split_at_mut(n);
            chunk_windows.push(window);
            rest = tail;
        }
    }

    windows
        .into_par_iter()
        .enumerate()
        .try_for_each(|(chunk, chunk_windows)| {
            let mut writer = BufferedWriter::new(chunk_windows, enumerator.config().partition_bits, shape_id, range, chunk);
            enumerator.enumerate_shape(bounds[chunk]..bounds[chunk + 1], shape_id, &mut writer);
            writer.into_result()
        })
}

/// Per-task staging buffers in front of the task's partition windows
struct BufferedWriter<'w> {
    windows: Vec<&'w mut [SeedEntry]>,
    cursors: Vec<usize>,
    buffers: Vec<[SeedEntry; WRITE_BUFFER_SIZE]>,
    lens: Vec<u8>,
    partition_bits: u32,
    mask: u64,
    shape_id: usize,
    range: SeedPartitionRange,
    chunk: usize,
    error: Option<SeedError>,
}

impl<'w> BufferedWriter<'w> {
    fn new(
        windows: Vec<&'w mut [SeedEntry]>,
        partition_bits: u32,
        shape_id: usize,
        range: SeedPartitionRange,
        chunk: usize,
    ) -> Self {
        let n = windows.len();
        Self {
            windows,
            cursors: vec![0; n],
            buffers: vec![[SeedEntry::default(); WRITE_BUFFER_SIZE]; n],
            lens: vec![0; n],
            partition_bits,
            mask: (1u64 << partition_bits) - 1,
            shape_id,
            range,
            chunk,
            error: None,
        }
    }

    fn location(&self, local: usize) -> Location {
        Location::phase(Phase::Fill)
            .shape(self.shape_id)
            .partition(self.range.begin() + local)
    }

    fn flush(&mut self, local: usize) {
        let len = self.lens[local] as usize;
        let cursor = self.cursors[local];
        let window_len = self.windows[local].len();
        if cursor + len > window_len {
            self.error = Some(SeedError::capacity(
                self.location(local),
                format!(
                    "chunk {} produced more than the {} entries counted",
                    self.chunk, window_len
                ),
            ));
            self.lens[local] = 0;
            return;
        }
        self.windows[local][cursor..cursor + len].copy_from_slice(&self.buffers[local][..len]);
        self.cursors[local] = cursor + len;
        self.lens[local] = 0;
    }

    fn into_result(self) -> Result<()> {
        if let Some(err) = self.error {
            return Err(err);
        }
        for (local, window) in self.windows.iter().enumerate() {
            if self.cursors[local] != window.len() {
                return Err(SeedError::capacity(
                    self.location(local),
                    format!(
                        "chunk {} produced {} entries, histogram counted {}",
                        self.chunk,
                        self.cursors[local],
                        window.len()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl SeedSink for BufferedWriter<'_> {
    #[inline]
    fn push(&mut self, key: u64, position: PackedPosition, _seq_id: u32, _shape_id: usize) -> bool {
        if self.error.is_some() {
            return false;
        }
        let p = (key & self.mask) as usize;
        if !self.range.contains(p) {
            return true;
        }
        let local = p - self.range.begin();
        // remainder width was checked against the codec at validation
        let entry = SeedEntry::new((key >> self.partition_bits) as u32, position);
        let len = self.lens[local] as usize;
        self.buffers[local][len] = entry;
        self.lens[local] += 1;
        if len + 1 == WRITE_BUFFER_SIZE {
            self.flush(local);
        }
        self.error.is_none()
    }

    fn finish(&mut self) {
        for local in 0..self.windows.len() {
            if self.lens[local] > 0 {
                self.flush(local);
            }
        }
    }
}
