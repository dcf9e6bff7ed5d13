//! Index builder orchestration
//!
//! Coordinates the phases of seed index construction:
//! 1. Count seeds per `(shape, sequence chunk, key partition)`
//! 2. Allocate, fill and sort one sorted list per `(partition range, shape)`
//! 3. Optionally turn each sorted list into hash tables
//!
//! Every phase runs inside a rayon pool sized by `IndexConfig::num_threads`
//! and joins before the next one starts.

use rayon::ThreadPool;
use tracing::info;

use crate::builder::buckets::RunStatistics;
use crate::builder::config::IndexConfig;
use crate::builder::enumerate::{SeedEnumerator, SeedFilter};
use crate::builder::histogram::{SeedHistogram, SeedPartitionRange};
use crate::error::{Location, Phase, Result, SeedError};
use crate::hash_table::HashTableIndex;
use crate::seed_filter::{HashedSeedSet, SeedBitset};
use crate::sequence::SequenceSet;
use crate::sorted_list::SortedList;

/// Builder for sorted-list and hash-table seed indexes
pub struct IndexBuilder<'f> {
    config: IndexConfig,
    filter: Option<&'f dyn SeedFilter>,
    skip: Option<Vec<bool>>,
}

impl IndexBuilder<'static> {
    /// Create a new index builder with the given configuration
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filter: None,
            skip: None,
        })
    }
}

impl<'f> IndexBuilder<'f> {
    /// Only index seeds accepted by `filter`
    pub fn with_filter<'g>(self, filter: &'g dyn SeedFilter) -> IndexBuilder<'g> {
        IndexBuilder {
            config: self.config,
            filter: Some(filter),
            skip: self.skip,
        }
    }

    /// Skip every sequence `i` with `skip[i] == true`
    pub fn with_skip(mut self, skip: Vec<bool>) -> Self {
        self.skip = Some(skip);
        self
    }

    /// The configuration in effect
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build a rayon thread pool sized to `config.num_threads`
    /// (0 means all cores).
    fn thread_pool(&self) -> Result<ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| {
                SeedError::config(
                    Location::phase(Phase::Validate),
                    format!("failed to create thread pool: {e}"),
                )
            })
    }

    fn enumerator<'a>(&'a self, sequences: &'a SequenceSet) -> Result<SeedEnumerator<'a>> {
        let mut enumerator = SeedEnumerator::new(sequences, &self.config)?;
        if let Some(filter) = self.filter {
            enumerator = enumerator.with_filter(filter);
        }
        if let Some(skip) = &self.skip {
            enumerator = enumerator.with_skip(skip)?;
        }
        Ok(enumerator)
    }

    /// Count the seeds of every shape
    pub fn count(&self, sequences: &SequenceSet) -> Result<SeedHistogram> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            Ok(self.count_inner(&enumerator))
        })
    }

    fn count_inner(&self, enumerator: &SeedEnumerator<'_>) -> SeedHistogram {
        info!("Step 1: Counting seeds...");
        let histogram = SeedHistogram::build(enumerator);
        let stats = histogram.stats();
        for shape_id in 0..histogram.num_shapes() {
            info!("  shape {}: {} seeds", shape_id, histogram.total(shape_id));
        }
        info!(
            "  {} masked, {} low-complexity, {} filtered positions; {} sequences skipped",
            stats.masked, stats.low_complexity, stats.filtered, stats.skipped_sequences
        );
        histogram
    }

    /// Build sorted lists one at a time and hand each to `f`
    ///
    /// Lists come in partition-range order, then shape order. With
    /// `index_chunks > 1` only one range's lists are alive at once, so peak
    /// memory is bounded by the largest range.
    pub fn for_each_sorted_list<F>(&self, sequences: &SequenceSet, histogram: &SeedHistogram, mut f: F) -> Result<()>
    where
        F: FnMut(SortedList) -> Result<()> + Send,
    {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            self.sorted_lists_inner(&enumerator, histogram, &mut f)
        })
    }

    fn sorted_lists_inner<F>(&self, enumerator: &SeedEnumerator<'_>, histogram: &SeedHistogram, f: &mut F) -> Result<()>
    where
        F: FnMut(SortedList) -> Result<()>,
    {
        let ranges = SeedPartitionRange::split(self.config.partition_count(), self.config.index_chunks);
        info!(
            "Step 2: Building sorted lists over {} partition ranges (largest {} entries)...",
            ranges.len(),
            histogram.max_chunk_size(&ranges)
        );
        let mut runs = vec![RunStatistics::new(); enumerator.num_shapes()];
        for range in ranges {
            for shape_id in 0..enumerator.num_shapes() {
                let list = SortedList::build(enumerator, histogram, shape_id, range)?;
                list.verify_against(histogram)?;
                runs[shape_id].merge(&list.run_statistics());
                f(list)?;
            }
        }
        for (shape_id, stats) in runs.iter().enumerate() {
            info!("Shape {}:", shape_id);
            stats.print_summary();
        }
        Ok(())
    }

    /// Build one sorted list per partition range and shape
    pub fn build_sorted_lists(&self, sequences: &SequenceSet) -> Result<Vec<SortedList>> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            let histogram = self.count_inner(&enumerator);
            let mut lists = Vec::new();
            self.sorted_lists_inner(&enumerator, &histogram, &mut |list: SortedList| {
                lists.push(list);
                Ok(())
            })?;
            info!("Sorted-list index build complete: {} entries", lists.iter().map(SortedList::len).sum::<usize>());
            Ok(lists)
        })
    }

    /// Build one hash-table index per shape
    pub fn build_hash_indexes(&self, sequences: &SequenceSet) -> Result<Vec<HashTableIndex>> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            let histogram = self.count_inner(&enumerator);
            self.hash_indexes_inner(&enumerator, &histogram)
        })
    }

    /// Build one hash-table index per shape from an existing histogram
    pub fn build_hash_indexes_from(&self, sequences: &SequenceSet, histogram: &SeedHistogram) -> Result<Vec<HashTableIndex>> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            self.hash_indexes_inner(&enumerator, histogram)
        })
    }

    fn hash_indexes_inner(&self, enumerator: &SeedEnumerator<'_>, histogram: &SeedHistogram) -> Result<Vec<HashTableIndex>> {
        let mut indexes: Vec<HashTableIndex> = (0..enumerator.num_shapes())
            .map(|shape_id| HashTableIndex::new(shape_id, self.config.partition_bits))
            .collect();
        let load_factor = self.config.load_factor;
        self.sorted_lists_inner(enumerator, histogram, &mut |list: SortedList| {
            indexes[list.shape_id()].insert_sorted_list(list, load_factor)
        })?;

        info!("Step 3: Hash tables built");
        for index in &indexes {
            info!(
                "  shape {}: {} keys, {} entries, {} slots",
                index.shape_id(),
                index.num_keys(),
                index.len(),
                index.slot_count()
            );
        }
        info!("Hash index build complete");
        Ok(indexes)
    }

    /// Dense seed membership filter over `sequences`
    pub fn build_seed_bitset(&self, sequences: &SequenceSet) -> Result<SeedBitset> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            info!("Building dense seed filter...");
            SeedBitset::build(&enumerator)
        })
    }

    /// Hashed seed membership filter over `sequences`
    pub fn build_seed_set(&self, sequences: &SequenceSet) -> Result<HashedSeedSet> {
        self.thread_pool()?.install(|| {
            let enumerator = self.enumerator(sequences)?;
            info!("Building hashed seed filter...");
            HashedSeedSet::build(&enumerator)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Reduction;

    fn config() -> IndexConfig {
        IndexConfig {
            reduction: Reduction::new("A C D E F G H I").unwrap(),
            partition_bits: 2,
            seq_chunks: 3,
            num_threads: 2,
            ..IndexConfig::new(&["111", "1011"]).unwrap()
        }
    }

    fn sequences(config: &IndexConfig) -> SequenceSet {
        SequenceSet::from_residues(
            ["ACDEFGHIACDEFGHI", "AAAAAAAAAAAA", "GHIGHIGHIACD", "HICA", "DDEEFFGG"],
            &config.reduction,
        )
        .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let bad = IndexConfig { load_factor: 0.5, ..config() };
        assert!(IndexBuilder::new(bad).is_err());
    }

    #[test]
    fn test_sorted_lists_one_per_shape() {
        let config = config();
        let seqs = sequences(&config);
        let builder = IndexBuilder::new(config).unwrap();
        let lists = builder.build_sorted_lists(&seqs).unwrap();
        assert_eq!(lists.len(), 2);
        let histogram = builder.count(&seqs).unwrap();
        for list in &lists {
            assert_eq!(list.len() as u64, histogram.total(list.shape_id()));
        }
    }

    #[test]
    fn test_index_chunks_give_same_hash_index() {
        let whole = config();
        let seqs = sequences(&whole);
        let chunked = IndexConfig { index_chunks: 4, ..whole.clone() };
        let a = IndexBuilder::new(whole).unwrap().build_hash_indexes(&seqs).unwrap();
        let b = IndexBuilder::new(chunked).unwrap().build_hash_indexes(&seqs).unwrap();
        assert_eq!(a.len(), 2);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.len(), y.len());
            for key in 0..4096u64 {
                assert_eq!(x.get(key), y.get(key));
            }
        }
    }

    #[test]
    fn test_sorted_lists_streamed_per_range() {
        let config = IndexConfig { index_chunks: 2, ..config() };
        let seqs = sequences(&config);
        let builder = IndexBuilder::new(config).unwrap();
        let histogram = builder.count(&seqs).unwrap();
        let mut seen = Vec::new();
        builder
            .for_each_sorted_list(&seqs, &histogram, |list| {
                seen.push((list.range().begin(), list.shape_id()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, 0), (0, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_filter_and_skip() {
        let config = config();
        let queries = SequenceSet::from_residues(["ACDE"], &config.reduction).unwrap();
        let seqs = sequences(&config);
        let filter = IndexBuilder::new(config.clone()).unwrap().build_seed_set(&queries).unwrap();
        let indexes = IndexBuilder::new(config)
            .unwrap()
            .with_filter(&filter)
            .with_skip(vec![false, false, true, false, false])
            .build_hash_indexes(&seqs)
            .unwrap();
        // ACD and CDE occur twice in sequence 0; ACD in sequence 2 is skipped
        assert_eq!(indexes[0].len(), 4);
        assert!(indexes[0]
            .partitions()
            .iter()
            .flat_map(|p| p.entries())
            .all(|e| e.value.seq_id() == 0));
    }
}
