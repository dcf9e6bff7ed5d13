//! Seed membership filters
//!
//! A filter answers `contains(key, shape)` exactly. It is built by
//! enumerating one sequence set (usually the queries) and then passed to the
//! enumerator of another (the reference block), so the index only stores
//! seeds that can produce a hit.
//!
//! - [`SeedBitset`] is dense over the whole key space of a shape and only
//!   fits short shapes over small alphabets.
//! - [`HashedSeedSet`] keeps one fingerprint table per `(shape, partition)`.
//!   Tables are first sized from the approximate distinct-seed estimate; a
//!   partition whose estimate was too low is rebuilt at its observed size.

use ahash::AHashSet;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::builder::enumerate::{FnSink, SeedEnumerator, SeedFilter};
use crate::builder::histogram::ApproximateHistogram;
use crate::constants::MAX_BITSET_KEY_BITS;
use crate::error::{Location, Phase, Result, SeedError};
use crate::hash_table::{slots_for, FingerprintTable, TableFull};
use crate::hasher::stable_hash;

/// Dense key-space bitset per shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedBitset {
    key_bits: Vec<u32>,
    words: Vec<Vec<u64>>,
}

impl SeedBitset {
    /// Empty bitsets for shapes with the given key widths
    ///
    /// # Errors
    /// `SeedError::Config` if a key width exceeds the dense limit.
    pub fn new(key_bits: &[u32]) -> Result<Self> {
        for (shape_id, &bits) in key_bits.iter().enumerate() {
            if bits > MAX_BITSET_KEY_BITS {
                return Err(SeedError::config(
                    Location::phase(Phase::Validate).shape(shape_id),
                    format!(
                        "{}-bit keys are too wide for a dense seed bitset (max {})",
                        bits, MAX_BITSET_KEY_BITS
                    ),
                ));
            }
        }
        let words = key_bits
            .iter()
            .map(|&bits| vec![0u64; ((1u64 << bits) as usize).div_ceil(64)])
            .collect();
        Ok(Self {
            key_bits: key_bits.to_vec(),
            words,
        })
    }

    /// Mark every seed the enumerator emits
    pub fn build(enumerator: &SeedEnumerator<'_>) -> Result<Self> {
        let key_bits: Vec<u32> = enumerator.codecs().iter().map(|c| c.key_bits()).collect();
        let mut bitset = Self::new(&key_bits)?;
        let num_shapes = key_bits.len();
        let bounds = enumerator.chunk_bounds();

        let per_chunk: Vec<Vec<AHashSet<u64>>> = (0..bounds.len() - 1)
            .into_par_iter()
            .map(|chunk| {
                let mut keys = vec![AHashSet::new(); num_shapes];
                let mut sink = FnSink::new(|key, _, _, shape_id| {
                    keys[shape_id].insert(key);
                    true
                });
                enumerator.enumerate(bounds[chunk]..bounds[chunk + 1], &mut sink);
                keys
            })
            .collect();

        for chunk_keys in per_chunk {
            for (shape_id, keys) in chunk_keys.into_iter().enumerate() {
                for key in keys {
                    bitset.insert(key, shape_id);
                }
            }
        }
        for shape_id in 0..num_shapes {
            debug!("  shape {}: {} distinct seeds in bitset", shape_id, bitset.count(shape_id));
        }
        Ok(bitset)
    }

    /// Mark `key` of `shape_id`; keys outside the key space are ignored
    pub fn insert(&mut self, key: u64, shape_id: usize) {
        if key >> self.key_bits[shape_id] == 0 {
            self.words[shape_id][(key >> 6) as usize] |= 1u64 << (key & 63);
        }
    }

    /// Number of marked keys of `shape_id`
    pub fn count(&self, shape_id: usize) -> u64 {
        self.words[shape_id].iter().map(|w| w.count_ones() as u64).sum()
    }
}

impl SeedFilter for SeedBitset {
    #[inline]
    fn contains(&self, key: u64, shape_id: usize) -> bool {
        let Some(&bits) = self.key_bits.get(shape_id) else {
            return false;
        };
        key >> bits == 0 && self.words[shape_id][(key >> 6) as usize] & (1u64 << (key & 63)) != 0
    }
}

/// Counters of a hashed set build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashedSetStats {
    /// Distinct keys stored
    pub keys: u64,
    /// Slots examined by inserts of the sizing pass
    pub probes: u64,
    /// Partitions rebuilt because the estimate was too low
    pub rebuilt_partitions: u64,
}

/// Exact hashed seed set, one fingerprint table per `(shape, partition)`
#[derive(Debug, Clone)]
pub struct HashedSeedSet {
    partition_bits: u32,
    /// tables[shape][partition]
    tables: Vec<Vec<FingerprintTable>>,
    stats: HashedSetStats,
}

impl HashedSeedSet {
    /// Collect the distinct seeds the enumerator emits
    ///
    /// # Errors
    /// `SeedError::Capacity` if a rebuilt table still overflows.
    pub fn build(enumerator: &SeedEnumerator<'_>) -> Result<Self> {
        let config = enumerator.config();
        let partition_bits = config.partition_bits;
        let partition_count = config.partition_count();
        let load_factor = config.load_factor;
        let num_shapes = enumerator.num_shapes();
        let mask = (partition_count - 1) as u64;
        let bounds = enumerator.chunk_bounds();

        let estimate = ApproximateHistogram::build(enumerator);

        // keys[chunk][shape][partition] = distinct remainders seen by the chunk
        let keys: Vec<Vec<Vec<Vec<u32>>>> = (0..bounds.len() - 1)
            .into_par_iter()
            .map(|chunk| {
                let mut seen = vec![AHashSet::new(); num_shapes];
                let mut sink = FnSink::new(|key, _, _, shape_id| {
                    seen[shape_id].insert(key);
                    true
                });
                enumerator.enumerate(bounds[chunk]..bounds[chunk + 1], &mut sink);
                seen.into_iter()
                    .map(|set| {
                        let mut cells = vec![Vec::new(); partition_count];
                        for key in set {
                            // remainder width was checked at validation
                            cells[(key & mask) as usize].push((key >> partition_bits) as u32);
                        }
                        cells
                    })
                    .collect()
            })
            .collect();

        let cells: Vec<(usize, usize)> = (0..num_shapes)
            .flat_map(|s| (0..partition_count).map(move |p| (s, p)))
            .collect();
        let built: Vec<(FingerprintTable, HashedSetStats)> = cells
            .par_iter()
            .map(|&(shape_id, partition)| {
                let rems = keys.iter().flat_map(|chunk| chunk[shape_id][partition].iter().copied());
                fill_cell(
                    rems,
                    estimate.estimate(shape_id, partition) as usize,
                    load_factor,
                    partition_bits,
                    partition,
                    shape_id,
                )
            })
            .collect::<Result<_>>()?;

        let mut stats = HashedSetStats::default();
        let mut tables: Vec<Vec<FingerprintTable>> = (0..num_shapes).map(|_| Vec::with_capacity(partition_count)).collect();
        for ((shape_id, _), (table, cell_stats)) in cells.iter().zip(built) {
            stats.keys += cell_stats.keys;
            stats.probes += cell_stats.probes;
            stats.rebuilt_partitions += cell_stats.rebuilt_partitions;
            tables[*shape_id].push(table);
        }
        info!(
            "Seed set: {} distinct seeds, {} probes, {} partitions resized",
            stats.keys, stats.probes, stats.rebuilt_partitions
        );
        Ok(Self {
            partition_bits,
            tables,
            stats,
        })
    }

    /// Number of distinct keys of `shape_id`
    pub fn count(&self, shape_id: usize) -> u64 {
        self.tables[shape_id].iter().map(|t| t.len() as u64).sum()
    }

    /// Build counters
    pub fn stats(&self) -> &HashedSetStats {
        &self.stats
    }
}

impl SeedFilter for HashedSeedSet {
    fn contains(&self, key: u64, shape_id: usize) -> bool {
        let Some(tables) = self.tables.get(shape_id) else {
            return false;
        };
        let mask = (1u64 << self.partition_bits) - 1;
        let Ok(rem) = u32::try_from(key >> self.partition_bits) else {
            return false;
        };
        tables[(key & mask) as usize]
            .find(stable_hash(key), |v| v == rem as u64)
            .is_some()
    }
}

/// Insert one cell's remainders into a table sized from the estimate,
/// rebuilding at the observed size if the estimate was too low
fn fill_cell<I>(
    rems: I,
    estimate: usize,
    load_factor: f64,
    partition_bits: u32,
    partition: usize,
    shape_id: usize,
) -> Result<(FingerprintTable, HashedSetStats)>
where
    I: Iterator<Item = u32> + Clone,
{
    let full_key = |rem: u32| ((rem as u64) << partition_bits) | partition as u64;
    let mut stats = HashedSetStats::default();
    let mut table = FingerprintTable::with_capacity(estimate, load_factor);
    let mut overflow = 0usize;
    for rem in rems.clone() {
        match table.insert(stable_hash(full_key(rem)), rem as u64, |v| v == rem as u64) {
            Ok(ins) => stats.probes += ins.probes as u64,
            Err(TableFull { .. }) => overflow += 1,
        }
    }

    // an overflowed count may include duplicates, which only oversizes the rebuild
    if overflow > 0 || table.load() * load_factor > 1.0 {
        let target = slots_for(table.len() + overflow, load_factor);
        debug!(
            "  shape {} partition {}: estimate {} too low, rebuilding with {} slots",
            shape_id, partition, estimate, target
        );
        table = FingerprintTable::with_slots(target);
        for rem in rems {
            table
                .insert(stable_hash(full_key(rem)), rem as u64, |v| v == rem as u64)
                .map_err(|full| {
                    SeedError::capacity(
                        Location::phase(Phase::Insert).shape(shape_id).partition(partition),
                        full.to_string(),
                    )
                })?;
        }
        stats.rebuilt_partitions = 1;
    }
    stats.keys = table.len() as u64;
    Ok((table, stats))
}
