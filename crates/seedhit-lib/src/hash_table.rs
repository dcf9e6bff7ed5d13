//! Fingerprinted open-addressing hash tables
//!
//! A [`FingerprintTable`] is a flat array of 64-bit slots. A slot packs an
//! 8-bit fingerprint taken from the top byte of the key hash with a 56-bit
//! value. Fingerprint 0 marks an empty slot, so real fingerprints are
//! clamped to at least 1. Collisions are resolved by linear probing with
//! wraparound; a probe only calls the caller's equality test when the
//! fingerprints agree.
//!
//! The table refuses an insert that would leave no empty slot. Probing
//! therefore always terminates, and a refused insert means the table was
//! sized wrong.
//!
//! [`HashTableIndex`] gives the lookup surface of a
//! [`SortedList`](crate::sorted_list::SortedList) in expected O(1): one table
//! per key partition maps a key to the start of its run in the partition's
//! sorted entries.

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::error::{Location, Phase, Result, SeedError};
use crate::hasher::stable_hash;
use crate::sequence::PackedPosition;
use crate::sorted_list::{find_run, SeedEntry, SortedList};

/// Bit offset of the fingerprint within a slot
pub const FINGERPRINT_SHIFT: u32 = 56;

/// Largest value a slot can hold
pub const MAX_SLOT_VALUE: u64 = (1u64 << FINGERPRINT_SHIFT) - 1;

/// One table slot: `fingerprint << 56 | value`, all zero when empty
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot(u64);

impl Slot {
    /// The empty slot
    pub const EMPTY: Slot = Slot(0);

    /// Pack a fingerprint (must be non-zero) and a value
    #[inline]
    pub const fn new(fingerprint: u8, value: u64) -> Self {
        Self(((fingerprint as u64) << FINGERPRINT_SHIFT) | (value & MAX_SLOT_VALUE))
    }

    /// Rebuild from the raw 64-bit value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Stored fingerprint
    #[inline]
    pub const fn fingerprint(self) -> u8 {
        (self.0 >> FINGERPRINT_SHIFT) as u8
    }

    /// Stored value
    #[inline]
    pub const fn value(self) -> u64 {
        self.0 & MAX_SLOT_VALUE
    }

    /// Whether the slot is unused
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.fingerprint() == 0
    }
}

/// Fingerprint of a hash: its top byte, never 0
#[inline]
pub const fn fingerprint(hash: u64) -> u8 {
    let fp = (hash >> FINGERPRINT_SHIFT) as u8;
    if fp == 0 {
        1
    } else {
        fp
    }
}

/// Insert refused because it would fill the last empty slot
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("hash table full: {len} of {slots} slots in use")]
pub struct TableFull {
    /// Occupied slots
    pub len: usize,
    /// Total slots
    pub slots: usize,
}

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// Value stored in the slot (the existing one if the key was present)
    pub value: u64,
    /// Whether a new slot was taken
    pub is_new: bool,
    /// Slots examined
    pub probes: usize,
}

/// Open-addressing table with fingerprinted slots and linear probing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintTable {
    slots: Vec<Slot>,
    len: usize,
}

impl FingerprintTable {
    /// Table with exactly `slot_count` slots (at least 1)
    pub fn with_slots(slot_count: usize) -> Self {
        Self {
            slots: vec![Slot::EMPTY; slot_count.max(1)],
            len: 0,
        }
    }

    /// Table able to take `keys` keys at the given load factor
    pub fn with_capacity(keys: usize, load_factor: f64) -> Self {
        Self::with_slots(slots_for(keys, load_factor))
    }

    /// Rebuild a table from raw slots
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        let len = slots.iter().filter(|s| !s.is_empty()).count();
        let mut table = Self { slots, len };
        if table.slots.is_empty() {
            table.slots.push(Slot::EMPTY);
        }
        table
    }

    /// Raw slots
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of slots
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fraction of occupied slots
    pub fn load(&self) -> f64 {
        self.len as f64 / self.slots.len() as f64
    }

    #[inline]
    fn bucket(&self, hash: u64) -> usize {
        (hash % self.slots.len() as u64) as usize
    }

    /// Insert `value` under `hash`, or find the entry `same` accepts
    ///
    /// `same` is called with the value of every slot whose fingerprint
    /// matches and decides whether that slot holds the key being inserted.
    pub fn insert<F>(&mut self, hash: u64, value: u64, mut same: F) -> std::result::Result<Inserted, TableFull>
    where
        F: FnMut(u64) -> bool,
    {
        let fp = fingerprint(hash);
        let n = self.slots.len();
        let mut i = self.bucket(hash);
        for probes in 1..=n {
            let slot = self.slots[i];
            if slot.is_empty() {
                if self.len + 1 >= n {
                    return Err(TableFull { len: self.len, slots: n });
                }
                self.slots[i] = Slot::new(fp, value);
                self.len += 1;
                return Ok(Inserted { value, is_new: true, probes });
            }
            if slot.fingerprint() == fp && same(slot.value()) {
                return Ok(Inserted { value: slot.value(), is_new: false, probes });
            }
            i = if i + 1 == n { 0 } else { i + 1 };
        }
        Err(TableFull { len: self.len, slots: n })
    }

    /// Value stored under `hash` that `same` accepts
    pub fn find<F>(&self, hash: u64, mut same: F) -> Option<u64>
    where
        F: FnMut(u64) -> bool,
    {
        let fp = fingerprint(hash);
        let n = self.slots.len();
        let mut i = self.bucket(hash);
        for _ in 0..n {
            let slot = self.slots[i];
            if slot.is_empty() {
                return None;
            }
            if slot.fingerprint() == fp && same(slot.value()) {
                return Some(slot.value());
            }
            i = if i + 1 == n { 0 } else { i + 1 };
        }
        None
    }
}

/// Slots needed for `keys` keys at `load_factor`, keeping one slot free
pub fn slots_for(keys: usize, load_factor: f64) -> usize {
    (keys as f64 * load_factor).ceil() as usize + 1
}

/// One key partition of a hash-table index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPartition {
    table: FingerprintTable,
    entries: Vec<SeedEntry>,
}

impl HashPartition {
    /// Empty partition
    pub fn empty() -> Self {
        Self {
            table: FingerprintTable::with_slots(1),
            entries: Vec::new(),
        }
    }

    /// Assemble from a table and the sorted entries its values point into
    pub fn from_parts(table: FingerprintTable, entries: Vec<SeedEntry>) -> Self {
        Self { table, entries }
    }

    /// The table
    pub fn table(&self) -> &FingerprintTable {
        &self.table
    }

    /// Sorted entries
    pub fn entries(&self) -> &[SeedEntry] {
        &self.entries
    }

    fn run(&self, hash: u64, rem: u32) -> &[SeedEntry] {
        let entries = &self.entries;
        let same = |start: u64| entries.get(start as usize).is_some_and(|e| e.key == rem);
        match self.table.find(hash, same) {
            Some(start) => find_run(&entries[start as usize..], rem),
            None => &[],
        }
    }
}

/// Hash-table seed index of one shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTableIndex {
    shape_id: usize,
    partition_bits: u32,
    partitions: Vec<HashPartition>,
}

impl HashTableIndex {
    /// Index with every partition empty
    pub fn new(shape_id: usize, partition_bits: u32) -> Self {
        Self {
            shape_id,
            partition_bits,
            partitions: vec![HashPartition::empty(); 1usize << partition_bits],
        }
    }

    /// Assemble from decoded partitions
    pub(crate) fn from_parts(shape_id: usize, partition_bits: u32, partitions: Vec<HashPartition>) -> Self {
        Self {
            shape_id,
            partition_bits,
            partitions,
        }
    }

    /// Build from one sorted list covering every partition
    pub fn from_sorted_list(list: SortedList, load_factor: f64) -> Result<Self> {
        let mut index = Self::new(list.shape_id(), list.partition_bits());
        index.insert_sorted_list(list, load_factor)?;
        Ok(index)
    }

    /// Take over the partitions of `list`, one table per partition
    ///
    /// # Errors
    /// `SeedError::Config` if the list belongs to another shape or
    /// partitioning; `SeedError::Capacity` if a table fills up.
    pub fn insert_sorted_list(&mut self, list: SortedList, load_factor: f64) -> Result<()> {
        let location = Location::phase(Phase::Insert).shape(self.shape_id);
        if list.shape_id() != self.shape_id || list.partition_bits() != self.partition_bits {
            return Err(SeedError::config(
                location,
                format!(
                    "sorted list of shape {} with {} partition bits does not match the index",
                    list.shape_id(),
                    list.partition_bits()
                ),
            ));
        }
        let range = list.range();
        let shape_id = self.shape_id;
        let partition_bits = self.partition_bits;
        let built: Vec<HashPartition> = list
            .into_partitions()
            .into_par_iter()
            .enumerate()
            .map(|(local, entries)| build_partition(entries, shape_id, partition_bits, range.begin() + local, load_factor))
            .collect::<Result<_>>()?;
        for (local, partition) in built.into_iter().enumerate() {
            self.partitions[range.begin() + local] = partition;
        }
        debug!(
            "  shape {}: hash tables for partitions {}..{} ({} keys)",
            self.shape_id,
            range.begin(),
            range.end(),
            range.iter().map(|p| self.partitions[p].table.len()).sum::<usize>()
        );
        Ok(())
    }

    /// Shape this index covers
    pub fn shape_id(&self) -> usize {
        self.shape_id
    }

    /// Number of key-partition bits
    pub fn partition_bits(&self) -> u32 {
        self.partition_bits
    }

    /// Per-partition tables and entries
    pub fn partitions(&self) -> &[HashPartition] {
        &self.partitions
    }

    /// Total entries
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.entries.len()).sum()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.entries.is_empty())
    }

    /// Number of distinct keys
    pub fn num_keys(&self) -> usize {
        self.partitions.iter().map(|p| p.table.len()).sum()
    }

    /// Total table slots
    pub fn slot_count(&self) -> usize {
        self.partitions.iter().map(|p| p.table.slot_count()).sum()
    }

    /// The run of entries for `key`; empty if the key does not occur
    pub fn get(&self, key: u64) -> &[SeedEntry] {
        let mask = (1u64 << self.partition_bits) - 1;
        let Ok(rem) = u32::try_from(key >> self.partition_bits) else {
            return &[];
        };
        self.partitions[(key & mask) as usize].run(stable_hash(key), rem)
    }

    /// Positions of `key`
    pub fn positions(&self, key: u64) -> impl Iterator<Item = PackedPosition> + '_ {
        self.get(key).iter().map(|e| e.value)
    }

    /// Whether `key` occurs
    pub fn contains(&self, key: u64) -> bool {
        !self.get(key).is_empty()
    }
}

fn build_partition(
    entries: Vec<SeedEntry>,
    shape_id: usize,
    partition_bits: u32,
    partition: usize,
    load_factor: f64,
) -> Result<HashPartition> {
    let distinct = entries.chunk_by(|a, b| a.key == b.key).count();
    let mut table = FingerprintTable::with_capacity(distinct, load_factor);
    let mut start = 0usize;
    for run in entries.chunk_by(|a, b| a.key == b.key) {
        let rem = run[0].key;
        let key = ((rem as u64) << partition_bits) | partition as u64;
        table
            .insert(stable_hash(key), start as u64, |v| entries[v as usize].key == rem)
            .map_err(|full| {
                SeedError::capacity(
                    Location::phase(Phase::Insert).shape(shape_id).partition(partition),
                    full.to_string(),
                )
            })?;
        start += run.len();
    }
    Ok(HashPartition { table, entries })
}
