//! Reduced sequence storage, packed positions and the sequence partitioner
//!
//! Sequences are stored back to back as reduced letters with an offsets
//! array, so sequence `i` occupies `letters[offsets[i]..offsets[i + 1]]`.

use crate::encoding::Reduction;
use crate::error::{Location, Phase, Result, SeedError};

/// A seed position packed as `(sequence id << 32) | offset`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackedPosition(u64);

impl PackedPosition {
    /// Pack a sequence id and an offset within that sequence
    #[inline]
    pub const fn new(seq_id: u32, offset: u32) -> Self {
        Self(((seq_id as u64) << 32) | offset as u64)
    }

    /// Pack values that may not fit the 32-bit fields
    ///
    /// # Errors
    /// `SeedError::Capacity` if either value overflows its field.
    pub fn try_new(seq_id: usize, offset: usize) -> Result<Self> {
        let seq = u32::try_from(seq_id).map_err(|_| {
            SeedError::capacity(
                Location::phase(Phase::Enumerate),
                format!("sequence id {} overflows the packed position", seq_id),
            )
        })?;
        let off = u32::try_from(offset).map_err(|_| {
            SeedError::capacity(
                Location::phase(Phase::Enumerate),
                format!("offset {} in sequence {} overflows the packed position", offset, seq_id),
            )
        })?;
        Ok(Self::new(seq, off))
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

    /// Sequence id
    #[inline]
    pub const fn seq_id(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Offset within the sequence
    #[inline]
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }
}

impl std::fmt::Display for PackedPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.seq_id(), self.offset())
    }
}

/// A set of reduced sequences
#[derive(Debug, Clone)]
pub struct SequenceSet {
    letters: Vec<u8>,
    offsets: Vec<usize>,
}

impl Default for SequenceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            letters: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Reduce and collect raw residue sequences
    pub fn from_residues<I, S>(sequences: I, reduction: &Reduction) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut set = Self::new();
        for seq in sequences {
            set.push(seq.as_ref(), reduction)?;
        }
        Ok(set)
    }

    /// Reduce and append one sequence, returning its id
    ///
    /// # Errors
    /// `SeedError::Capacity` if the sequence id or length would not fit in a
    /// packed position.
    pub fn push(&mut self, residues: &[u8], reduction: &Reduction) -> Result<u32> {
        let id = self.check_capacity(residues.len())?;
        reduction.reduce_into(residues, &mut self.letters);
        self.offsets.push(self.letters.len());
        Ok(id)
    }

    /// Append an already reduced sequence, returning its id
    pub fn push_reduced(&mut self, letters: &[u8]) -> Result<u32> {
        let id = self.check_capacity(letters.len())?;
        self.letters.extend_from_slice(letters);
        self.offsets.push(self.letters.len());
        Ok(id)
    }

    fn check_capacity(&self, len: usize) -> Result<u32> {
        let id = self.len();
        if id >= u32::MAX as usize {
            return Err(SeedError::capacity(
                Location::phase(Phase::Enumerate),
                format!("sequence count {} overflows the packed position", id + 1),
            ));
        }
        if len > u32::MAX as usize {
            return Err(SeedError::capacity(
                Location::phase(Phase::Enumerate),
                format!("sequence {} of length {} overflows the packed position", id, len),
            ));
        }
        Ok(id as u32)
    }

    /// Number of sequences
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Whether the set holds no sequences
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reduced letters of sequence `i`
    #[inline]
    pub fn get(&self, i: usize) -> &[u8] {
        &self.letters[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Length of sequence `i`
    #[inline]
    pub fn seq_len(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Total number of letters
    #[inline]
    pub fn total_letters(&self) -> usize {
        self.letters.len()
    }

    /// Letters in sequences `begin..end`
    pub fn letters_in(&self, begin: usize, end: usize) -> usize {
        self.offsets[end] - self.offsets[begin]
    }

    /// Split the set into `n` contiguous, letter-balanced ranges.
    ///
    /// Returns `n + 1` non-decreasing boundaries, the first 0 and the last
    /// `len()`. Chunk `i` covers sequences `bounds[i]..bounds[i + 1]` and may
    /// be empty when there are fewer sequences than chunks.
    pub fn partition(&self, n: usize) -> Vec<usize> {
        let n = n.max(1);
        let total = self.total_letters();
        let mut bounds = Vec::with_capacity(n + 1);
        bounds.push(0);
        for i in 1..n {
            let target = (total as u128 * i as u128 / n as u128) as usize;
            // first sequence starting at or after the target letter
            let seq = self.offsets[..self.len()].partition_point(|&o| o < target);
            let prev = bounds[bounds.len() - 1];
            bounds.push(seq.max(prev));
        }
        bounds.push(self.len());
        bounds
    }
}
