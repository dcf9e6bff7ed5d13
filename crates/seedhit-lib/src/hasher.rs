//! Hashing for seed keys.
//!
//! Two kinds of hashing are used:
//! - `DeterministicHasher` is a seeded ahash state. It is used for in-memory
//!   decisions that never outlive the process (sketch selection, approximate
//!   counting).
//! - `stable_hash` and `mix_bits` are fixed bit mixers whose output is the same
//!   on every platform and version. They are used for anything that ends up in a
//!   persisted table or defines a key encoding.

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

/// A deterministic hasher with a seeded state
#[derive(Clone)]
pub struct DeterministicHasher {
    seed: u64,
    state: RandomState,
}

impl DeterministicHasher {
    /// Create a new deterministic hasher with the given seed
    pub fn new(seed: u64) -> Self {
        let state = RandomState::with_seeds(seed, !seed, seed.rotate_left(32), !seed.rotate_left(32));
        Self { seed, state }
    }

    /// Hash a seed key
    #[inline]
    pub fn hash_key(&self, key: u64) -> u64 {
        let mut hasher = self.state.build_hasher();
        hasher.write_u64(key);
        hasher.finish()
    }

    /// Get the seed value
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Platform-stable 64-bit finalizer (MurmurHash3 fmix64)
#[inline]
pub const fn stable_hash(key: u64) -> u64 {
    let mut h = key;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// Bijective mix of the low `bits` bits of `x`.
///
/// Multiplication by an odd constant and a right xor-shift are both
/// invertible modulo `2^bits`, so distinct inputs in `[0, 2^bits)` map to
/// distinct outputs in the same range.
#[inline]
pub const fn mix_bits(x: u64, bits: u32) -> u64 {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let shift = bits / 2 + 1;
    let mut h = x & mask;
    h = h.wrapping_mul(0x9e37_79b9_7f4a_7c15) & mask;
    if shift < 64 {
        h ^= h >> shift;
    }
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9) & mask;
    if shift < 64 {
        h ^= h >> shift;
    }
    h & mask
}
