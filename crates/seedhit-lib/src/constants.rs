//! Constants and defaults for seed indexing and culling
//!
//! This module defines compile-time and runtime constants used throughout
//! the library, including file format identifiers, buffer sizes and the
//! default values behind `IndexConfig` and `CullingConfig`.

/// Magic bytes of the persisted hash-index format
pub const INDEX_MAGIC: &[u8; 8] = b"SEEDHIT1";

/// Persisted hash-index format version
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Size of the fixed persisted header (magic + version + shape count)
pub const INDEX_HEADER_BYTES: usize = 16;

/// Alignment of each per-shape table blob in the persisted file
pub const INDEX_BLOB_ALIGNMENT: usize = 64;

/// Entries buffered per key partition before they are copied into the
/// partition's write window during the fill pass
pub const WRITE_BUFFER_SIZE: usize = 16;

/// Maximum number of simultaneously active shapes
pub const MAX_SHAPES: usize = 64;

/// Maximum number of informative positions in a shape
pub const MAX_SEED_WEIGHT: usize = 32;

/// Maximum span of a shape
pub const MAX_SHAPE_LENGTH: usize = 64;

/// Default number of key-partition bits (256 partitions)
pub const DEFAULT_PARTITION_BITS: u32 = 8;

/// Largest supported number of key-partition bits
pub const MAX_PARTITION_BITS: u32 = 16;

/// Default number of letter-balanced sequence chunks
pub const DEFAULT_SEQ_CHUNKS: usize = 64;

/// Largest supported number of sequence chunks
pub const MAX_SEQ_CHUNKS: usize = 1 << 16;

/// Default hash table load factor (slots per stored key)
pub const DEFAULT_LOAD_FACTOR: f64 = 1.5;

/// Width in bits of the key remainder stored in sorted-list entries
pub const REMAINDER_BITS: u32 = 32;

/// Largest key space (in bits) that a dense membership bitset may cover
pub const MAX_BITSET_KEY_BITS: u32 = 32;

/// Reduced letter used for masked or invalid residues
pub const MASK_LETTER: u8 = u8::MAX;

/// Default overlap fraction for intra-target culling
pub const DEFAULT_CULLING_OVERLAP: f64 = 0.5;

/// Default percentage of a target's query ranges that range culling
/// tolerates as already covered
pub const DEFAULT_RANGE_COVER: f64 = 50.0;

/// Default cross-target quota
pub const DEFAULT_MAX_TARGET_SEQS: usize = 25;

/// Default e-value threshold
pub const DEFAULT_MAX_EVALUE: f64 = 0.001;

/// The Murphy 10-letter reduction of the amino acid alphabet
pub const MURPHY_10: &str = "A KR EDNQ C G H ILVM FYW P ST";

/// Default DIAMOND-style spaced shapes (sensitive mode subset)
pub const DEFAULT_SHAPES: &[&str] = &["111101011101111", "111011001100101111"];

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Compute ceil(log2(x)).
///
/// Returns 0 for x <= 1, and the minimum number of bits needed to
/// represent values in [0, x) for x >= 2.
#[inline]
pub const fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        0
    } else {
        64 - (x - 1).leading_zeros() as usize
    }
}
