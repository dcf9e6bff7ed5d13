// seedhit: seed indexes and hit culling for protein homology search
//
// Builds partitioned sorted-list and hash-table indexes over spaced seeds
// of reduced-alphabet sequences, and selects the reported alignments per query.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod encoding;
pub mod hasher;
pub mod shape;
pub mod sequence;
pub mod minimizer;
pub mod builder;
pub mod sorted_list;
pub mod hash_table;
pub mod seed_filter;
pub mod serialization;
pub mod culling;

// Re-export common types at crate root
pub use error::{Location, Phase, Result, SeedError};
pub use encoding::Reduction;
pub use shape::{SeedCodec, SeedEncoding, Shape, ShapeSet};
pub use sequence::{PackedPosition, SequenceSet};
pub use builder::{
    ExtractionPolicy, IndexBuilder, IndexConfig, SeedEnumerator, SeedFilter, SeedHistogram, SeedPartitionRange,
    SeedSink,
};
pub use sorted_list::{SeedEntry, SortedList};
pub use hash_table::HashTableIndex;
pub use seed_filter::{HashedSeedSet, SeedBitset};
pub use serialization::{open_hash_index, save_hash_index};
pub use culling::{CullingConfig, CullingOptions, Hsp, Interval, StreamingCuller, TargetHits, TargetSelection};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
