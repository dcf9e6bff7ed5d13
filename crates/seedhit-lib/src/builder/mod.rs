//! Builder module for constructing seed indexes
//!
//! This module implements the multi-phase build pipeline:
//! 1. Validate the configuration and compile one seed codec per shape
//! 2. Enumerate seeds per sequence chunk
//! 3. Count seeds per `(shape, chunk, key partition)`
//! 4. Allocate exactly sized partition buffers
//! 5. Fill the buffers from a second enumeration pass
//! 6. Sort each partition and collect run statistics
//! 7. Optionally build hash tables over the sorted partitions

pub mod buckets;
pub mod config;
pub mod enumerate;
pub mod histogram;
pub mod index_builder;

pub use buckets::{RunStatistics, RunType};
pub use config::{ExtractionPolicy, IndexConfig};
pub use enumerate::{EnumerationStats, FnSink, NoFilter, SeedEnumerator, SeedFilter, SeedSink};
pub use histogram::{ApproximateHistogram, SeedHistogram, SeedPartitionRange};
pub use index_builder::IndexBuilder;
