//! Hit culling and ranking
//!
//! Turns one query's pool of scored alignment candidates into the reported
//! subset:
//! 1. Drop candidates failing the significance cutoff
//! 2. Per target: sort, keep the best only if `max_hsps == 1`, otherwise drop
//!    HSPs enveloped by a better kept HSP and cap at `max_hsps`
//! 3. Across targets: rank, then keep the top `max_target_seqs` (extended
//!    over e-value ties) or every target within `top_percent` of the best
//!
//! With range culling enabled, step 3 is applied per query position by
//! [`RangeCuller`] instead of to the whole query.
//!
//! [`StreamingCuller`] applies the same rules to candidates arriving in
//! chunks.

pub mod candidate;
pub mod config;
pub mod engine;
pub mod range;
pub mod streaming;

pub use candidate::{Hsp, Interval, TargetHits};
pub use config::{CullingConfig, CullingOptions, HspOrder, TargetSelection};
pub use engine::{cull, cull_target, select_targets};
pub use range::{RangeCuller, RangePartition};
pub use streaming::StreamingCuller;
