//! Incremental culling over database chunks
//!
//! When a large database is scanned block by block, each block yields a
//! candidate pool for the same query. [`StreamingCuller`] keeps the targets
//! reported so far and merges every new chunk into them. `add_chunk` reports
//! whether a target not reported before entered the set, which lets the
//! caller stop scanning once further chunks stop contributing.
//!
//! Candidates of one target should arrive in one chunk. A target that shows
//! up again is merged with its reported HSPs; a target that was already
//! dropped by the selection is judged on its new HSPs alone.
//!
//! Range culling is not monotone: a better target arriving later can drop a
//! reported target and thereby uncover one dropped earlier. With range
//! culling enabled every culled target is therefore retained and the
//! selection is rerun over all of them.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::culling::candidate::{Hsp, TargetHits};
use crate::culling::config::CullingConfig;
use crate::culling::engine::{cull_target, cull_targets, select_targets};
use crate::error::Result;

#[derive(Debug, Default)]
struct StreamState {
    reported: Vec<TargetHits>,
    // every culled target, kept only under range culling
    retained: Vec<TargetHits>,
    chunks: usize,
}

/// Culls a query's candidates arriving in chunks
#[derive(Debug)]
pub struct StreamingCuller {
    config: CullingConfig,
    state: Mutex<StreamState>,
}

impl StreamingCuller {
    /// Start with an empty reported set
    pub fn new(config: CullingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(StreamState::default()),
        })
    }

    /// The culling configuration
    pub fn config(&self) -> &CullingConfig {
        &self.config
    }

    /// Merge one chunk of candidates into the reported set
    ///
    /// Returns `true` if a target not reported before is now reported.
    ///
    /// # Errors
    /// `SeedError::Comparator` if a candidate has a NaN e-value or bit score;
    /// the reported set is left unchanged.
    pub fn add_chunk(&self, candidates: Vec<Hsp>) -> Result<bool> {
        let incoming = cull_targets(candidates, &self.config)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let before: HashSet<u32> = state.reported.iter().map(|t| t.target).collect();
        let range_culling = self.config.range_cover.is_some();
        let mut merged = if range_culling {
            std::mem::take(&mut state.retained)
        } else {
            std::mem::take(&mut state.reported)
        };
        for target in incoming {
            match merged.iter_mut().find(|t| t.target == target.target) {
                Some(existing) => {
                    let mut hsps = std::mem::take(&mut existing.hsps);
                    hsps.extend(target.hsps);
                    existing.hsps = cull_target(hsps, &self.config);
                }
                None => merged.push(target),
            }
        }
        if range_culling {
            state.retained = merged.clone();
        }
        state.reported = select_targets(merged, &self.config);
        state.chunks += 1;

        let admitted = state.reported.iter().any(|t| !before.contains(&t.target));
        debug!(
            "Chunk {}: {} targets reported, new targets admitted: {}",
            state.chunks,
            state.reported.len(),
            admitted
        );
        Ok(admitted)
    }

    /// Snapshot of the targets reported so far, in ranking order
    pub fn reported(&self) -> Vec<TargetHits> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reported
            .clone()
    }

    /// Number of chunks merged
    pub fn chunks(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).chunks
    }

    /// Final reported set
    pub fn finish(self) -> Vec<TargetHits> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .reported
    }
}
