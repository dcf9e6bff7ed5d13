//! Per-target culling and cross-target selection
//!
//! All functions here are pure: they take one query's candidate pool and a
//! configuration and return the reported targets in ranking order.

use std::collections::BTreeMap;

use tracing::debug;

use crate::culling::candidate::{Hsp, TargetHits};
use crate::culling::config::{CullingConfig, HspOrder, TargetSelection};
use crate::culling::range::RangeCuller;
use crate::error::Result;

/// Whether an HSP passes the significance cutoff
#[inline]
pub fn is_significant(hsp: &Hsp, config: &CullingConfig) -> bool {
    if config.min_bit_score > 0.0 {
        hsp.bit_score >= config.min_bit_score
    } else {
        hsp.evalue <= config.max_evalue
    }
}

/// Sort a target's HSPs in the configured order
pub fn sort_hsps(hsps: &mut [Hsp], order: HspOrder) {
    match order {
        HspOrder::Evalue => hsps.sort_by(Hsp::cmp_evalue),
        HspOrder::Score => hsps.sort_by(Hsp::cmp_score),
    }
}

/// Cull the HSPs of one target
///
/// HSPs are sorted best first. With `max_hsps == 1` only the best one is
/// kept. Otherwise an HSP is dropped when its query range is enveloped by an
/// HSP already kept, and the survivors are truncated to `max_hsps` (if set).
pub fn cull_target(mut hsps: Vec<Hsp>, config: &CullingConfig) -> Vec<Hsp> {
    sort_hsps(&mut hsps, config.hsp_order);
    if config.max_hsps == 1 {
        hsps.truncate(1);
        return hsps;
    }
    let mut kept: Vec<Hsp> = Vec::with_capacity(hsps.len());
    for hsp in hsps {
        if !kept.iter().any(|k| hsp.is_enveloped_by(k, config.overlap)) {
            kept.push(hsp);
        }
    }
    if config.max_hsps > 0 {
        kept.truncate(config.max_hsps);
    }
    kept
}

/// Sort targets and apply the cross-target selection
///
/// With range culling enabled, the selection limits apply per query
/// position instead of to the whole query.
pub fn select_targets(mut targets: Vec<TargetHits>, config: &CullingConfig) -> Vec<TargetHits> {
    if config.ranks_by_score() {
        targets.sort_by(TargetHits::cmp_score);
    } else {
        targets.sort_by(TargetHits::cmp_evalue);
    }
    if let Some(culler) = RangeCuller::from_config(config) {
        return culler.select(targets);
    }
    match config.selection {
        TargetSelection::TopPercent(p) => {
            let Some(top) = targets.first().map(TargetHits::best_bit_score) else {
                return targets;
            };
            let cutoff = top_percent_cutoff(top, p);
            targets.retain(|t| t.best_bit_score() >= cutoff);
        }
        TargetSelection::MaxTargetSeqs(k) => {
            if k > 0 && targets.len() > k {
                let boundary = targets[k - 1].best_evalue();
                let end = k + targets[k..].partition_point(|t| t.best_evalue() == boundary);
                targets.truncate(end);
            }
        }
    }
    targets
}

/// Lowest bit score within `percent` of `top`
///
/// The window extends below `top` for negative scores too, so the best
/// target always passes.
#[inline]
pub fn top_percent_cutoff(top: f64, percent: f64) -> f64 {
    top - top.abs() * percent / 100.0
}

/// Check, filter and group a candidate pool into culled targets
///
/// Targets come back in ascending id order, before cross-target selection.
pub fn cull_targets(candidates: Vec<Hsp>, config: &CullingConfig) -> Result<Vec<TargetHits>> {
    for hsp in &candidates {
        hsp.check_comparable()?;
    }
    let total = candidates.len();
    let mut by_target: BTreeMap<u32, Vec<Hsp>> = BTreeMap::new();
    for hsp in candidates.into_iter().filter(|h| is_significant(h, config)) {
        by_target.entry(hsp.target).or_default().push(hsp);
    }
    let targets: Vec<TargetHits> = by_target
        .into_iter()
        .map(|(target, hsps)| TargetHits {
            target,
            hsps: cull_target(hsps, config),
        })
        .collect();
    debug!("Culling: {} candidates on {} significant targets", total, targets.len());
    Ok(targets)
}

/// Cull one query's candidate pool into the reported targets
///
/// An empty pool yields an empty report.
///
/// # Errors
/// `SeedError::Comparator` if a candidate has a NaN e-value or bit score.
pub fn cull(candidates: Vec<Hsp>, config: &CullingConfig) -> Result<Vec<TargetHits>> {
    let targets = cull_targets(candidates, config)?;
    Ok(select_targets(targets, config))
}
