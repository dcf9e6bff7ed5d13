//! Culling configuration
//!
//! [`CullingOptions`] carries values as the user supplied them, each one
//! optional. [`CullingOptions::resolve`] turns them into a validated
//! [`CullingConfig`] of plain values, rejecting options that exclude each
//! other.

use crate::constants::{DEFAULT_CULLING_OVERLAP, DEFAULT_MAX_EVALUE, DEFAULT_MAX_TARGET_SEQS};
use crate::error::{Location, Phase, Result, SeedError};

/// Order of HSPs within a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HspOrder {
    /// E-value ascending
    #[default]
    Evalue,
    /// Bit score descending
    Score,
}

impl std::fmt::Display for HspOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HspOrder::Evalue => write!(f, "evalue"),
            HspOrder::Score => write!(f, "score"),
        }
    }
}

impl std::str::FromStr for HspOrder {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "evalue" => Ok(HspOrder::Evalue),
            "score" => Ok(HspOrder::Score),
            other => Err(SeedError::config(
                Location::phase(Phase::Validate),
                format!("unknown HSP order '{}' (expected evalue or score)", other),
            )),
        }
    }
}

/// Cross-target selection policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSelection {
    /// The best `k` targets by e-value plus any tied with the `k`-th (0 = all)
    MaxTargetSeqs(usize),
    /// Every target scoring within `p` percent of the best target
    TopPercent(f64),
}

impl Default for TargetSelection {
    fn default() -> Self {
        TargetSelection::MaxTargetSeqs(DEFAULT_MAX_TARGET_SEQS)
    }
}

impl std::fmt::Display for TargetSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSelection::MaxTargetSeqs(0) => write!(f, "all targets"),
            TargetSelection::MaxTargetSeqs(k) => write!(f, "max_target_seqs={}", k),
            TargetSelection::TopPercent(p) => write!(f, "top={}%", p),
        }
    }
}

/// Resolved culling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CullingConfig {
    /// Order of HSPs within a target
    pub hsp_order: HspOrder,
    /// Fraction of a query range covered by a better HSP that discards it
    pub overlap: f64,
    /// HSPs kept per target (0 = unlimited, 1 = best only)
    pub max_hsps: usize,
    /// Cross-target selection
    pub selection: TargetSelection,
    /// HSPs with a larger e-value are discarded
    pub max_evalue: f64,
    /// When positive, HSPs with a smaller bit score are discarded instead
    pub min_bit_score: f64,
    /// Percentage of query-range cover that drops a target under range
    /// culling; `None` selects targets globally
    pub range_cover: Option<f64>,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            hsp_order: HspOrder::Evalue,
            overlap: DEFAULT_CULLING_OVERLAP,
            max_hsps: 0,
            selection: TargetSelection::default(),
            max_evalue: DEFAULT_MAX_EVALUE,
            min_bit_score: 0.0,
            range_cover: None,
        }
    }
}

impl CullingConfig {
    /// Validate the parameters
    pub fn validate(&self) -> Result<()> {
        let err = |detail: String| Err(SeedError::config(Location::phase(Phase::Cull), detail));
        if !(self.overlap > 0.0 && self.overlap <= 1.0) {
            return err(format!("overlap must be in (0, 1], got {}", self.overlap));
        }
        if let TargetSelection::TopPercent(p) = self.selection {
            if !(0.0..=100.0).contains(&p) {
                return err(format!("top percent must be in [0, 100], got {}", p));
            }
        }
        if self.max_evalue.is_nan() || self.max_evalue < 0.0 {
            return err(format!("max_evalue must be non-negative, got {}", self.max_evalue));
        }
        if !self.min_bit_score.is_finite() || self.min_bit_score < 0.0 {
            return err(format!("min_bit_score must be non-negative, got {}", self.min_bit_score));
        }
        if let Some(cover) = self.range_cover {
            if !(cover > 0.0 && cover <= 100.0) {
                return err(format!("range cover must be in (0, 100], got {}", cover));
            }
        }
        Ok(())
    }

    /// Whether targets are ranked by score rather than e-value
    pub fn ranks_by_score(&self) -> bool {
        matches!(self.selection, TargetSelection::TopPercent(_))
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Culling Configuration:");
        tracing::info!("  selection = {}", self.selection);
        if self.max_hsps == 0 {
            tracing::info!("  max_hsps = unlimited");
        } else {
            tracing::info!("  max_hsps = {}", self.max_hsps);
        }
        if self.min_bit_score > 0.0 {
            tracing::info!("  min_bit_score = {}", self.min_bit_score);
        } else {
            tracing::info!("  max_evalue = {}", self.max_evalue);
        }
        if let Some(cover) = self.range_cover {
            tracing::info!("  range culling, cover = {}%", cover);
        }
        tracing::debug!("  hsp_order = {}", self.hsp_order);
        tracing::debug!("  overlap = {}", self.overlap);
    }
}

/// Culling options as supplied, before defaults and exclusivity checks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CullingOptions {
    /// HSP ordering
    pub hsp_order: Option<HspOrder>,
    /// Overlap threshold in percent
    pub overlap_percent: Option<f64>,
    /// HSPs per target
    pub max_hsps: Option<usize>,
    /// Targets per query
    pub max_target_seqs: Option<usize>,
    /// Score window in percent of the best target
    pub top_percent: Option<f64>,
    /// E-value cutoff
    pub max_evalue: Option<f64>,
    /// Bit score cutoff
    pub min_bit_score: Option<f64>,
    /// Range culling cover in percent
    pub range_cover: Option<f64>,
}

impl CullingOptions {
    /// Fill defaults and validate
    ///
    /// # Errors
    /// `SeedError::Config` if both `max_target_seqs` and `top_percent` are
    /// set, or a value is out of range.
    pub fn resolve(&self) -> Result<CullingConfig> {
        let defaults = CullingConfig::default();
        let selection = match (self.max_target_seqs, self.top_percent) {
            (Some(_), Some(_)) => {
                return Err(SeedError::config(
                    Location::phase(Phase::Cull),
                    "max_target_seqs and top_percent are mutually exclusive",
                ))
            }
            (Some(k), None) => TargetSelection::MaxTargetSeqs(k),
            (None, Some(p)) => TargetSelection::TopPercent(p),
            (None, None) => defaults.selection,
        };
        let config = CullingConfig {
            hsp_order: self.hsp_order.unwrap_or(defaults.hsp_order),
            overlap: self.overlap_percent.map_or(defaults.overlap, |p| p / 100.0),
            max_hsps: self.max_hsps.unwrap_or(defaults.max_hsps),
            selection,
            max_evalue: self.max_evalue.unwrap_or(defaults.max_evalue),
            min_bit_score: self.min_bit_score.unwrap_or(defaults.min_bit_score),
            range_cover: self.range_cover,
        };
        config.validate()?;
        Ok(config)
    }
}
