//! Index configuration
//!
//! `IndexConfig` is the explicitly constructed context object passed by
//! reference to every construction component: the active shapes, the
//! reduced alphabet, the key encoding and the resource parameters.

use crate::constants::{
    DEFAULT_LOAD_FACTOR, DEFAULT_PARTITION_BITS, DEFAULT_SEQ_CHUNKS, DEFAULT_SHAPES, MAX_PARTITION_BITS,
    MAX_SEQ_CHUNKS,
};
use crate::encoding::Reduction;
use crate::error::{Location, Phase, Result, SeedError};
use crate::shape::{compile_codecs, SeedCodec, SeedEncoding, ShapeSet};

/// Default seed for in-memory hashing (sketch selection, approximate counts)
pub const DEFAULT_HASH_SEED: u64 = 1;

/// Which offsets of a sequence produce seeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPolicy {
    /// Every offset where the shape fits
    #[default]
    Exact,
    /// The smallest key of every window of `window` consecutive offsets
    Minimizer {
        /// Window size in offsets
        window: usize,
    },
    /// At most `size` distinct keys per sequence, chosen by smallest hash
    Sketch {
        /// Maximum seeds per sequence
        size: usize,
    },
}

impl std::fmt::Display for ExtractionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionPolicy::Exact => write!(f, "exact"),
            ExtractionPolicy::Minimizer { window } => write!(f, "minimizer(window={})", window),
            ExtractionPolicy::Sketch { size } => write!(f, "sketch(size={})", size),
        }
    }
}

/// Configuration parameters for building seed indexes
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Active shapes; shape id = position in the set
    pub shapes: ShapeSet,

    /// Reduced alphabet
    pub reduction: Reduction,

    /// Key encoding
    pub encoding: SeedEncoding,

    /// Seed extraction policy
    pub extraction: ExtractionPolicy,

    /// Number of low key bits selecting the key partition
    pub partition_bits: u32,

    /// Number of letter-balanced sequence chunks processed in parallel
    pub seq_chunks: usize,

    /// Number of threads for parallel operations (0 = all available cores)
    pub num_threads: usize,

    /// Hash table slots per stored key (must be > 1)
    pub load_factor: f64,

    /// Sequences shorter than this are not indexed
    pub min_seq_len: usize,

    /// Minimum composition entropy of a seed (0 = no complexity filter)
    pub complexity_cut: f64,

    /// Number of contiguous key-partition ranges built one at a time
    pub index_chunks: usize,

    /// Seed for in-memory hashing
    pub hash_seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shapes: ShapeSet::from_codes(DEFAULT_SHAPES).unwrap_or_default(),
            reduction: Reduction::murphy10(),
            encoding: SeedEncoding::SpacedFactor,
            extraction: ExtractionPolicy::Exact,
            partition_bits: DEFAULT_PARTITION_BITS,
            seq_chunks: DEFAULT_SEQ_CHUNKS,
            num_threads: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            min_seq_len: 0,
            complexity_cut: 0.0,
            index_chunks: 1,
            hash_seed: DEFAULT_HASH_SEED,
        }
    }
}

impl IndexConfig {
    /// Create a validated configuration for the given shape codes
    pub fn new<S: AsRef<str>>(shape_codes: &[S]) -> Result<Self> {
        let config = Self {
            shapes: ShapeSet::from_codes(shape_codes)?,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of key partitions
    #[inline]
    pub fn partition_count(&self) -> usize {
        1usize << self.partition_bits
    }

    /// Compile one codec per active shape
    pub fn codecs(&self) -> Result<Vec<SeedCodec>> {
        compile_codecs(&self.shapes, &self.reduction, self.encoding)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        let err = |detail: String| Err(SeedError::config(Location::phase(Phase::Validate), detail));
        if self.shapes.is_empty() {
            return err("no shapes configured".to_string());
        }
        if self.partition_bits > MAX_PARTITION_BITS {
            return err(format!(
                "partition_bits must be at most {}, got {}",
                MAX_PARTITION_BITS, self.partition_bits
            ));
        }
        if self.seq_chunks == 0 || self.seq_chunks > MAX_SEQ_CHUNKS {
            return err(format!("seq_chunks must be in [1, {}], got {}", MAX_SEQ_CHUNKS, self.seq_chunks));
        }
        if !self.load_factor.is_finite() || self.load_factor <= 1.0 {
            return err(format!("load_factor must be greater than 1, got {}", self.load_factor));
        }
        if !self.complexity_cut.is_finite() || self.complexity_cut < 0.0 {
            return err(format!("complexity_cut must be non-negative, got {}", self.complexity_cut));
        }
        if self.index_chunks == 0 || self.index_chunks > self.partition_count() {
            return err(format!(
                "index_chunks must be in [1, {}], got {}",
                self.partition_count(),
                self.index_chunks
            ));
        }
        match self.extraction {
            ExtractionPolicy::Minimizer { window: 0 } => {
                return err("minimizer window must be positive".to_string());
            }
            ExtractionPolicy::Sketch { size: 0 } => {
                return err("sketch size must be positive".to_string());
            }
            _ => {}
        }
        for (shape_id, codec) in self.codecs()?.iter().enumerate() {
            codec.check_partitioning(shape_id, self.partition_bits)?;
        }
        Ok(())
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Index Configuration:");
        for (id, shape) in self.shapes.iter().enumerate() {
            tracing::info!("  shape {} = {} (weight {})", id, shape, shape.weight());
        }
        tracing::info!("  reduction = {} ({} letters)", self.reduction, self.reduction.size());
        tracing::info!("  encoding = {}", self.encoding);
        tracing::info!("  extraction = {}", self.extraction);
        tracing::info!("  partitions = {}", self.partition_count());
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::debug!("  seq_chunks = {}", self.seq_chunks);
        tracing::debug!("  load_factor = {}", self.load_factor);
        tracing::debug!("  min_seq_len = {}", self.min_seq_len);
        tracing::debug!("  complexity_cut = {}", self.complexity_cut);
        tracing::debug!("  index_chunks = {}", self.index_chunks);
        tracing::debug!("  lowercase_masking = {}", self.reduction.lowercase_masking());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.shapes.len(), 2);
        assert_eq!(config.partition_count(), 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_config() {
        let config = IndexConfig::new(&["1111"]).unwrap();
        assert_eq!(config.shapes.len(), 1);
        assert_eq!(config.codecs().unwrap()[0].weight(), 4);
    }

    #[test]
    fn test_validate_load_factor() {
        let config = IndexConfig { load_factor: 1.0, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        let config = IndexConfig { load_factor: f64::NAN, ..IndexConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_partition_bits() {
        let config = IndexConfig { partition_bits: 17, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        // 40-bit keys need at least 8 partition bits for a 32-bit remainder
        let config = IndexConfig { partition_bits: 4, ..IndexConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_index_chunks() {
        let config = IndexConfig { index_chunks: 0, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        let config = IndexConfig { index_chunks: 257, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        let config = IndexConfig { index_chunks: 4, ..IndexConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_seq_chunks() {
        let config = IndexConfig { seq_chunks: 0, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        let config = IndexConfig { seq_chunks: MAX_SEQ_CHUNKS + 1, ..IndexConfig::default() };
        assert!(config.validate().is_err());
        let config = IndexConfig { seq_chunks: MAX_SEQ_CHUNKS, ..IndexConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unsupported_encoding() {
        let config = IndexConfig { encoding: SeedEncoding::Contiguous, ..IndexConfig::default() };
        assert!(matches!(config.validate(), Err(SeedError::Config { .. })));
    }

    #[test]
    fn test_validate_extraction_parameters() {
        let config = IndexConfig {
            extraction: ExtractionPolicy::Minimizer { window: 0 },
            ..IndexConfig::default()
        };
        assert!(config.validate().is_err());
        let config = IndexConfig {
            extraction: ExtractionPolicy::Sketch { size: 16 },
            ..IndexConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
