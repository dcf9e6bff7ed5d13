//! Error taxonomy for index construction and culling
//!
//! Library code returns `SeedError`. Construction-phase errors abort the whole
//! build; no partially built index is handed back to the caller.
//!
//! # Error Categories
//!
//! - **Config**: unsupported shape/encoding combination, mutually exclusive options
//! - **Capacity**: table full, position packing overflow, histogram mismatch during fill
//! - **Format**: malformed persisted index (magic, version, shape count, truncation)
//! - **Comparator**: non-comparable scores handed to the culling engine
//! - **Io**: file system operations, with path context

use std::path::PathBuf;
use thiserror::Error;

/// Build phase in which an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configuration validation
    Validate,
    /// Seed enumeration
    Enumerate,
    /// Histogram counting pass
    Count,
    /// Buffer allocation from histogram counts
    Allocate,
    /// Second enumeration pass writing entries
    Fill,
    /// Per-partition sort
    Sort,
    /// Hash table insertion
    Insert,
    /// Persisting or reopening an index
    Persist,
    /// Hit culling
    Cull,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Validate => "validate",
            Phase::Enumerate => "enumerate",
            Phase::Count => "count",
            Phase::Allocate => "allocate",
            Phase::Fill => "fill",
            Phase::Sort => "sort",
            Phase::Insert => "insert",
            Phase::Persist => "persist",
            Phase::Cull => "cull",
        };
        f.write_str(name)
    }
}

/// Where in a build an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Phase that failed
    pub phase: Phase,
    /// Shape index, if the failure is shape-specific
    pub shape: Option<usize>,
    /// Key partition, if the failure is partition-specific
    pub partition: Option<usize>,
}

impl Location {
    /// A location naming only the phase
    pub fn phase(phase: Phase) -> Self {
        Self { phase, shape: None, partition: None }
    }

    /// Attach a shape index
    pub fn shape(mut self, shape: usize) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Attach a key partition
    pub fn partition(mut self, partition: usize) -> Self {
        self.partition = Some(partition);
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} phase", self.phase)?;
        if let Some(shape) = self.shape {
            write!(f, ", shape {}", shape)?;
        }
        if let Some(partition) = self.partition {
            write!(f, ", partition {}", partition)?;
        }
        Ok(())
    }
}

/// Error type for seed indexing and culling
#[derive(Error, Debug)]
pub enum SeedError {
    /// Invalid or unsupported configuration
    #[error("configuration error ({location}): {detail}")]
    Config {
        /// Where the problem was detected
        location: Location,
        /// Human-readable description
        detail: String,
    },

    /// A sized structure received more (or fewer) entries than planned
    #[error("capacity error ({location}): {detail}")]
    Capacity {
        /// Where the problem was detected
        location: Location,
        /// Human-readable description
        detail: String,
    },

    /// Malformed persisted index
    #[error("invalid index format in '{}': {detail}", path.display())]
    Format {
        /// File being read
        path: PathBuf,
        /// Human-readable description
        detail: String,
    },

    /// Scores that cannot be ordered
    #[error("comparator error: target {target} has non-comparable {field} ({value})")]
    Comparator {
        /// Offending target id
        target: u32,
        /// Field name ("evalue" or "bit_score")
        field: &'static str,
        /// Offending value
        value: f64,
    },

    /// I/O error with path context
    #[error("I/O error during {operation} on '{}': {source}", path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Operation being performed
        operation: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SeedError {
    /// Build a configuration error
    pub fn config(location: Location, detail: impl Into<String>) -> Self {
        SeedError::Config { location, detail: detail.into() }
    }

    /// Build a capacity error
    pub fn capacity(location: Location, detail: impl Into<String>) -> Self {
        SeedError::Capacity { location, detail: detail.into() }
    }

    /// Build a format error
    pub fn format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        SeedError::Format { path: path.into(), detail: detail.into() }
    }

    /// Build an I/O error
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        SeedError::Io { path: path.into(), operation, source }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, SeedError>;
