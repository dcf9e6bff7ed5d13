//! Run classification and statistics
//!
//! After a sorted list is built, each run of entries sharing a key is
//! classified as singleton, light or heavy by its length. Heavy runs are the
//! repetitive seeds that dominate lookup cost downstream.

use crate::sorted_list::SeedEntry;
use tracing::info;

/// Run length threshold between light and heavy runs
pub const MAX_LIGHT_RUN: usize = 64;

/// Run type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    /// A key seen once
    Singleton,
    /// 1 < length <= MAX_LIGHT_RUN
    Light,
    /// length > MAX_LIGHT_RUN
    Heavy,
}

impl RunType {
    /// Classify a run by its length
    pub fn from_run_length(len: usize) -> Self {
        match len {
            0 | 1 => RunType::Singleton,
            2..=MAX_LIGHT_RUN => RunType::Light,
            _ => RunType::Heavy,
        }
    }
}

/// Statistics about run lengths and distribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    /// Number of distinct keys
    pub num_keys: u64,

    /// Total number of entries
    pub num_entries: u64,

    /// Runs of length 1
    pub num_singleton_runs: u64,

    /// Runs of length 2..=MAX_LIGHT_RUN
    pub num_light_runs: u64,

    /// Runs longer than MAX_LIGHT_RUN
    pub num_heavy_runs: u64,

    /// Entries in heavy runs
    pub num_entries_in_heavy: u64,

    /// Longest run
    pub max_run_length: usize,
}

impl RunStatistics {
    /// Create a new statistics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one run
    pub fn add_run(&mut self, run: &[SeedEntry]) {
        let len = run.len();
        self.num_keys += 1;
        self.num_entries += len as u64;
        self.max_run_length = self.max_run_length.max(len);
        match RunType::from_run_length(len) {
            RunType::Singleton => self.num_singleton_runs += 1,
            RunType::Light => self.num_light_runs += 1,
            RunType::Heavy => {
                self.num_heavy_runs += 1;
                self.num_entries_in_heavy += len as u64;
            }
        }
    }

    /// Combine statistics of disjoint partitions
    pub fn merge(&mut self, other: &RunStatistics) {
        self.num_keys += other.num_keys;
        self.num_entries += other.num_entries;
        self.num_singleton_runs += other.num_singleton_runs;
        self.num_light_runs += other.num_light_runs;
        self.num_heavy_runs += other.num_heavy_runs;
        self.num_entries_in_heavy += other.num_entries_in_heavy;
        self.max_run_length = self.max_run_length.max(other.max_run_length);
    }

    /// Log statistics summary via tracing
    pub fn print_summary(&self) {
        let pct = |n: u64, d: u64| if d == 0 { 0.0 } else { n as f64 * 100.0 / d as f64 };
        info!("Run Statistics:");
        info!("  Distinct keys: {}", self.num_keys);
        info!("  Total entries: {}", self.num_entries);
        info!(
            "  Singleton runs: {} ({:.2}%)",
            self.num_singleton_runs,
            pct(self.num_singleton_runs, self.num_keys)
        );
        info!(
            "  Light runs (2-{}): {} ({:.2}%)",
            MAX_LIGHT_RUN,
            self.num_light_runs,
            pct(self.num_light_runs, self.num_keys)
        );
        info!(
            "  Heavy runs (>{}): {} ({:.2}%)",
            MAX_LIGHT_RUN,
            self.num_heavy_runs,
            pct(self.num_heavy_runs, self.num_keys)
        );
        info!("  Max run length: {}", self.max_run_length);
        info!(
            "  Entries in heavy runs: {} ({:.2}%)",
            self.num_entries_in_heavy,
            pct(self.num_entries_in_heavy, self.num_entries)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::PackedPosition;

    fn run(key: u32, len: usize) -> Vec<SeedEntry> {
        (0..len)
            .map(|i| SeedEntry::new(key, PackedPosition::new(0, i as u32)))
            .collect()
    }

    #[test]
    fn test_run_type_classification() {
        assert_eq!(RunType::from_run_length(1), RunType::Singleton);
        assert_eq!(RunType::from_run_length(2), RunType::Light);
        assert_eq!(RunType::from_run_length(64), RunType::Light);
        assert_eq!(RunType::from_run_length(65), RunType::Heavy);
    }

    #[test]
    fn test_run_statistics() {
        let mut stats = RunStatistics::new();
        stats.add_run(&run(1, 1));
        stats.add_run(&run(2, 2));
        stats.add_run(&run(3, 65));

        assert_eq!(stats.num_keys, 3);
        assert_eq!(stats.num_entries, 68);
        assert_eq!(stats.num_singleton_runs, 1);
        assert_eq!(stats.num_light_runs, 1);
        assert_eq!(stats.num_heavy_runs, 1);
        assert_eq!(stats.num_entries_in_heavy, 65);
        assert_eq!(stats.max_run_length, 65);

        let mut total = RunStatistics::new();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.num_keys, 6);
        assert_eq!(total.max_run_length, 65);
    }
}
