use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the workers of one rebuild.
#[derive(Default)]
pub struct RebuildStats {
    pub rows_processed: AtomicU64,
    pub rows_accepted: AtomicU64,
    pub rows_quarantined: AtomicU64,
    pub rows_rejected: AtomicU64,
    pub invalid_results: AtomicU64,
    pub rounds_defaulted: AtomicU64,
}

impl RebuildStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processed(&self, count: u64) {
        self.rows_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_accepted(&self, count: u64) {
        self.rows_accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_quarantined(&self, count: u64) {
        self.rows_quarantined.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rows_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid_results(&self) {
        self.invalid_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_defaulted(&self) {
        self.rounds_defaulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.rows_accepted.load(Ordering::Relaxed)
    }

    pub fn quarantined(&self) -> u64 {
        self.rows_quarantined.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rows_rejected.load(Ordering::Relaxed)
    }

    pub fn invalid_results(&self) -> u64 {
        self.invalid_results.load(Ordering::Relaxed)
    }

    pub fn rounds_defaulted(&self) -> u64 {
        self.rounds_defaulted.load(Ordering::Relaxed)
    }

    pub fn summary(
        &self,
        schema: &str,
        distinct_athletes: u64,
        partitions: BTreeMap<String, u64>,
    ) -> RebuildSummary {
        RebuildSummary {
            schema: schema.to_string(),
            rows_processed: self.processed(),
            rows_accepted: self.accepted(),
            rows_quarantined: self.quarantined(),
            rows_rejected: self.rejected(),
            invalid_results: self.invalid_results(),
            rounds_defaulted: self.rounds_defaulted(),
            distinct_athletes,
            partitions,
        }
    }
}

/// Published as `summary.json`. Contains no timestamps, so identical inputs
/// produce an identical summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub schema: String,
    pub rows_processed: u64,
    pub rows_accepted: u64,
    pub rows_quarantined: u64,
    pub rows_rejected: u64,
    pub invalid_results: u64,
    /// Empty or "none" rounds written as Final
    pub rounds_defaulted: u64,
    pub distinct_athletes: u64,
    pub partitions: BTreeMap<String, u64>,
}
