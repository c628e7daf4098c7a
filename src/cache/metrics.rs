//! Cache Metrics Module
//!
//! Tracks cache activity: insertions, updates, hits, misses and evictions.

use serde::Serialize;

// == Metrics ==
/// Snapshot of cache activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Number of new keys stored
    pub insertions: u64,
    /// Number of sets that replaced an existing key
    pub updates: u64,
    /// Number of successful lookups
    pub hits: u64,
    /// Number of lookups that found nothing live (absent or expired)
    pub misses: u64,
    /// Number of items removed for any reason other than `delete_all`
    pub evictions: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl Metrics {
    // == Constructor ==
    /// Creates a new Metrics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_insertion(&mut self) {
        self.insertions += 1;
    }

    pub(crate) fn record_update(&mut self) {
        self.updates += 1;
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }
}
