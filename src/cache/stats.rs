//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, evictions and expirations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found, expired or self-healed)
    pub misses: u64,
    /// Number of entries removed to reclaim capacity
    pub evictions: u64,
    /// Number of entries removed because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Current payload bytes held
    pub total_bytes: u64,
    /// Configured capacity in bytes
    pub max_bytes: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Utilization ==
    /// Fraction of capacity in use, 0.0 for a zero-capacity cache.
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.max_bytes as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Evictions ==
    /// Adds `count` capacity-driven removals.
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    /// Adds `count` TTL-driven removals.
    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    // == Update Occupancy ==
    /// Updates the entry count and byte total.
    pub fn set_occupancy(&mut self, entries: usize, bytes: u64) {
        self.total_entries = entries;
        self.total_bytes = bytes;
    }
}
