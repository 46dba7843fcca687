//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, coalesced waits
//! and evictions, plus the memory accounting at the time of the snapshot.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups served from a fresh resident entry
    pub hits: u64,
    /// Lookups that ran the compute closure (absent or stale key)
    pub misses: u64,
    /// Lookups that joined a computation already in flight
    pub coalesced: u64,
    /// Entries removed by the budget sweep
    pub evictions: u64,
    /// Entries removed because their TTL had passed
    pub expirations: u64,
    /// Computations that failed, panicked or were cancelled
    pub failures: u64,
    /// Current number of entries in the index, pending ones included
    pub total_entries: usize,
    /// Sum of the sizes of resident entries
    pub used: usize,
    /// Configured size budget
    pub budget: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Coalesced lookups count as hits since they did not run a computation.
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    // == Record Hit ==
    /// Counts a lookup served from a fresh resident entry.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Counts a lookup that ran the compute closure.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Coalesced ==
    /// Counts a lookup that joined a computation already in flight.
    pub fn record_coalesced(&mut self) {
        self.coalesced += 1;
    }

    // == Record Eviction ==
    /// Counts an entry removed to bring memory back under budget.
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Record Expiration ==
    /// Counts an entry dropped because its TTL had passed.
    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    // == Record Failure ==
    /// Counts a computation that failed, panicked or was cancelled.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }
}
