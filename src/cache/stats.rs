// Cache hit/miss/eviction counters and derived savings.

use std::time::Duration;

/// Snapshot of a cache's lifetime counters, plus the aggregate cost saved
/// by serving reuses out of the cache instead of recomputing them.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub flushed: u64,
    pub pruned: u64,
    pub saved_cost: Duration,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expired(&mut self) {
        self.expired += 1;
    }

    pub fn record_flushed(&mut self) {
        self.flushed += 1;
    }

    pub fn record_pruned(&mut self) {
        self.pruned += 1;
    }
}
