//! Read-path statistics.
//!
//! Every completed read increments exactly one of the three counters: a hit
//! (all k decoded blocks came from cache), a partial hit (some cache, some
//! backend), or a miss (no cache blocks, including quorum-lost reads). The
//! handle is shared across all reads of a client and injected through the
//! constructor so tests can assert on it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub partial_hits: u64,
    pub misses: u64,
}

impl StatsSnapshot {
    /// Total completed reads.
    pub fn total(&self) -> u64 {
        self.hits + self.partial_hits + self.misses
    }
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn partial_hits(&self) -> u64 {
        self.partial_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            partial_hits: self.partial_hits(),
            misses: self.misses(),
        }
    }
}
