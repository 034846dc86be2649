//! Deduplicator statistics
//!
//! Counters are atomics so recording never takes the deduplicator lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of deduplicator activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Entries currently cached
    pub cached: usize,

    /// Requests currently in flight
    pub in_flight: usize,

    /// Requests answered from the TTL cache
    pub hits: u64,

    /// Requests that ran the operation
    pub misses: u64,

    /// Requests that joined an in-flight operation
    pub coalesced: u64,

    /// Cache entries dropped because their TTL elapsed
    pub expirations: u64,
}

impl DedupStats {
    /// Share of requests served without running the operation
    pub fn savings_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses + self.coalesced
    }
}

/// Thread-safe metrics collector for deduplicator operations
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsCollector {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    coalesced: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cached: usize, in_flight: usize) -> DedupStats {
        DedupStats {
            cached,
            in_flight,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
