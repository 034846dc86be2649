//! Request-level metrics for the API client
//!
//! ## Design
//! - **SeqCst ordering** for the atomics behind derived values
//!   (`avg_request_time_ms`)
//! - **Relaxed** for independent counters
//! - **Microsecond storage**, reporting helpers convert to ms

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::ApiErrorCategory;

/// Counters shared by every clone of an [`ApiClient`](crate::api::ApiClient)
#[derive(Debug, Default)]
pub struct ApiMetrics {
    requests: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
    refreshes: AtomicU64,
    rate_limited: AtomicU64,
    upgrade_required: AtomicU64,
    blocked: AtomicU64,
    total_request_time_micros: AtomicU64,
    timed_requests: AtomicU64,
}

/// Point-in-time copy of [`ApiMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApiMetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub refreshes: u64,
    pub rate_limited: u64,
    pub upgrade_required: u64,
    pub blocked: u64,
    pub avg_request_time_ms: f64,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One transport round trip and how long it took
    pub fn record_request(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_request_time_micros.fetch_add(micros, Ordering::SeqCst);
        self.timed_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// A request that ended in an error, by category
    pub fn record_failure(&self, category: ApiErrorCategory) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if category == ApiErrorCategory::RateLimit {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Called from the retry queue's `on_retry` hook
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A 401 that sent the client through the token manager
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upgrade_required(&self) {
        self.upgrade_required.fetch_add(1, Ordering::Relaxed);
    }

    /// A request the security policy refused to send
    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Average transport time in milliseconds; 0.0 before the first request
    pub fn avg_request_time_ms(&self) -> f64 {
        let total = self.total_request_time_micros.load(Ordering::SeqCst);
        let count = self.timed_requests.load(Ordering::SeqCst);
        if count == 0 {
            return 0.0;
        }
        (total as f64 / count as f64) / 1_000.0
    }

    pub fn snapshot(&self) -> ApiMetricsSnapshot {
        ApiMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            upgrade_required: self.upgrade_required.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            avg_request_time_ms: self.avg_request_time_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let metrics = ApiMetrics::new();
        assert_eq!(metrics.snapshot(), ApiMetricsSnapshot::default());
        assert_eq!(metrics.avg_request_time_ms(), 0.0);
    }

    #[test]
    fn test_average_request_time() {
        let metrics = ApiMetrics::new();
        metrics.record_request(Duration::from_millis(100));
        metrics.record_request(Duration::from_millis(300));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert!((snapshot.avg_request_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_limited_failures_are_counted_twice() {
        let metrics = ApiMetrics::new();
        metrics.record_failure(ApiErrorCategory::RateLimit);
        metrics.record_failure(ApiErrorCategory::Server);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.rate_limited, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(ApiMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_retry();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().retries, 8_000);
    }
}
