//! Metrics collection modules
//!
//! Thread-safe, lock-free counters.

pub mod api;

pub use api::{ApiMetrics, ApiMetricsSnapshot};
