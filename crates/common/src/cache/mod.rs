//! Request deduplication and short-lived response caching
//!
//! - **[`key`]**: [`DedupKey`], a BLAKE3 fingerprint of method, normalized
//!   path and sorted parameters
//! - **[`dedup`]**: [`RequestDeduplicator`], in-flight coalescing plus a TTL
//!   cache
//! - **[`stats`]**: hit/miss/coalesced counters
//!
//! Only idempotent reads should go through the deduplicator; writes take the
//! non-deduplicated path and never invalidate cached reads.

pub mod dedup;
pub mod key;
pub mod stats;

pub use dedup::{DedupOptions, RequestDeduplicator, RequestPriority};
pub use key::DedupKey;
pub use stats::DedupStats;
