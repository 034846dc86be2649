//! Transport-agnostic core shared across LedgerLens crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification ([`ErrorClassification`],
//!   [`ErrorSeverity`])
//! - `runtime`: async infrastructure (JWT decoding, token lifecycle, retry
//!   queue, request deduplication, scheduler, client events). Enabled by
//!   default.
//! - `observability`: tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod auth;
#[cfg(feature = "runtime")]
pub mod cache;
#[cfg(feature = "runtime")]
pub mod events;
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use auth::{
    RefreshClient, RefreshFailure, RefreshOutcome, TokenManager, TokenManagerConfig,
    TokenManagerError, TokenPair, TokenStorage,
};
#[cfg(feature = "runtime")]
pub use cache::{DedupKey, DedupOptions, DedupStats, RequestDeduplicator, RequestPriority};
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use events::{
    ClientEvent, EventDisposition, EventNotifier, LoginRedirect, SessionExpiryReason,
    SessionListener,
};
#[cfg(feature = "runtime")]
pub use resilience::{BackoffPolicy, RateLimitWindow, RetryOptions, RetryQueue, RetryQueueError};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, Scheduler, SystemClock, TimerHandle, TokioScheduler};
