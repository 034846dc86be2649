//! Resilience patterns for transient failures
//!
//! This module provides:
//! - **[`backoff`]**: exponential backoff with proportional jitter
//! - **[`retry_queue`]**: a single-worker FIFO queue that retries operations,
//!   honours server `Retry-After` hints and pauses every queued job while a
//!   rate-limit window is open
//!
//! Retryability comes from [`ErrorClassification`](crate::ErrorClassification)
//! unless a call overrides it with [`RetryOptions::retry_if`].

pub mod backoff;
pub mod retry_queue;

pub use backoff::BackoffPolicy;
pub use retry_queue::{RateLimitWindow, RetryOptions, RetryQueue, RetryQueueError};
