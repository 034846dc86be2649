//! Error classification shared by every layer of the client core
//!
//! Each layer keeps its own `thiserror` enum (`TokenManagerError`,
//! `RetryQueueError`, the infra `ApiError`, ...). What they share is the
//! [`ErrorClassification`] trait: the retry queue, the token manager and the
//! HTTP facade only ever ask an error *how it should be treated*, never what
//! concrete type it is.
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum FetchError {
//!     #[error("connection reset")]
//!     Reset,
//!     #[error("bad request")]
//!     BadRequest,
//! }
//!
//! impl ErrorClassification for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Reset)
//!     }
//!     fn severity(&self) -> ErrorSeverity {
//!         ErrorSeverity::Warning
//!     }
//!     fn is_critical(&self) -> bool {
//!         false
//!     }
//!     fn retry_after(&self) -> Option<Duration> {
//!         None
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Trait for classifying errors by how callers should react to them
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again:
    /// - No response at all (offline, DNS, connection reset, timeout)
    /// - Rate limiting (HTTP 429)
    /// - Server errors (HTTP 5xx)
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for logging and alerting decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a terminal error requiring user action
    ///
    /// For the client core this means the session cannot be recovered
    /// without a fresh login.
    fn is_critical(&self) -> bool;

    /// Get the server-mandated retry delay if one was provided
    ///
    /// Returns `Some(Duration)` when the failing response carried a
    /// `Retry-After` header or a structured `wait_time`/`retry_after` field.
    /// A server hint always wins over locally computed backoff.
    fn retry_after(&self) -> Option<Duration>;

    /// Check if this error signals a rate limit
    ///
    /// Rate-limited failures pause every queued request, not just the one
    /// that failed.
    fn is_rate_limited(&self) -> bool {
        false
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
