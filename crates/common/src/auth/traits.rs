//! Collaborator traits for the token lifecycle
//!
//! The token manager never talks to HTTP or disk directly. Persistence goes
//! through [`TokenStorage`] and the refresh endpoint through
//! [`RefreshClient`], so tests can inject scripted implementations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::storage::StorageError;
use super::types::{RefreshOutcome, TokenPair};
use crate::error::{ErrorClassification, ErrorSeverity};

/// Persistent home of the current token pair
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Replace the stored pair
    async fn set_tokens(&self, pair: &TokenPair) -> Result<(), StorageError>;

    /// Current access token, if any
    async fn access_token(&self) -> Result<Option<String>, StorageError>;

    /// Current refresh token, if any
    async fn refresh_token(&self) -> Result<Option<String>, StorageError>;

    /// Forget all tokens
    async fn clear_tokens(&self) -> Result<(), StorageError>;
}

/// Why a call to the refresh endpoint failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    /// The endpoint answered with a non-2xx status
    #[error("refresh endpoint returned {status}")]
    Status { status: u16, message: Option<String>, retry_after: Option<Duration> },

    /// No response was received
    #[error("refresh request failed: {0}")]
    Network(String),

    /// The response was 2xx but could not be used
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
}

impl ErrorClassification for RefreshFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::InvalidResponse(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Status { status: 401 | 403, .. } => ErrorSeverity::Critical,
            Self::InvalidResponse(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }
}

/// Client for the token refresh endpoint
#[async_trait]
pub trait RefreshClient: Send + Sync {
    /// Exchange the refresh credential for new tokens
    ///
    /// `refresh_token` is `None` in cookie mode, where the credential travels
    /// as a cookie.
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshOutcome, RefreshFailure>;
}
