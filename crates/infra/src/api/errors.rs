//! API-specific error types
//!
//! Maps HTTP outcomes onto one taxonomy with retry metadata. Server cooldown
//! hints come from the `Retry-After` header (delta-seconds or HTTP date) or,
//! failing that, the JSON body fields `wait_time`/`retry_after`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerlens_common::auth::TokenManagerError;
use ledgerlens_common::error::{ErrorClassification, ErrorSeverity};
use ledgerlens_common::resilience::RetryQueueError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use thiserror::Error;

use crate::http::TransportError;

/// Categories of API errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// 401/403 and terminal session states
    Authentication,
    /// 429
    RateLimit,
    /// 5xx - retryable
    Server,
    /// Other 4xx, blocked requests, undecodable bodies - non-retryable
    Client,
    /// No response at all - retryable
    Network,
    Config,
}

/// API operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded{}", retry_hint(*retry_after))]
    RateLimited { retry_after: Option<Duration>, upgrade_required: bool, message: Option<String> },

    #[error("Server error ({status})")]
    Server { status: u16, message: Option<String> },

    /// The access token was rejected and could not be renewed in time
    #[error("Authentication failed: access token rejected")]
    AuthExpired,

    #[error("Refresh token revoked")]
    RefreshRevoked,

    #[error("Client error ({status}){}", detail(message.as_deref()))]
    Client { status: u16, message: Option<String>, upgrade_required: bool },

    #[error("Session expired, please log in again")]
    SessionExpired,

    /// Refused locally by the security policy
    #[error("Request blocked: {0}")]
    Blocked(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_hint(retry_after: Option<Duration>) -> String {
    retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default()
}

fn detail(message: Option<&str>) -> String {
    message.map(|m| format!(": {m}")).unwrap_or_default()
}

/// Fields the backend puts in error bodies
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    wait_time: Option<f64>,
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    upgrade_required: bool,
}

impl ErrorBody {
    fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn message(&self) -> Option<String> {
        self.detail.clone().or_else(|| self.message.clone())
    }

    fn wait_hint(&self) -> Option<Duration> {
        self.wait_time
            .or(self.retry_after)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date
///
/// A date in the past yields zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

impl ApiError {
    /// Classify a non-2xx response
    pub fn from_response(status: u16, headers: &HeaderMap, body: &[u8], now: DateTime<Utc>) -> Self {
        let parsed = ErrorBody::parse(body);
        let message = parsed.message();

        match status {
            401 => Self::AuthExpired,
            429 => {
                let header_hint = headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, now));
                Self::RateLimited {
                    retry_after: header_hint.or_else(|| parsed.wait_hint()),
                    upgrade_required: parsed.upgrade_required,
                    message,
                }
            }
            s if s >= 500 => Self::Server { status: s, message },
            s => Self::Client { status: s, message, upgrade_required: parsed.upgrade_required },
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::AuthExpired | Self::RefreshRevoked | Self::SessionExpired => {
                ApiErrorCategory::Authentication
            }
            Self::RateLimited { .. } => ApiErrorCategory::RateLimit,
            Self::Server { .. } => ApiErrorCategory::Server,
            Self::Client { .. } | Self::Blocked(_) | Self::Decode(_) => ApiErrorCategory::Client,
            Self::Network(_) | Self::Timeout(_) => ApiErrorCategory::Network,
            Self::Config(_) | Self::Internal(_) => ApiErrorCategory::Config,
        }
    }

    /// Plan-limit response that the UI should turn into an upgrade prompt
    pub fn upgrade_required(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { upgrade_required: true, .. }
                | Self::Client { upgrade_required: true, .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthExpired => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::RateLimited { message, .. }
            | Self::Server { message, .. }
            | Self::Client { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            // Waiting does not lift a plan limit
            Self::RateLimited { upgrade_required, .. } => !upgrade_required,
            other => matches!(
                other.category(),
                ApiErrorCategory::Network | ApiErrorCategory::Server
            ),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ApiErrorCategory::Authentication => ErrorSeverity::Critical,
            ApiErrorCategory::Config => ErrorSeverity::Error,
            ApiErrorCategory::Client if matches!(self, Self::Blocked(_)) => ErrorSeverity::Error,
            ApiErrorCategory::Client => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::RefreshRevoked)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(timeout) => Self::Timeout(timeout),
            TransportError::Build(message) => Self::Config(message),
            TransportError::Connect(message) | TransportError::Request(message) => {
                Self::Network(message)
            }
        }
    }
}

impl From<TokenManagerError> for ApiError {
    fn from(err: TokenManagerError) -> Self {
        match err {
            TokenManagerError::SessionExpired => Self::SessionExpired,
            TokenManagerError::RefreshRevoked => Self::RefreshRevoked,
            TokenManagerError::TooFrequent { retry_after } => {
                Self::RateLimited { retry_after, upgrade_required: false, message: None }
            }
            TokenManagerError::Server { status } => Self::Server { status, message: None },
            TokenManagerError::Rejected { status, message } => {
                Self::Client { status, message, upgrade_required: false }
            }
            TokenManagerError::Network(message) => Self::Network(message),
            TokenManagerError::Timeout(timeout) => Self::Timeout(timeout),
            TokenManagerError::InvalidResponse(message) => Self::Decode(message),
            TokenManagerError::Superseded => Self::AuthExpired,
            TokenManagerError::Storage(message) | TokenManagerError::Internal(message) => {
                Self::Internal(message)
            }
        }
    }
}

impl From<RetryQueueError<ApiError>> for ApiError {
    fn from(err: RetryQueueError<ApiError>) -> Self {
        match err {
            RetryQueueError::Exhausted { last_error, .. } => last_error,
            RetryQueueError::NonRetryable(err) => err,
            RetryQueueError::Closed => Self::Internal("retry queue closed".to_string()),
        }
    }
}

impl From<ApiError> for ledgerlens_domain::LedgerLensError {
    fn from(err: ApiError) -> Self {
        match err.category() {
            ApiErrorCategory::Authentication => Self::Auth(err.to_string()),
            ApiErrorCategory::Network | ApiErrorCategory::Server | ApiErrorCategory::RateLimit => {
                Self::Network(err.to_string())
            }
            ApiErrorCategory::Config => Self::Config(err.to_string()),
            ApiErrorCategory::Client if matches!(err, ApiError::Blocked(_)) => {
                Self::Security(err.to_string())
            }
            ApiErrorCategory::Client => Self::InvalidInput(err.to_string()),
        }
    }
}
