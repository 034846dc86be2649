//! Configuration structures
//!
//! Every section deserializes with defaults so partial JSON/TOML files and
//! environment overrides only need to name what they change.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_CRITICAL_ENDPOINTS, DEFAULT_DEDUP_TTL_MS,
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_UPLOAD_MAX_BYTES, DEFAULT_UPLOAD_MIME_TYPES,
    DEFAULT_USER_AGENT, MAX_REFRESH_FAILURES, MIN_REFRESH_INTERVAL_MS, REFRESH_PATH,
    REFRESH_TIMEOUT_MS, SESSION_TIMEOUT_SECS,
};
use crate::types::AuthTransport;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub retry: RetryConfig,
    pub dedup: DedupConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

/// Backend API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL for the API (e.g., "https://app.ledgerlens.io")
    pub base_url: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Token lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub transport: AuthTransport,
    pub refresh_path: String,
    pub min_refresh_interval_ms: u64,
    pub refresh_timeout_ms: u64,
    pub max_refresh_failures: u32,
    pub session_timeout_seconds: u64,
    /// Persist tokens to this file; in-memory storage when unset
    pub token_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            transport: AuthTransport::Header,
            refresh_path: REFRESH_PATH.to_string(),
            min_refresh_interval_ms: MIN_REFRESH_INTERVAL_MS,
            refresh_timeout_ms: REFRESH_TIMEOUT_MS,
            max_refresh_failures: MAX_REFRESH_FAILURES,
            session_timeout_seconds: SESSION_TIMEOUT_SECS,
            token_file: None,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }
}

/// Retry queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ratio: f64,
    /// Path prefixes routed through the retry queue
    pub critical_endpoints: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            critical_endpoints: DEFAULT_CRITICAL_ENDPOINTS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Read deduplication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub cache_ttl_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true, cache_ttl_ms: DEFAULT_DEDUP_TTL_MS }
    }
}

impl DedupConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Outbound/inbound validation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Extra origins allowed besides the API base URL's own origin
    pub allowed_origins: Vec<String>,
    pub upload_max_bytes: u64,
    pub upload_mime_types: Vec<String>,
    /// Regex every uploaded file name must match
    pub upload_name_pattern: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            upload_mime_types: DEFAULT_UPLOAD_MIME_TYPES.iter().map(|s| (*s).to_string()).collect(),
            upload_name_pattern: r"^[\w\- .()]{1,128}\.(pdf|png|jpe?g|csv)$".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
