//! Application constants
//!
//! Centralized location for the endpoint paths and timing defaults used by
//! the client core.

// Endpoint paths
pub const REFRESH_PATH: &str = "/api/auth/refresh/";
pub const LOGIN_PATH: &str = "/api/auth/login/";
pub const LOGOUT_PATH: &str = "/api/auth/logout/";
pub const AUTH_PATH_PREFIX: &str = "/api/auth/";
pub const CONNECT_TOKEN_PATH: &str = "/api/connections/token/";
pub const CONNECTION_STATUS_PATH: &str = "/api/connections";

/// Endpoints whose failures are retried through the retry queue.
pub const DEFAULT_CRITICAL_ENDPOINTS: &[&str] =
    &["/api/dashboard", "/api/accounts", "/api/transactions", "/api/auth/refresh"];

// Token lifecycle
pub const MIN_REFRESH_INTERVAL_MS: u64 = 10_000;
pub const REFRESH_TIMEOUT_MS: u64 = 10_000;
pub const MAX_REFRESH_FAILURES: u32 = 3;
pub const REFRESH_LEAD_TIME_SECS: u64 = 5 * 60;
pub const MIN_PROACTIVE_DELAY_SECS: u64 = 30;
pub const MAX_PROACTIVE_DELAY_SECS: u64 = 24 * 60 * 60;
pub const SESSION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

// Retry queue
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

// Deduplication
pub const DEFAULT_DEDUP_TTL_MS: u64 = 5_000;

// HTTP
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("ledgerlens/", env!("CARGO_PKG_VERSION"));

// Uploads
pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_UPLOAD_MIME_TYPES: &[&str] =
    &["application/pdf", "image/png", "image/jpeg", "text/csv"];

// Connection sync polling
pub const SYNC_POLL_INTERVAL_MS: u64 = 3_000;
pub const SYNC_POLL_MAX_ATTEMPTS: u32 = 40;
