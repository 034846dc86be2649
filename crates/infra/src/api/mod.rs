//! LedgerLens API client
//!
//! [`ApiClient`] is the single entry point for calls to the LedgerLens API.
//! Every request goes through the same pipeline:
//!
//! - outbound URL check against the origin allow-list
//! - GET coalescing and short-lived read cache
//! - access token attachment and one refresh-and-retry on 401
//! - retry queue with backoff for critical endpoints
//! - response inspection, error mapping and metrics
//!
//! Session events (expired session, required upgrade) are delivered through
//! the shared [`EventNotifier`](ledgerlens_common::events::EventNotifier).

pub mod auth;
pub mod client;
pub mod connections;
pub mod errors;
pub mod security;

pub use auth::HttpRefreshClient;
pub use client::{ApiClient, ApiClientBuilder, ApiClientConfig, ApiRequest, ApiResponse};
pub use connections::{ConnectOutcome, ConnectWidget, ConnectionSyncPoller, SyncOutcome};
pub use errors::{parse_retry_after, ApiError, ApiErrorCategory};
pub use ledgerlens_common::events::LoginRedirect;
pub use security::{FileUpload, ResponseAnomaly, SecurityPolicy, SecurityViolation};
