//! Access/refresh token lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   TokenManager   │  single-flight refresh, proactive timer, watchdog
//! └────────┬─────────┘
//!          │
//!          ├──► RefreshClient   (POST /api/auth/refresh/, injected)
//!          ├──► TokenStorage    (MemoryTokenStorage, FileTokenStorage)
//!          ├──► Scheduler       (timers + sleeps, paused in tests)
//!          └──► EventNotifier   (SessionExpired, SessionTimeout, ...)
//! ```
//!
//! JWT payloads are decoded only through [`jwt::decode_jwt_payload`], and only
//! to schedule refreshes. The server stays the authority on validity.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use ledgerlens_common::auth::{
//!     MemoryTokenStorage, RefreshClient, RefreshFailure, RefreshOutcome, TokenManager, TokenPair,
//! };
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl RefreshClient for Backend {
//!     async fn refresh(&self, _token: Option<&str>) -> Result<RefreshOutcome, RefreshFailure> {
//!         Err(RefreshFailure::Network("offline".into()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TokenManager::new(Arc::new(Backend), Arc::new(MemoryTokenStorage::new()));
//!     manager.set_session(TokenPair::new("header.payload.sig", Some("refresh".into()))).await?;
//!
//!     // Any number of concurrent callers share one refresh
//!     let _ = manager.refresh().await;
//!     Ok(())
//! }
//! ```

pub mod jwt;
pub mod storage;
pub mod token_manager;
pub mod traits;
pub mod types;

pub use jwt::{decode_jwt_payload, get_token_expiry, is_token_expired, JwtClaims, JwtDecodeError};
pub use storage::{FileTokenStorage, MemoryTokenStorage, StorageError};
pub use token_manager::{
    proactive_refresh_delay, TokenManager, TokenManagerBuilder, TokenManagerConfig,
    TokenManagerError,
};
pub use traits::{RefreshClient, RefreshFailure, TokenStorage};
pub use types::{RefreshOutcome, TokenPair};
