//! # LedgerLens Infrastructure
//!
//! I/O side of the LedgerLens client core.
//!
//! This crate contains:
//! - The `reqwest` transport behind the [`http::Transport`] seam
//! - The HTTP refresh client and the [`api::ApiClient`] facade
//! - Configuration loading from the environment or JSON/TOML files
//! - Tracing initialisation and request metrics
//!
//! ## Architecture
//! - Token lifecycle, retry queue and deduplication live in `ledgerlens-common`
//! - Configuration types and constants live in `ledgerlens-domain`

pub mod api;
pub mod config;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use api::{ApiClient, ApiClientBuilder, ApiClientConfig, ApiError, ApiRequest};
pub use http::{ReqwestTransport, Transport};
pub use observability::init_tracing;
