//! Testing utilities and helpers
//!
//! - **[`fixtures`]**: unsigned JWTs and refresh outcomes
//! - **[`mocks`]**: scripted [`RefreshClient`](crate::auth::RefreshClient),
//!   recording event listener, counting login redirect
//!
//! ## Usage
//!
//! ```rust
//! use ledgerlens_common::testing::{jwt_expiring_at, ScriptedRefreshClient};
//!
//! let client = ScriptedRefreshClient::new();
//! client.push_status(500);
//! let token = jwt_expiring_at(1_700_000_600);
//! assert_eq!(token.split('.').count(), 3);
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::{jwt_expiring_at, jwt_with_claims, random_string, refreshed_tokens};
pub use mocks::{CountingRedirect, RecordingListener, ScriptedRefreshClient};
