//! # LedgerLens Domain
//!
//! Domain types shared by the LedgerLens API client crates.
//!
//! This crate contains:
//! - Configuration structures for the client core
//! - Domain error types and Result definitions
//! - Domain constants (endpoint paths, timing defaults)
//! - Small value types shared across layers (`AuthTransport`)
//!
//! ## Architecture
//! - No dependencies on other LedgerLens crates
//! - Only external dependencies allowed
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
