//! Logging and metrics
//!
//! - [`init_tracing`] installs the global `tracing` subscriber
//! - [`metrics`] holds the atomic counters the API client feeds

pub mod metrics;

use anyhow::Result;
use ledgerlens_domain::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

pub use metrics::{ApiMetrics, ApiMetricsSnapshot};

/// Install the global subscriber
///
/// `RUST_LOG` wins over `config.level`; an unparsable level falls back to
/// `info`. JSON output when `config.json` is set, compact text otherwise.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        fmt().with_env_filter(filter).json().with_target(false).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).compact().try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
