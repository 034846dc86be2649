//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If `LEDGERLENS_API_BASE_URL` is set, build the config from the
//!    environment (every other variable is an optional override)
//! 2. Otherwise probe the standard locations for a config file
//! 3. JSON and TOML are both accepted; missing sections keep their defaults
//!
//! ## Environment Variables
//! - `LEDGERLENS_API_BASE_URL`: API base URL (required for env loading)
//! - `LEDGERLENS_API_TIMEOUT`: Request timeout in seconds
//! - `LEDGERLENS_AUTH_TRANSPORT`: `header` or `cookie`
//! - `LEDGERLENS_TOKEN_FILE`: Persist tokens to this file
//! - `LEDGERLENS_MAX_RETRIES`: Retry budget for critical endpoints
//! - `LEDGERLENS_DEDUP_ENABLED`: Whether GETs are deduplicated (true/false)
//! - `LEDGERLENS_DEDUP_TTL_MS`: Read cache TTL in milliseconds
//! - `LEDGERLENS_ALLOWED_ORIGINS`: Comma-separated extra origins
//! - `LEDGERLENS_LOG_LEVEL`: Default log filter
//! - `LEDGERLENS_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.{json,toml}` then `./ledgerlens.{json,toml}`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names relative to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ledgerlens_domain::{AuthTransport, Config, LedgerLensError, Result};

const BASE_URL_VAR: &str = "LEDGERLENS_API_BASE_URL";

const CONFIG_FILE_NAMES: &[&str] = &["config.json", "config.toml", "ledgerlens.json", "ledgerlens.toml"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `LedgerLensError::Config` if:
/// - An environment variable has an invalid value
/// - No config file is found and the environment is not set up
/// - The file format is invalid
pub fn load() -> Result<Config> {
    if std::env::var_os(BASE_URL_VAR).is_some() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        return Ok(config);
    }

    tracing::debug!("{BASE_URL_VAR} not set, trying config files");
    load_from_file(None)
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `LedgerLensError::Config` if `LEDGERLENS_API_BASE_URL` is missing
/// or any variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.api.base_url = env_var(BASE_URL_VAR)?;

    if let Some(timeout) = env_parse::<u64>("LEDGERLENS_API_TIMEOUT")? {
        config.api.timeout_seconds = timeout;
    }
    if let Some(transport) = env_opt("LEDGERLENS_AUTH_TRANSPORT") {
        config.auth.transport = parse_transport(&transport)?;
    }
    if let Some(path) = env_opt("LEDGERLENS_TOKEN_FILE") {
        config.auth.token_file = Some(PathBuf::from(path));
    }
    if let Some(retries) = env_parse::<u32>("LEDGERLENS_MAX_RETRIES")? {
        config.retry.max_retries = retries;
    }
    config.dedup.enabled = env_bool("LEDGERLENS_DEDUP_ENABLED", config.dedup.enabled);
    if let Some(ttl) = env_parse::<u64>("LEDGERLENS_DEDUP_TTL_MS")? {
        config.dedup.cache_ttl_ms = ttl;
    }
    if let Some(origins) = env_opt("LEDGERLENS_ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(level) = env_opt("LEDGERLENS_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("LEDGERLENS_LOG_JSON", config.logging.json);

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations via
/// [`probe_config_paths`]. Format is detected by extension.
///
/// # Errors
/// Returns `LedgerLensError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LedgerLensError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            LedgerLensError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| LedgerLensError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `LedgerLensError::Config` if format is invalid or parsing fails.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| LedgerLensError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| LedgerLensError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(LedgerLensError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        roots.extend([exe_dir.clone(), exe_dir.join(".."), exe_dir.join("../..")]);
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn parse_transport(value: &str) -> Result<AuthTransport> {
    match value.trim().to_ascii_lowercase().as_str() {
        "header" | "bearer" => Ok(AuthTransport::Header),
        "cookie" | "cookies" => Ok(AuthTransport::Cookie),
        other => Err(LedgerLensError::Config(format!("Invalid auth transport: {other}"))),
    }
}

/// Get required environment variable
///
/// # Errors
/// Returns `LedgerLensError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        LedgerLensError::Config(format!("Missing required environment variable: {key}"))
    })
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional numeric environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| LedgerLensError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
