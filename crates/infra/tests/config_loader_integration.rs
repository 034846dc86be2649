//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! turning it into an API client configuration.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use ledgerlens_domain::AuthTransport;
use ledgerlens_infra::api::ApiClientConfig;
use ledgerlens_infra::config;
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> (NamedTempFile, PathBuf) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    (temp_file, path)
}

/// Validates a JSON file flows through to the API client configuration.
///
/// # Test Steps
/// 1. Write a JSON config with api, retry and dedup sections
/// 2. Load it with `load_from_file`
/// 3. Build an `ApiClientConfig` and check the derived values
#[test]
fn test_load_config_from_json_file() {
    let json_content = r#"{
        "api": {
            "base_url": "https://api.ledgerlens.test",
            "timeout_seconds": 15
        },
        "retry": {
            "max_retries": 4,
            "initial_delay_ms": 250,
            "critical_endpoints": ["/api/dashboard", "/api/reports"]
        },
        "dedup": {
            "enabled": true,
            "cache_ttl_ms": 2000
        }
    }"#;
    let (_temp, path) = write_config(json_content, "json");

    let config = config::load_from_file(Some(path.clone())).expect("Failed to load config from JSON file");
    let client_config = ApiClientConfig::from_config(&config).expect("valid base URL");

    assert_eq!(client_config.base_url.as_str(), "https://api.ledgerlens.test/");
    assert_eq!(client_config.timeout, Duration::from_secs(15));
    assert_eq!(client_config.max_retries, 4);
    assert_eq!(client_config.backoff.initial_delay, Duration::from_millis(250));
    assert_eq!(client_config.dedup_ttl, Duration::from_secs(2));
    assert!(client_config.is_critical("/api/reports/monthly"));
    assert!(!client_config.is_critical("/api/profile"));

    std::fs::remove_file(path).ok();
}

/// Validates cookie transport from TOML disables the refresh-token requirement.
///
/// # Test Steps
/// 1. Write a TOML config selecting cookie transport and a token file
/// 2. Load it and build an `ApiClientConfig`
/// 3. Check the token manager no longer requires a stored refresh token
#[test]
fn test_load_config_from_toml_file() {
    let toml_content = r#"
[api]
base_url = "https://api.ledgerlens.test/"

[auth]
transport = "cookie"
max_refresh_failures = 5
token_file = "/tmp/ledgerlens-integration-tokens.json"

[security]
allowed_origins = ["https://files.ledgerlens.test"]
"#;
    let (_temp, path) = write_config(toml_content, "toml");

    let config = config::load_from_file(Some(path.clone())).expect("Failed to load config from TOML file");
    assert_eq!(config.auth.transport, AuthTransport::Cookie);

    let client_config = ApiClientConfig::from_config(&config).expect("valid base URL");
    assert_eq!(client_config.auth_transport, AuthTransport::Cookie);
    assert!(!client_config.token.refresh_token_required);
    assert_eq!(client_config.token.max_failures, 5);
    assert_eq!(
        client_config.token_file,
        Some(PathBuf::from("/tmp/ledgerlens-integration-tokens.json"))
    );
    assert_eq!(client_config.security.allowed_origins, vec!["https://files.ledgerlens.test"]);

    std::fs::remove_file(path).ok();
}

/// Validates a relative base URL is rejected when building the client config.
///
/// # Test Steps
/// 1. Load a config whose base URL has no scheme
/// 2. Expect `from_config` to fail with a config error
#[test]
fn test_relative_base_url_is_rejected() {
    let (_temp, path) = write_config(r#"{ "api": { "base_url": "/api" } }"#, "json");

    let config = config::load_from_file(Some(path.clone())).expect("file parses");
    let err = ApiClientConfig::from_config(&config).unwrap_err();
    assert!(err.to_string().contains("invalid base URL"), "unexpected error: {err}");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let result = config::load_from_file(Some(PathBuf::from("/nonexistent/ledgerlens.toml")));
    assert!(result.is_err());
}

#[test]
fn test_malformed_toml_is_an_error() {
    let (_temp, path) = write_config("[api\nbase_url = ", "toml");

    let result = config::load_from_file(Some(path.clone()));
    assert!(result.is_err(), "Should fail with invalid TOML");

    std::fs::remove_file(path).ok();
}
