//! Outbound and inbound request validation
//!
//! The policy is immutable after construction. Outbound checks are fatal
//! (the request never leaves); inbound checks only log.

use std::collections::HashSet;

use ledgerlens_domain::SecurityConfig;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::errors::ApiError;
use crate::http::HttpResponse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    #[error("origin {0} is not allowed")]
    OriginNotAllowed(String),

    #[error("scheme {0} is not allowed")]
    SchemeNotAllowed(String),

    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    UploadTooLarge { size: u64, max: u64 },

    #[error("upload type {0} is not allowed")]
    UploadTypeNotAllowed(String),

    #[error("upload name {0:?} is not allowed")]
    UploadNameRejected(String),
}

impl From<SecurityViolation> for ApiError {
    fn from(violation: SecurityViolation) -> Self {
        Self::Blocked(violation.to_string())
    }
}

/// Something odd about a response that is worth a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAnomaly {
    MissingContentType,
    UnexpectedContentType(String),
    MissingNosniff,
}

/// File handed to [`ApiClient::upload`](super::client::ApiClient::upload)
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: bytes::Bytes,
}

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    allowed_origins: HashSet<String>,
    upload_max_bytes: u64,
    upload_mime_types: HashSet<String>,
    upload_name_pattern: Regex,
}

impl SecurityPolicy {
    /// Policy allowing `base_url`'s origin plus the configured extras
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if an extra origin is not a URL or the
    /// upload name pattern is not a valid regex.
    pub fn new(config: &SecurityConfig, base_url: &Url) -> Result<Self, ApiError> {
        let mut allowed_origins = HashSet::new();
        allowed_origins.insert(base_url.origin().ascii_serialization());
        for origin in &config.allowed_origins {
            let url = Url::parse(origin)
                .map_err(|e| ApiError::Config(format!("invalid allowed origin {origin}: {e}")))?;
            allowed_origins.insert(url.origin().ascii_serialization());
        }

        let upload_name_pattern = Regex::new(&config.upload_name_pattern)
            .map_err(|e| ApiError::Config(format!("invalid upload name pattern: {e}")))?;

        Ok(Self {
            allowed_origins,
            upload_max_bytes: config.upload_max_bytes,
            upload_mime_types: config
                .upload_mime_types
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            upload_name_pattern,
        })
    }

    /// # Errors
    ///
    /// Returns the violation when `url` may not be contacted.
    pub fn validate_outbound(&self, url: &Url) -> Result<(), SecurityViolation> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SecurityViolation::SchemeNotAllowed(url.scheme().to_string()));
        }

        let origin = url.origin().ascii_serialization();
        if !self.allowed_origins.contains(&origin) {
            warn!(%origin, "blocked request to origin outside the allow-list");
            return Err(SecurityViolation::OriginNotAllowed(origin));
        }
        Ok(())
    }

    /// Log anomalies in a response; never fails the request
    pub fn inspect_response(&self, response: &HttpResponse) -> Vec<ResponseAnomaly> {
        let mut anomalies = Vec::new();

        if !response.body.is_empty() {
            match response.content_type() {
                None => anomalies.push(ResponseAnomaly::MissingContentType),
                Some(ct) if !is_expected_content_type(ct) => {
                    anomalies.push(ResponseAnomaly::UnexpectedContentType(ct.to_string()));
                }
                Some(_) => {}
            }
        }
        if response.header("x-content-type-options").map(str::to_ascii_lowercase).as_deref()
            != Some("nosniff")
        {
            anomalies.push(ResponseAnomaly::MissingNosniff);
        }

        for anomaly in &anomalies {
            match anomaly {
                ResponseAnomaly::MissingNosniff => {
                    debug!(status = response.status, "response without nosniff header");
                }
                other => warn!(status = response.status, anomaly = ?other, "unexpected response"),
            }
        }
        anomalies
    }

    /// # Errors
    ///
    /// Returns the first rule the file breaks.
    pub fn validate_upload(&self, file: &FileUpload) -> Result<(), SecurityViolation> {
        let size = file.data.len() as u64;
        if size > self.upload_max_bytes {
            return Err(SecurityViolation::UploadTooLarge { size, max: self.upload_max_bytes });
        }

        let mime = file.content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if !self.upload_mime_types.contains(&mime) {
            return Err(SecurityViolation::UploadTypeNotAllowed(mime));
        }

        if file.file_name.contains("..") || !self.upload_name_pattern.is_match(&file.file_name) {
            return Err(SecurityViolation::UploadNameRejected(file.file_name.clone()));
        }
        Ok(())
    }
}

fn is_expected_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json") || essence.starts_with("text/")
}
