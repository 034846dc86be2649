//! Client-side JWT payload decoding
//!
//! Decoding here is purely structural: the payload is read to schedule
//! refreshes, never to decide whether a token is authentic. Signature
//! verification stays with the server.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// base64url, accepting both padded and unpadded segments
const JWT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims read from a JWT payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Expiry, seconds since the UNIX epoch
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued-at, seconds since the UNIX epoch
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    /// Every other claim, untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtDecodeError {
    #[error("token must have 3 dot-separated segments, found {0}")]
    Structure(usize),

    #[error("payload is not valid base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON claims object: {0}")]
    Json(String),
}

/// Decode the payload segment of `token`
///
/// # Errors
///
/// Returns [`JwtDecodeError`] when the token does not have exactly three
/// non-empty segments or the payload is not base64url-encoded JSON.
pub fn decode_jwt_payload(token: &str) -> Result<JwtClaims, JwtDecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(JwtDecodeError::Structure(segments.len()));
    }

    let bytes =
        JWT_ENGINE.decode(segments[1]).map_err(|e| JwtDecodeError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| JwtDecodeError::Json(e.to_string()))
}

/// Expiry of `token` in seconds since the epoch, if it can be read
pub fn get_token_expiry(token: &str) -> Option<i64> {
    decode_jwt_payload(token).ok().and_then(|claims| claims.exp)
}

/// Whether `token` is expired at `now_secs`
///
/// Tokens that cannot be decoded or carry no `exp` count as expired.
pub fn is_token_expired_at(token: &str, now_secs: i64) -> bool {
    get_token_expiry(token).map_or(true, |exp| exp <= now_secs)
}

/// Whether `token` is expired according to the system clock
pub fn is_token_expired(token: &str) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    is_token_expired_at(token, now)
}
