//! Token and refresh-response types

use std::fmt;

use serde::{Deserialize, Serialize};

use super::jwt::get_token_expiry;

/// Access/refresh token pair
///
/// `refresh` is absent in cookie mode, where the refresh token lives in an
/// HTTP-only cookie the client never sees.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    /// Access token expiry in seconds since the epoch, read from its `exp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl TokenPair {
    /// Build a pair, deriving `expires_at` from the access token payload
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        let access = access.into();
        let expires_at = get_token_expiry(&access);
        Self { access, refresh, expires_at }
    }

    /// Seconds until the access token expires, relative to `now_secs`
    pub fn expires_in(&self, now_secs: i64) -> Option<i64> {
        self.expires_at.map(|exp| exp - now_secs)
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of one successful call to the refresh endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshOutcome {
    /// New tokens; `None` when the server only rotated cookies
    pub tokens: Option<TokenPair>,
    /// Server-declared access token lifetime in seconds
    pub access_token_lifetime: Option<i64>,
}

impl RefreshOutcome {
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access.as_str())
    }

    /// Parse a refresh response body
    ///
    /// Accepts `{access, refresh}` and `{tokens: {access, refresh}}`, both
    /// with an optional `access_token_lifetime`. An empty body is a
    /// cookie-only rotation.
    ///
    /// # Errors
    ///
    /// Returns the JSON error message when the body is not a JSON object of
    /// the expected shape.
    pub fn from_json(body: &[u8]) -> Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let raw: RawRefreshResponse = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        let (access, refresh) = match raw.tokens {
            Some(nested) => (nested.access, nested.refresh),
            None => (raw.access, raw.refresh),
        };

        Ok(Self {
            tokens: access.map(|access| TokenPair::new(access, refresh)),
            access_token_lifetime: raw.access_token_lifetime,
        })
    }
}

#[derive(Deserialize)]
struct RawTokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct RawRefreshResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
    #[serde(default)]
    tokens: Option<RawTokens>,
    #[serde(default)]
    access_token_lifetime: Option<i64>,
}
