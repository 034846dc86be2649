//! Test fixture generators
//!
//! Unsigned JWTs and refresh outcomes for token lifecycle tests. The
//! signature segment is a fixed placeholder; nothing in the client core
//! verifies it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::auth::{RefreshOutcome, TokenPair};

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Build an unsigned JWT with the given payload
///
/// # Examples
///
/// ```
/// use ledgerlens_common::auth::jwt::get_token_expiry;
/// use ledgerlens_common::testing::fixtures::jwt_with_claims;
///
/// let token = jwt_with_claims(&serde_json::json!({ "exp": 42 }));
/// assert_eq!(get_token_expiry(&token), Some(42));
/// ```
pub fn jwt_with_claims(claims: &serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(HEADER),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Build an unsigned JWT expiring at `exp` (seconds since the epoch)
///
/// A random `jti` keeps consecutive tokens distinct.
pub fn jwt_expiring_at(exp: i64) -> String {
    jwt_with_claims(&serde_json::json!({
        "exp": exp,
        "sub": "user-1",
        "jti": random_string(12),
    }))
}

/// Successful refresh outcome carrying a fresh pair that expires at `exp`
pub fn refreshed_tokens(exp: i64, refresh: &str) -> RefreshOutcome {
    RefreshOutcome {
        tokens: Some(TokenPair::new(jwt_expiring_at(exp), Some(refresh.to_string()))),
        access_token_lifetime: None,
    }
}

/// Generate a random alphanumeric string
pub fn random_string(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}
