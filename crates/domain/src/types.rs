//! Common value types shared across the client layers

use std::fmt;

use serde::{Deserialize, Serialize};

/// How credentials travel with outbound requests
///
/// The choice is made by the embedding application (browser capability
/// check, desktop shell, ...); the client core only honours it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTransport {
    /// `Authorization: Bearer <access>` header, refresh token sent in the body
    #[default]
    Header,
    /// HTTP-only cookies managed by the transport's cookie store
    Cookie,
}

impl AuthTransport {
    /// Whether the access token must be attached as a header
    #[must_use]
    pub fn uses_header(self) -> bool {
        matches!(self, Self::Header)
    }
}

impl fmt::Display for AuthTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Cookie => write!(f, "cookie"),
        }
    }
}

/// Status of a bank connection synchronisation as reported by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Updating,
    Updated,
    WaitingUserInput,
    LoginError,
    Outdated,
    Error,
    #[serde(other)]
    Unknown,
}

impl ConnectionStatus {
    /// Whether polling can stop on this status
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Updated | Self::LoginError | Self::Outdated | Self::Error)
    }

    /// Whether the terminal status represents a successful sync
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_transport_round_trips_as_snake_case() {
        let json = serde_json::to_string(&AuthTransport::Cookie).unwrap();
        assert_eq!(json, "\"cookie\"");
        assert_eq!(AuthTransport::default(), AuthTransport::Header);
        assert!(AuthTransport::Header.uses_header());
        assert!(!AuthTransport::Cookie.uses_header());
    }

    #[test]
    fn unknown_connection_status_is_not_terminal() {
        let status: ConnectionStatus = serde_json::from_str("\"PARTIAL_SUCCESS\"").unwrap();
        assert_eq!(status, ConnectionStatus::Unknown);
        assert!(!status.is_terminal());

        let status: ConnectionStatus = serde_json::from_str("\"LOGIN_ERROR\"").unwrap();
        assert!(status.is_terminal());
        assert!(!status.is_success());
    }
}
