//! Bank connection flow
//!
//! The Connect widget is an external collaborator behind [`ConnectWidget`].
//! Once it yields a connection id, [`ConnectionSyncPoller`] polls the status
//! endpoint until the sync reaches a terminal state or the attempt budget
//! runs out. Polling is the only sync path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledgerlens_common::cache::DedupOptions;
use ledgerlens_common::error::ErrorClassification;
use ledgerlens_common::time::{Scheduler, TokioScheduler};
use ledgerlens_domain::constants::{
    CONNECTION_STATUS_PATH, CONNECT_TOKEN_PATH, SYNC_POLL_INTERVAL_MS, SYNC_POLL_MAX_ATTEMPTS,
};
use ledgerlens_domain::ConnectionStatus;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::client::{ApiClient, ApiRequest};
use super::errors::ApiError;

/// What the Connect widget reported when it closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { connection_id: String },
    Cancelled,
}

/// Capability interface over the third-party Connect SDK
#[async_trait]
pub trait ConnectWidget: Send + Sync {
    /// Open the widget with a connect token and wait for it to close
    async fn open(&self, connect_token: &str) -> Result<ConnectOutcome, ApiError>;
}

/// Result of waiting for a connection to sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The connection reached a terminal status
    Completed(ConnectionStatus),
    /// The attempt budget ran out; `last` is the last status seen, if any
    TimedOut { last: Option<ConnectionStatus> },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(status) if status.is_success())
    }
}

#[derive(Debug, Deserialize)]
struct ConnectTokenBody {
    #[serde(alias = "accessToken", alias = "token")]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionStatusBody {
    status: ConnectionStatus,
}

/// Polls `GET /api/connections/{id}/` until the sync settles
#[derive(Clone)]
pub struct ConnectionSyncPoller {
    client: ApiClient,
    interval: Duration,
    max_attempts: u32,
    scheduler: Arc<dyn Scheduler>,
}

impl std::fmt::Debug for ConnectionSyncPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSyncPoller")
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ConnectionSyncPoller {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            interval: Duration::from_millis(SYNC_POLL_INTERVAL_MS),
            max_attempts: SYNC_POLL_MAX_ATTEMPTS,
            scheduler: Arc::new(TokioScheduler),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Fetch a short-lived token for the Connect widget
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn connect_token(&self) -> Result<String, ApiError> {
        let body: ConnectTokenBody = self.client.post_json(CONNECT_TOKEN_PATH, &serde_json::json!({})).await?;
        Ok(body.access_token)
    }

    /// Fetch the current status of one connection, bypassing the read cache
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`]; [`ApiError::Decode`] for an unexpected body.
    pub async fn status(&self, connection_id: &str) -> Result<ConnectionStatus, ApiError> {
        let path = format!("{CONNECTION_STATUS_PATH}/{connection_id}/");
        let request = ApiRequest::get(path).dedup(DedupOptions::default().skip_cache());
        let response = self.client.request(request).await?;
        let body: ConnectionStatusBody =
            response.json().map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(body.status)
    }

    /// Poll until the connection reaches a terminal status
    ///
    /// Retryable failures (network, 5xx, rate limits) use up an attempt and
    /// polling continues; anything else ends the wait.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable [`ApiError`].
    #[instrument(skip(self))]
    pub async fn wait_for_sync(&self, connection_id: &str) -> Result<SyncOutcome, ApiError> {
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            match self.status(connection_id).await {
                Ok(status) if status.is_terminal() => {
                    info!(attempt, ?status, "connection sync finished");
                    return Ok(SyncOutcome::Completed(status));
                }
                Ok(status) => {
                    debug!(attempt, ?status, "connection still syncing");
                    last = Some(status);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "status poll failed, will poll again");
                }
                Err(e) => return Err(e),
            }

            if attempt < self.max_attempts {
                self.scheduler.sleep(self.interval).await;
            }
        }

        warn!(attempts = self.max_attempts, ?last, "connection sync did not settle");
        Ok(SyncOutcome::TimedOut { last })
    }

    /// Full flow: connect token, widget, then status polling
    ///
    /// Returns `None` if the user closed the widget without connecting.
    ///
    /// # Errors
    ///
    /// Propagates token, widget and polling failures.
    pub async fn connect_and_sync(
        &self,
        widget: &dyn ConnectWidget,
    ) -> Result<Option<SyncOutcome>, ApiError> {
        let token = self.connect_token().await?;
        match widget.open(&token).await? {
            ConnectOutcome::Connected { connection_id } => {
                info!(%connection_id, "connection created, waiting for sync");
                self.wait_for_sync(&connection_id).await.map(Some)
            }
            ConnectOutcome::Cancelled => {
                debug!("connect widget closed without a connection");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ledgerlens_common::auth::{MemoryTokenStorage, TokenPair};
    use parking_lot::Mutex;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::client::ApiClientConfig;

    struct FakeWidget {
        outcome: ConnectOutcome,
        seen_token: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ConnectWidget for FakeWidget {
        async fn open(&self, connect_token: &str) -> Result<ConnectOutcome, ApiError> {
            *self.seen_token.lock() = Some(connect_token.to_string());
            Ok(self.outcome.clone())
        }
    }

    fn poller(server: &MockServer) -> ConnectionSyncPoller {
        let config = ApiClientConfig::new(Url::parse(&server.uri()).unwrap());
        let storage = MemoryTokenStorage::with_tokens(TokenPair::new("token", Some("refresh".into())));
        let client = ApiClient::builder(config).storage(Arc::new(storage)).build().unwrap();
        ConnectionSyncPoller::new(client).with_interval(Duration::from_millis(5))
    }

    fn status(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "c-1", "status": value }))
    }

    #[tokio::test]
    async fn test_polls_until_terminal_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-1/"))
            .respond_with(status("UPDATING"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-1/"))
            .respond_with(status("UPDATED"))
            .mount(&server)
            .await;

        let outcome = poller(&server).wait_for_sync("c-1").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed(ConnectionStatus::Updated));
        assert!(outcome.is_success());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-1/"))
            .respond_with(status("WAITING_USER_INPUT"))
            .expect(4)
            .mount(&server)
            .await;

        let outcome = poller(&server).with_max_attempts(4).wait_for_sync("c-1").await.unwrap();
        assert_eq!(outcome, SyncOutcome::TimedOut { last: Some(ConnectionStatus::WaitingUserInput) });
    }

    #[tokio::test]
    async fn test_transient_errors_keep_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-1/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-1/"))
            .respond_with(status("LOGIN_ERROR"))
            .mount(&server)
            .await;

        let outcome = poller(&server).wait_for_sync("c-1").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed(ConnectionStatus::LoginError));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_not_found_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/connections/gone/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({ "detail": "Not found." })))
            .expect(1)
            .mount(&server)
            .await;

        let err = poller(&server).wait_for_sync("gone").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_connect_and_sync_passes_token_to_widget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/connections/token/"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "connect-123" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/connections/c-9/"))
            .respond_with(status("UPDATED"))
            .mount(&server)
            .await;

        let widget = FakeWidget {
            outcome: ConnectOutcome::Connected { connection_id: "c-9".into() },
            seen_token: Mutex::new(None),
        };
        let outcome = poller(&server).connect_and_sync(&widget).await.unwrap();

        assert_eq!(outcome, Some(SyncOutcome::Completed(ConnectionStatus::Updated)));
        assert_eq!(widget.seen_token.lock().as_deref(), Some("connect-123"));
    }

    #[tokio::test]
    async fn test_cancelled_widget_skips_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/connections/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "t" })))
            .mount(&server)
            .await;

        let widget = FakeWidget { outcome: ConnectOutcome::Cancelled, seen_token: Mutex::new(None) };
        let outcome = poller(&server).connect_and_sync(&widget).await.unwrap();

        assert_eq!(outcome, None);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
