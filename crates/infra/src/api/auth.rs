//! HTTP client for the token refresh endpoint
//!
//! Implements [`RefreshClient`] over a [`Transport`]. In header mode the
//! refresh token goes in the JSON body; in cookie mode the body is empty and
//! the transport's cookie store carries the credential.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use ledgerlens_common::auth::{RefreshClient, RefreshFailure, RefreshOutcome};
use ledgerlens_common::resilience::{RetryOptions, RetryQueue, RetryQueueError};
use ledgerlens_domain::AuthTransport;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::errors::parse_retry_after;
use crate::http::{HttpRequest, HttpResponse, Transport};

/// Refresh endpoint client
pub struct HttpRefreshClient {
    transport: Arc<dyn Transport>,
    url: Url,
    mode: AuthTransport,
    /// Dedicated queue, never the one API requests wait in
    queue: Option<(RetryQueue, RetryOptions<RefreshFailure>)>,
}

impl HttpRefreshClient {
    pub fn new(transport: Arc<dyn Transport>, url: Url, mode: AuthTransport) -> Self {
        Self { transport, url, mode, queue: None }
    }

    /// Retry transient refresh failures through `queue`
    #[must_use]
    pub fn with_retry_queue(mut self, queue: RetryQueue, options: RetryOptions<RefreshFailure>) -> Self {
        self.queue = Some((queue, options));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_request(&self, refresh_token: Option<&str>) -> HttpRequest {
        let mut request = HttpRequest::new(Method::POST, self.url.clone())
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));

        if self.mode.uses_header() {
            let body = serde_json::json!({ "refresh": refresh_token });
            request = request
                .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .with_body(Bytes::from(body.to_string()));
        }
        request
    }

    async fn attempt(
        transport: Arc<dyn Transport>,
        request: HttpRequest,
    ) -> Result<RefreshOutcome, RefreshFailure> {
        let response = transport
            .send(request)
            .await
            .map_err(|err| RefreshFailure::Network(err.to_string()))?;

        if response.is_success() {
            return RefreshOutcome::from_json(&response.body).map_err(RefreshFailure::InvalidResponse);
        }
        Err(status_failure(&response))
    }
}

#[derive(Deserialize)]
struct RefreshErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

fn status_failure(response: &HttpResponse) -> RefreshFailure {
    let message = serde_json::from_slice::<RefreshErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.detail);
    let retry_after = response
        .header(RETRY_AFTER.as_str())
        .and_then(|value| parse_retry_after(value, Utc::now()));

    RefreshFailure::Status { status: response.status, message, retry_after }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshOutcome, RefreshFailure> {
        let request = self.build_request(refresh_token);
        debug!(mode = %self.mode, "calling refresh endpoint");

        let Some((queue, options)) = &self.queue else {
            return Self::attempt(Arc::clone(&self.transport), request).await;
        };

        let transport = Arc::clone(&self.transport);
        let result = queue
            .execute_with_retry(
                move || Self::attempt(Arc::clone(&transport), request.clone()),
                options.clone(),
            )
            .await;

        result.map_err(|err| match err {
            RetryQueueError::Exhausted { retries, last_error } => {
                warn!(retries, error = %last_error, "refresh retries exhausted");
                last_error
            }
            RetryQueueError::NonRetryable(err) => err,
            RetryQueueError::Closed => RefreshFailure::Network("refresh queue closed".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ledgerlens_common::resilience::BackoffPolicy;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::ReqwestTransport;

    async fn client(server: &MockServer, mode: AuthTransport) -> HttpRefreshClient {
        let transport = Arc::new(ReqwestTransport::new().expect("transport"));
        let url = Url::parse(&format!("{}/api/auth/refresh/", server.uri())).expect("url");
        HttpRefreshClient::new(transport, url, mode)
    }

    #[tokio::test]
    async fn header_mode_posts_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh/"))
            .and(body_json(serde_json::json!({ "refresh": "r-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": "a-2",
                "refresh": "r-2",
                "access_token_lifetime": 900
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server, AuthTransport::Header).await.refresh(Some("r-1")).await.unwrap();
        assert_eq!(outcome.access_token(), Some("a-2"));
        assert_eq!(outcome.tokens.unwrap().refresh.as_deref(), Some("r-2"));
        assert_eq!(outcome.access_token_lifetime, Some(900));
    }

    #[tokio::test]
    async fn cookie_mode_sends_no_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server, AuthTransport::Cookie).await.refresh(None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::default());

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn error_status_carries_detail_and_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(serde_json::json!({ "detail": "slow down" })),
            )
            .mount(&server)
            .await;

        let failure = client(&server, AuthTransport::Header).await.refresh(Some("r")).await;
        assert_eq!(
            failure,
            Err(RefreshFailure::Status {
                status: 429,
                message: Some("slow down".to_string()),
                retry_after: Some(Duration::from_secs(7)),
            })
        );
    }

    #[tokio::test]
    async fn malformed_success_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1, 2"))
            .mount(&server)
            .await;

        let failure = client(&server, AuthTransport::Header).await.refresh(Some("r")).await;
        assert!(matches!(failure, Err(RefreshFailure::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn dedicated_queue_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tokens": { "access": "a", "refresh": "r" }
            })))
            .mount(&server)
            .await;

        let backoff = BackoffPolicy {
            initial_delay: Duration::from_millis(10),
            ..BackoffPolicy::default().without_jitter()
        };
        let client = client(&server, AuthTransport::Header)
            .await
            .with_retry_queue(RetryQueue::new("auth-refresh"), RetryOptions::new(1, backoff));

        let outcome = client.refresh(Some("r")).await.unwrap();
        assert_eq!(outcome.access_token(), Some("a"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
