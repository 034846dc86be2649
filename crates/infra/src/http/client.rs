use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Failure to obtain any response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    Build(String),
}

/// Outbound request as seen by a [`Transport`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the transport's default timeout
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: None, timeout: None }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fully buffered response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// JSON body with a matching content type
    #[must_use]
    pub fn with_json(mut self, value: &serde_json::Value) -> Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value as text; `None` if absent or not visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Deserialize the body
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request and buffers the response
///
/// Implementations never retry; retrying is the retry queue's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the TLS backend fails to
    /// initialise.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest { method, url, headers, body, timeout } = request;
        let timeout = timeout.unwrap_or(self.timeout);

        let mut builder = self.client.request(method.clone(), url.clone()).headers(headers);
        builder = builder.timeout(timeout);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!(%method, path = url.path(), "sending HTTP request");
        let response = builder.send().await.map_err(|err| map_reqwest_error(&err, timeout))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|err| map_reqwest_error(&err, timeout))?;
        debug!(%method, path = url.path(), status, bytes = body.len(), "received HTTP response");

        Ok(HttpResponse { status, headers, body })
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
    cookie_store: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            default_headers: None,
            cookie_store: false,
        }
    }
}

impl ReqwestTransportBuilder {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// Keep cookies between requests (cookie auth transport)
    #[must_use]
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the `reqwest` client cannot be
    /// created.
    pub fn build(self) -> Result<ReqwestTransport, TransportError> {
        let mut builder = ReqwestClient::builder().no_proxy().cookie_store(self.cookie_store);

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| TransportError::Build(err.to_string()))?;

        Ok(ReqwestTransport { client, timeout: self.timeout })
    }
}

fn map_reqwest_error(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    if err.is_builder() {
        return TransportError::Build(err.to_string());
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        if err.is_connect() {
            return TransportError::Connect(err.to_string());
        }
    }
    TransportError::Request(err.to_string())
}
