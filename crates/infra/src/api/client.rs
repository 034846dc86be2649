//! Authenticated API client
//!
//! Every request takes the same path:
//!
//! 1. resolve the URL and check it against the origin allow-list
//! 2. GETs go through the request deduplicator
//! 3. critical endpoints run the next step inside the retry queue
//! 4. send with the current credential; a 401 on a non-auth endpoint renews
//!    the token through the token manager and retries once
//! 5. inspect the response, map non-2xx statuses onto [`ApiError`]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use ledgerlens_common::auth::{
    FileTokenStorage, MemoryTokenStorage, RefreshClient, RefreshFailure, TokenManager,
    TokenManagerConfig, TokenManagerError, TokenStorage,
};
use ledgerlens_common::cache::{DedupKey, DedupOptions, DedupStats, RequestDeduplicator};
use ledgerlens_common::error::{ErrorClassification, ErrorSeverity};
use ledgerlens_common::events::{ClientEvent, EventNotifier, LoginRedirect};
use ledgerlens_common::resilience::{BackoffPolicy, RetryOptions, RetryQueue};
use ledgerlens_common::time::{Clock, Scheduler, TokioScheduler};
use ledgerlens_domain::constants::AUTH_PATH_PREFIX;
use ledgerlens_domain::{AuthTransport, Config, SecurityConfig};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::auth::HttpRefreshClient;
use super::errors::ApiError;
use super::security::{FileUpload, SecurityPolicy, SecurityViolation};
use crate::http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::observability::ApiMetrics;

/// Responses are fully buffered and cheap to clone (shared by coalesced GETs)
pub type ApiResponse = HttpResponse;

/// Configuration for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub user_agent: String,
    pub auth_transport: AuthTransport,
    pub refresh_path: String,
    /// 401s under this prefix are returned as-is, never refreshed
    pub auth_path_prefix: String,
    /// Path prefixes routed through the retry queue
    pub critical_endpoints: Vec<String>,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub dedup_enabled: bool,
    pub dedup_ttl: Duration,
    pub security: SecurityConfig,
    pub token: TokenManagerConfig,
    /// Persist tokens here instead of in memory
    pub token_file: Option<PathBuf>,
}

impl ApiClientConfig {
    /// Defaults for every setting except the base URL
    pub fn new(base_url: Url) -> Self {
        Self::from_parts(base_url, &Config::default())
    }

    /// Client configuration from the application config
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if `api.base_url` is not an absolute URL.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.api.base_url)
            .map_err(|e| ApiError::Config(format!("invalid base URL {}: {e}", config.api.base_url)))?;
        Ok(Self::from_parts(base_url, config))
    }

    fn from_parts(base_url: Url, config: &Config) -> Self {
        let auth = &config.auth;
        let token = TokenManagerConfig {
            min_refresh_interval: auth.min_refresh_interval(),
            refresh_timeout: auth.refresh_timeout(),
            max_failures: auth.max_refresh_failures,
            session_timeout: auth.session_timeout(),
            refresh_token_required: auth.transport.uses_header(),
            ..TokenManagerConfig::default()
        };

        Self {
            base_url,
            timeout: config.api.timeout(),
            user_agent: config.api.user_agent.clone(),
            auth_transport: auth.transport,
            refresh_path: auth.refresh_path.clone(),
            auth_path_prefix: AUTH_PATH_PREFIX.to_string(),
            critical_endpoints: config.retry.critical_endpoints.clone(),
            max_retries: config.retry.max_retries,
            backoff: BackoffPolicy {
                initial_delay: config.retry.initial_delay(),
                max_delay: config.retry.max_delay(),
                multiplier: config.retry.backoff_multiplier,
                jitter_ratio: config.retry.jitter_ratio,
            },
            dedup_enabled: config.dedup.enabled,
            dedup_ttl: config.dedup.cache_ttl(),
            security: config.security.clone(),
            token,
            token_file: auth.token_file.clone(),
        }
    }

    /// Whether `path` is a critical endpoint or lies below one
    ///
    /// Matching stops at segment boundaries: `/api/accounts` covers
    /// `/api/accounts/12/` but not `/api/accountsettings`.
    pub fn is_critical(&self, path: &str) -> bool {
        self.critical_endpoints.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
            })
        })
    }

    pub fn is_auth_path(&self, path: &str) -> bool {
        path.starts_with(&self.auth_path_prefix) || path == self.refresh_path
    }
}

/// One logical API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    dedup: DedupOptions,
    skip_auth: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            dedup: DedupOptions::default(),
            skip_auth: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON payload
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Internal`] if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::Internal(format!("failed to serialize request body: {e}")))?;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    #[must_use]
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deduplication options; only GETs are deduplicated
    #[must_use]
    pub fn dedup(mut self, options: DedupOptions) -> Self {
        self.dedup = options;
        self
    }

    /// Send without credentials and return 401s as-is
    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Request with its URL resolved and checked
#[derive(Debug)]
struct Prepared {
    request: ApiRequest,
    url: Url,
}

struct Inner {
    config: ApiClientConfig,
    transport: Arc<dyn Transport>,
    tokens: TokenManager,
    queue: RetryQueue,
    dedup: RequestDeduplicator<ApiResponse, ApiError>,
    security: SecurityPolicy,
    metrics: Arc<ApiMetrics>,
}

/// Authenticated, retrying, deduplicating API client
///
/// Cheap to clone; clones share the token manager, the retry queue and the
/// read cache.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("auth_transport", &self.inner.config.auth_transport)
            .field("queue", &self.inner.queue)
            .field("dedup", &self.inner.dedup)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(config: ApiClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.inner.config
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.inner.tokens
    }

    pub fn events(&self) -> &EventNotifier {
        self.inner.tokens.events()
    }

    pub fn metrics(&self) -> &ApiMetrics {
        &self.inner.metrics
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.dedup.stats()
    }

    /// Drop every cached read
    pub fn clear_cache(&self) {
        self.inner.dedup.clear();
    }

    /// Run one request through the full pipeline
    ///
    /// # Errors
    ///
    /// - [`ApiError::Blocked`] if the URL is outside the allow-list
    /// - [`ApiError::SessionExpired`] / [`ApiError::RefreshRevoked`] if a
    ///   401 ended the session
    /// - [`ApiError::AuthExpired`] if a 401 could not be recovered because
    ///   the refresh failed transiently
    /// - the mapped status or transport error otherwise
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.resolve(&request)?;
        if let Err(violation) = self.inner.security.validate_outbound(&url) {
            self.inner.metrics.record_blocked();
            return Err(violation.into());
        }

        let prepared = Prepared { request, url };
        if prepared.request.method == Method::GET && self.inner.config.dedup_enabled {
            let key = DedupKey::from_request(Method::GET.as_str(), prepared.url.as_str());
            let options = prepared.request.dedup;
            let client = self.clone();
            return self
                .inner
                .dedup
                .execute_request(key, move || async move { client.dispatch(prepared).await }, options)
                .await;
        }

        self.dispatch(prepared).await
    }

    /// GET `path` and decode the JSON body
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`]; [`ApiError::Decode`] for a body that does
    /// not match `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(ApiRequest::get(path)).await?;
        decode(&response)
    }

    /// # Errors
    ///
    /// See [`ApiClient::get_json`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(ApiRequest::post(path).json(body)?).await?;
        decode(&response)
    }

    /// # Errors
    ///
    /// See [`ApiClient::get_json`].
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(ApiRequest::put(path).json(body)?).await?;
        decode(&response)
    }

    /// # Errors
    ///
    /// See [`ApiClient::get_json`].
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(ApiRequest::patch(path).json(body)?).await?;
        decode(&response)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(ApiRequest::delete(path)).await.map(|_| ())
    }

    /// POST a file after checking it against the upload rules
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Blocked`] without sending anything if the file
    /// breaks a rule; otherwise see [`ApiClient::get_json`].
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file: FileUpload,
    ) -> Result<T, ApiError> {
        if let Err(violation) = self.inner.security.validate_upload(&file) {
            self.inner.metrics.record_blocked();
            warn!(file_name = %file.file_name, %violation, "upload rejected");
            return Err(violation.into());
        }

        let disposition =
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name))
                .map_err(|_| SecurityViolation::UploadNameRejected(file.file_name.clone()))?;
        let content_type = HeaderValue::from_str(&file.content_type)
            .map_err(|_| SecurityViolation::UploadTypeNotAllowed(file.content_type.clone()))?;

        let request = ApiRequest::post(path)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_DISPOSITION, disposition)
            .body(file.data);
        let response = self.request(request).await?;
        decode(&response)
    }

    fn resolve(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = match Url::parse(&request.path) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .inner
                .config
                .base_url
                .join(&request.path)
                .map_err(|e| ApiError::Config(format!("invalid path {}: {e}", request.path)))?,
            Err(e) => return Err(ApiError::Config(format!("invalid URL {}: {e}", request.path))),
        };

        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn dispatch(&self, prepared: Prepared) -> Result<ApiResponse, ApiError> {
        let result = if self.inner.config.is_critical(prepared.url.path()) {
            self.send_with_retry(prepared).await
        } else {
            self.send_with_auth(&prepared).await
        };

        if let Err(err) = &result {
            self.report_failure(err);
        }
        result
    }

    async fn send_with_retry(&self, prepared: Prepared) -> Result<ApiResponse, ApiError> {
        let path = prepared.url.path().to_string();
        let metrics = Arc::clone(&self.inner.metrics);
        let options = RetryOptions::<ApiError>::new(self.inner.config.max_retries, self.inner.config.backoff)
            .on_retry(move |attempt, delay, err| {
                metrics.record_retry();
                warn!(
                    path = %path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying critical request"
                );
            });

        let client = self.clone();
        let prepared = Arc::new(prepared);
        self.inner
            .queue
            .execute_with_retry(
                move || {
                    let client = client.clone();
                    let prepared = Arc::clone(&prepared);
                    async move { client.send_with_auth(&prepared).await }
                },
                options,
            )
            .await
            .map_err(ApiError::from)
    }

    async fn send_with_auth(&self, prepared: &Prepared) -> Result<ApiResponse, ApiError> {
        let use_header = self.inner.config.auth_transport.uses_header() && !prepared.request.skip_auth;
        let token = if use_header { self.inner.tokens.access_token().await? } else { None };
        let generation = self.inner.tokens.credential_generation();

        let response = self.send_once(prepared, token.as_deref()).await?;
        if response.status != 401
            || prepared.request.skip_auth
            || self.inner.config.is_auth_path(prepared.url.path())
        {
            return self.finish(response);
        }

        debug!(path = prepared.url.path(), "access token rejected");
        let renewed = self.renew_after_unauthorized(token.as_deref(), generation).await?;
        let retry_token = if use_header { renewed } else { None };

        let response = self.send_once(prepared, retry_token.as_deref()).await?;
        self.finish(response)
    }

    /// Token to retry a 401 with
    ///
    /// Reuses credentials another request already obtained after `generation`
    /// was read; otherwise joins or starts the single-flight refresh. Only a
    /// terminal refresh failure ends the session; anything else surfaces as
    /// [`ApiError::AuthExpired`] for this request.
    async fn renew_after_unauthorized(
        &self,
        sent: Option<&str>,
        generation: u64,
    ) -> Result<Option<String>, ApiError> {
        let tokens = &self.inner.tokens;
        let uses_header = self.inner.config.auth_transport.uses_header();
        if tokens.credential_generation() != generation {
            debug!("credentials renewed while the request was in flight");
            return if uses_header { Ok(tokens.access_token().await?) } else { Ok(None) };
        }
        if uses_header {
            let current = tokens.access_token().await?;
            if current.is_some() && current.as_deref() != sent {
                debug!("token changed while the request was in flight");
                return Ok(current);
            }
        }

        self.inner.metrics.record_refresh();
        match tokens.refresh().await {
            Ok(outcome) => match outcome.tokens {
                Some(pair) => Ok(Some(pair.access)),
                None => Ok(tokens.access_token().await?),
            },
            Err(TokenManagerError::Superseded) => Ok(tokens.access_token().await?),
            Err(
                err @ (TokenManagerError::SessionExpired
                | TokenManagerError::RefreshRevoked
                | TokenManagerError::Storage(_)
                | TokenManagerError::Internal(_)),
            ) => {
                warn!(error = %err, "token refresh failed");
                Err(err.into())
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, request stays unauthorized");
                Err(ApiError::AuthExpired)
            }
        }
    }

    async fn send_once(&self, prepared: &Prepared, token: Option<&str>) -> Result<HttpResponse, ApiError> {
        let request = &prepared.request;
        let mut http = HttpRequest::new(request.method.clone(), prepared.url.clone());
        http.headers = request.headers.clone();
        http.headers.entry(ACCEPT).or_insert(HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Internal("access token is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            http.headers.insert(AUTHORIZATION, value);
        }
        http.body = request.body.clone();
        http.timeout = request.timeout.or(Some(self.inner.config.timeout));

        let started = Instant::now();
        let result = self.inner.transport.send(http).await;
        self.inner.metrics.record_request(started.elapsed());

        result.map_err(|err| {
            let err = ApiError::from(err);
            if matches!(err, ApiError::Timeout(_)) {
                self.inner.metrics.record_timeout();
            }
            err
        })
    }

    fn finish(&self, response: HttpResponse) -> Result<ApiResponse, ApiError> {
        self.inner.security.inspect_response(&response);
        if response.is_success() {
            return Ok(response);
        }
        Err(ApiError::from_response(response.status, &response.headers, &response.body, Utc::now()))
    }

    /// Metrics, logs and the one user-facing event of a terminal failure
    fn report_failure(&self, err: &ApiError) {
        self.inner.metrics.record_failure(err.category());

        match err.severity() {
            ErrorSeverity::Critical => error!(error = %err, "request failed"),
            ErrorSeverity::Error | ErrorSeverity::Warning => warn!(error = %err, "request failed"),
            _ => debug!(error = %err, "request failed"),
        }

        if err.upgrade_required() {
            self.inner.metrics.record_upgrade_required();
            info!(status = ?err.status(), "plan limit reached");
            self.events().emit(ClientEvent::UpgradeRequired {
                status: err.status().unwrap_or(429),
                message: err.message().map(str::to_string),
            });
        }
    }
}

/// Decode a JSON body; 204/205 and empty bodies decode from `null`
fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
    if matches!(response.status, 204 | 205) || response.body.is_empty() {
        return serde_json::from_value(serde_json::Value::Null).map_err(|_| {
            ApiError::Decode(format!("status {} carried no body", response.status))
        });
    }
    response.json().map_err(|e| ApiError::Decode(e.to_string()))
}

/// Builder for [`ApiClient`]
///
/// Everything not set explicitly is built from the configuration: a
/// `reqwest` transport (with a cookie store in cookie mode), in-memory or
/// file token storage, and an HTTP refresh client with its own retry queue
/// when the refresh endpoint is critical.
pub struct ApiClientBuilder {
    config: ApiClientConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn TokenStorage>>,
    refresh_client: Option<Arc<dyn RefreshClient>>,
    token_manager: Option<TokenManager>,
    events: Option<EventNotifier>,
    login_redirect: Option<Arc<dyn LoginRedirect>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ApiClientBuilder {
    pub fn new(config: ApiClientConfig) -> Self {
        Self {
            config,
            transport: None,
            storage: None,
            refresh_client: None,
            token_manager: None,
            events: None,
            login_redirect: None,
            scheduler: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn refresh_client(mut self, client: Arc<dyn RefreshClient>) -> Self {
        self.refresh_client = Some(client);
        self
    }

    /// Use an existing token manager; storage, refresh client, events and
    /// token config settings are then ignored
    #[must_use]
    pub fn token_manager(mut self, manager: TokenManager) -> Self {
        self.token_manager = Some(manager);
        self
    }

    #[must_use]
    pub fn events(mut self, events: EventNotifier) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.login_redirect = Some(redirect);
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn token_config(mut self, token: TokenManagerConfig) -> Self {
        self.config.token = token;
        self
    }

    /// # Errors
    ///
    /// Returns [`ApiError::Config`] for an invalid security policy, refresh
    /// path or HTTP client setup.
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let config = self.config;
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler));
        let security = SecurityPolicy::new(&config.security, &config.base_url)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::builder()
                    .timeout(config.timeout)
                    .user_agent(config.user_agent.clone())
                    .cookie_store(!config.auth_transport.uses_header())
                    .build()?,
            ),
        };

        let tokens = match self.token_manager {
            Some(manager) => manager,
            None => {
                let refresh_client = match self.refresh_client {
                    Some(client) => client,
                    None => default_refresh_client(&config, &transport, &scheduler)?,
                };
                let storage: Arc<dyn TokenStorage> = match (self.storage, &config.token_file) {
                    (Some(storage), _) => storage,
                    (None, Some(path)) => Arc::new(FileTokenStorage::new(path.clone())),
                    (None, None) => Arc::new(MemoryTokenStorage::new()),
                };

                let mut events = self.events.unwrap_or_default();
                if let Some(redirect) = self.login_redirect {
                    events = events.with_login_redirect(redirect);
                }

                let mut builder = TokenManager::builder(refresh_client, storage)
                    .config(config.token.clone())
                    .scheduler(Arc::clone(&scheduler))
                    .events(events);
                if let Some(clock) = self.clock {
                    builder = builder.clock(clock);
                }
                builder.build()
            }
        };

        info!(
            base_url = %config.base_url,
            auth_transport = %config.auth_transport,
            critical_endpoints = config.critical_endpoints.len(),
            "API client ready"
        );

        Ok(ApiClient {
            inner: Arc::new(Inner {
                queue: RetryQueue::with_scheduler("api", Arc::clone(&scheduler)),
                dedup: RequestDeduplicator::with_scheduler(config.dedup_ttl, scheduler),
                config,
                transport,
                tokens,
                security,
                metrics: Arc::new(ApiMetrics::new()),
            }),
        })
    }
}

fn default_refresh_client(
    config: &ApiClientConfig,
    transport: &Arc<dyn Transport>,
    scheduler: &Arc<dyn Scheduler>,
) -> Result<Arc<dyn RefreshClient>, ApiError> {
    let url = config
        .base_url
        .join(&config.refresh_path)
        .map_err(|e| ApiError::Config(format!("invalid refresh path {}: {e}", config.refresh_path)))?;
    let mut client = HttpRefreshClient::new(Arc::clone(transport), url, config.auth_transport);

    if config.is_critical(config.refresh_path.trim_end_matches('/')) {
        // Own queue: an API job waiting on this refresh must not block it
        let options = RetryOptions::<RefreshFailure>::new(1, config.backoff)
            .retry_if(|failure| failure.is_retryable() && !failure.is_rate_limited());
        client = client.with_retry_queue(
            RetryQueue::with_scheduler("auth-refresh", Arc::clone(scheduler)),
            options,
        );
    }
    Ok(Arc::new(client))
}
