//! Token manager with single-flight refresh
//!
//! Manages the access/refresh token lifecycle:
//! - Single-flight refresh: every caller that arrives while a refresh is
//!   outstanding awaits the same shared future
//! - Proactive refresh before expiry (5 min lead time, 30 s floor, 24 h cap)
//! - Minimum interval between refresh attempts and a hard per-call timeout
//! - Sticky "session expired" state after a rejected refresh or too many
//!   consecutive failures, reset only by [`TokenManager::set_session`]
//! - Absolute session watchdog

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::storage::StorageError;
use super::traits::{RefreshClient, RefreshFailure, TokenStorage};
use super::types::{RefreshOutcome, TokenPair};
use crate::error::{ErrorClassification, ErrorSeverity};
use crate::events::{ClientEvent, EventNotifier, SessionExpiryReason};
use crate::time::{Clock, Scheduler, SystemClock, TimerHandle, TokioScheduler};

/// Error type for token manager operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenManagerError {
    /// Terminal: a new login is required
    #[error("session expired, please log in again")]
    SessionExpired,

    /// The refresh token was revoked (403)
    #[error("refresh token revoked")]
    RefreshRevoked,

    /// The refresh endpoint rate-limited us (429)
    #[error("token refresh attempted too frequently")]
    TooFrequent { retry_after: Option<Duration> },

    /// The refresh endpoint failed with a 5xx
    #[error("refresh endpoint server error ({status})")]
    Server { status: u16 },

    /// The refresh endpoint rejected the request with another 4xx
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16, message: Option<String> },

    /// No response from the refresh endpoint
    #[error("refresh network error: {0}")]
    Network(String),

    /// The refresh call exceeded its timeout
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    /// 2xx response that did not carry usable tokens
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// Reading or persisting tokens failed
    #[error("token storage failed: {0}")]
    Storage(String),

    /// The session was replaced or cleared while the refresh was running
    #[error("session changed during refresh")]
    Superseded,

    #[error("refresh task failed: {0}")]
    Internal(String),
}

impl From<StorageError> for TokenManagerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl ErrorClassification for TokenManagerError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::TooFrequent { .. }
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SessionExpired | Self::RefreshRevoked => ErrorSeverity::Critical,
            Self::Storage(_) | Self::Internal(_) => ErrorSeverity::Error,
            Self::Superseded => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::RefreshRevoked)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooFrequent { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooFrequent { .. })
    }
}

/// Token manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenManagerConfig {
    /// Minimum time between the starts of two refresh attempts
    pub min_refresh_interval: Duration,
    /// Hard timeout for one refresh call
    pub refresh_timeout: Duration,
    /// Consecutive counted failures before the session expires
    pub max_failures: u32,
    /// How long before expiry the proactive refresh fires
    pub refresh_lead_time: Duration,
    pub min_proactive_delay: Duration,
    pub max_proactive_delay: Duration,
    /// Absolute session lifetime enforced by the watchdog
    pub session_timeout: Duration,
    /// Header mode needs a readable refresh token; cookie mode does not
    pub refresh_token_required: bool,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(10),
            max_failures: 3,
            refresh_lead_time: Duration::from_secs(5 * 60),
            min_proactive_delay: Duration::from_secs(30),
            max_proactive_delay: Duration::from_secs(24 * 60 * 60),
            session_timeout: Duration::from_secs(24 * 60 * 60),
            refresh_token_required: true,
        }
    }
}

/// Delay before the proactive refresh for a token expiring in `expires_in`
///
/// `max(min_delay, expires_in - lead_time)`, capped at `max_delay`.
/// Returns `None` when `expires_in_secs` is not positive.
pub fn proactive_refresh_delay(
    expires_in_secs: i64,
    config: &TokenManagerConfig,
) -> Option<Duration> {
    if expires_in_secs <= 0 {
        return None;
    }

    let lead_ms = i64::try_from(config.refresh_lead_time.as_millis()).unwrap_or(i64::MAX);
    let fire_in_ms = expires_in_secs.saturating_mul(1000).saturating_sub(lead_ms);
    let fire_in = Duration::from_millis(u64::try_from(fire_in_ms).unwrap_or(0));

    Some(fire_in.max(config.min_proactive_delay).min(config.max_proactive_delay))
}

type RefreshResult = Result<RefreshOutcome, TokenManagerError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<SharedRefresh>,
    last_attempt_at: Option<Instant>,
    failure_count: u32,
    session_expired: bool,
    /// Bumped by `set_session`, `clear_session` and expiry so a stale
    /// refresh cannot overwrite a newer or ended session
    epoch: u64,
    /// Bumped whenever new credentials are installed
    generation: u64,
    proactive_timer: Option<TimerHandle>,
    watchdog: Option<TimerHandle>,
}

impl RefreshState {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.proactive_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.watchdog.take() {
            timer.cancel();
        }
    }
}

struct Inner {
    config: TokenManagerConfig,
    client: Arc<dyn RefreshClient>,
    storage: Arc<dyn TokenStorage>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    events: EventNotifier,
    state: Mutex<RefreshState>,
    /// Serializes every storage write with the epoch check guarding it
    write_gate: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().cancel_timers();
    }
}

/// Builder for [`TokenManager`]
pub struct TokenManagerBuilder {
    config: TokenManagerConfig,
    client: Arc<dyn RefreshClient>,
    storage: Arc<dyn TokenStorage>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    events: EventNotifier,
}

impl TokenManagerBuilder {
    #[must_use]
    pub fn config(mut self, config: TokenManagerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an event notifier with the rest of the client
    #[must_use]
    pub fn events(mut self, events: EventNotifier) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> TokenManager {
        TokenManager {
            inner: Arc::new(Inner {
                config: self.config,
                client: self.client,
                storage: self.storage,
                scheduler: self.scheduler,
                clock: self.clock,
                events: self.events,
                state: Mutex::new(RefreshState::default()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Token manager with single-flight refresh
///
/// Cheap to clone; clones share state. Timers hold only a weak reference,
/// so dropping the last clone stops all background work.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TokenManager")
            .field("config", &self.inner.config)
            .field("refresh_in_flight", &state.in_flight.is_some())
            .field("failure_count", &state.failure_count)
            .field("session_expired", &state.session_expired)
            .finish_non_exhaustive()
    }
}

enum FailureKind {
    /// Ends the session immediately
    Terminal(TokenManagerError, SessionExpiryReason),
    /// Counts toward `max_failures`
    Counted(TokenManagerError),
    /// The session ended while the refresh was running
    Expired,
}

fn classify(failure: RefreshFailure) -> FailureKind {
    match failure {
        RefreshFailure::Status { status: 401, .. } => {
            FailureKind::Terminal(TokenManagerError::SessionExpired, SessionExpiryReason::RefreshRejected)
        }
        RefreshFailure::Status { status: 403, .. } => {
            FailureKind::Terminal(TokenManagerError::RefreshRevoked, SessionExpiryReason::RefreshRevoked)
        }
        RefreshFailure::Status { status: 429, retry_after, .. } => {
            FailureKind::Counted(TokenManagerError::TooFrequent { retry_after })
        }
        RefreshFailure::Status { status, .. } if status >= 500 => {
            FailureKind::Counted(TokenManagerError::Server { status })
        }
        RefreshFailure::Status { status, message, .. } => {
            FailureKind::Counted(TokenManagerError::Rejected { status, message })
        }
        RefreshFailure::Network(msg) => FailureKind::Counted(TokenManagerError::Network(msg)),
        RefreshFailure::InvalidResponse(msg) => {
            FailureKind::Counted(TokenManagerError::InvalidResponse(msg))
        }
    }
}

impl TokenManager {
    /// Manager with default config, the Tokio scheduler and the system clock
    pub fn new(client: Arc<dyn RefreshClient>, storage: Arc<dyn TokenStorage>) -> Self {
        Self::builder(client, storage).build()
    }

    pub fn builder(
        client: Arc<dyn RefreshClient>,
        storage: Arc<dyn TokenStorage>,
    ) -> TokenManagerBuilder {
        TokenManagerBuilder {
            config: TokenManagerConfig::default(),
            client,
            storage,
            scheduler: Arc::new(TokioScheduler),
            clock: Arc::new(SystemClock),
            events: EventNotifier::new(),
        }
    }

    pub fn config(&self) -> &TokenManagerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventNotifier {
        &self.inner.events
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_session_expired(&self) -> bool {
        self.inner.state.lock().session_expired
    }

    /// Consecutive counted refresh failures since the last success
    pub fn failure_count(&self) -> u32 {
        self.inner.state.lock().failure_count
    }

    pub fn is_refresh_in_flight(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Counter bumped each time new credentials are installed
    ///
    /// Read it before sending a request; if it has moved by the time the
    /// request comes back 401, the credentials were renewed in between and
    /// the request can simply be retried.
    pub fn credential_generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Current access token from storage
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Storage`] if storage cannot be read.
    pub async fn access_token(&self) -> Result<Option<String>, TokenManagerError> {
        Ok(self.inner.storage.access_token().await?)
    }

    /// Install the tokens of a fresh login
    ///
    /// Persists the pair, clears the sticky expired flag and the failure
    /// counter, schedules the proactive refresh and restarts the watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Storage`] if the pair cannot be persisted.
    pub async fn set_session(&self, pair: TokenPair) -> Result<(), TokenManagerError> {
        {
            let _gate = self.inner.write_gate.lock().await;
            self.inner.storage.set_tokens(&pair).await?;

            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.generation += 1;
            state.session_expired = false;
            state.failure_count = 0;
            state.last_attempt_at = None;
            state.cancel_timers();
        }

        let expires_in = pair.expires_in(self.inner.clock.unix_timestamp());
        info!(expires_in = ?expires_in, "session established");
        self.schedule_proactive_refresh(expires_in);
        self.start_session_watchdog();
        Ok(())
    }

    /// Resume a session persisted by a previous run
    ///
    /// Returns `false` when storage holds no access token. An access token
    /// that is already expired schedules an immediate (floor-delayed)
    /// refresh.
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Storage`] if storage cannot be read.
    pub async fn restore_session(&self) -> Result<bool, TokenManagerError> {
        let Some(access) = self.inner.storage.access_token().await? else {
            return Ok(false);
        };

        let now = self.inner.clock.unix_timestamp();
        let expires_in = super::jwt::get_token_expiry(&access).map(|exp| (exp - now).max(1));
        debug!(expires_in = ?expires_in, "restoring persisted session");

        self.schedule_proactive_refresh(expires_in);
        self.start_session_watchdog();
        Ok(true)
    }

    /// Log out locally: cancel timers and forget the tokens
    ///
    /// The session counts as expired afterwards, without emitting an event.
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Storage`] if storage cannot be cleared.
    pub async fn clear_session(&self) -> Result<(), TokenManagerError> {
        let _gate = self.inner.write_gate.lock().await;
        {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.session_expired = true;
            state.failure_count = 0;
            state.cancel_timers();
        }
        info!("session cleared");
        Ok(self.inner.storage.clear_tokens().await?)
    }

    /// Schedule a refresh ahead of expiry
    ///
    /// Replaces any previously scheduled proactive refresh. Returns the delay
    /// used, or `None` when nothing was scheduled (missing or non-positive
    /// expiry, or an expired session).
    pub fn schedule_proactive_refresh(&self, expires_in_secs: Option<i64>) -> Option<Duration> {
        Self::schedule_proactive(&self.inner, expires_in_secs)
    }

    fn schedule_proactive(inner: &Arc<Inner>, expires_in_secs: Option<i64>) -> Option<Duration> {
        let Some(delay) =
            expires_in_secs.and_then(|secs| proactive_refresh_delay(secs, &inner.config))
        else {
            warn!(expires_in = ?expires_in_secs, "not scheduling proactive refresh: invalid expiry");
            return None;
        };

        let mut state = inner.state.lock();
        if state.session_expired {
            debug!("session expired, proactive refresh not scheduled");
            return None;
        }
        if let Some(previous) = state.proactive_timer.take() {
            previous.cancel();
        }

        let weak = Arc::downgrade(inner);
        let task = async move {
            let Some(inner) = weak.upgrade() else { return };
            debug!("proactive refresh timer fired");
            if let Err(e) = (TokenManager { inner }).refresh().await {
                warn!(error = %e, "proactive refresh failed");
            }
        };
        state.proactive_timer = Some(inner.scheduler.schedule(delay, task.boxed()));

        debug!(delay_ms = delay.as_millis() as u64, "proactive refresh scheduled");
        Some(delay)
    }

    /// Start (or restart) the absolute session timer
    pub fn start_session_watchdog(&self) {
        let inner = &self.inner;
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let task = async move {
            let Some(inner) = weak.upgrade() else { return };
            warn!("session lifetime exceeded");
            Self::expire(&inner, ClientEvent::SessionTimeout).await;
        };

        let mut state = inner.state.lock();
        if let Some(previous) = state.watchdog.take() {
            previous.cancel();
        }
        state.watchdog = Some(inner.scheduler.schedule(inner.config.session_timeout, task.boxed()));
    }

    /// Refresh the tokens, joining the in-flight refresh if there is one
    ///
    /// # Errors
    ///
    /// - [`TokenManagerError::SessionExpired`] without any I/O once the
    ///   session is expired, and from the call that expires it
    /// - [`TokenManagerError::RefreshRevoked`] on a 403
    /// - a retryable error for transient failures below the threshold
    pub async fn refresh(&self) -> RefreshResult {
        let shared = {
            let mut state = self.inner.state.lock();
            if let Some(in_flight) = &state.in_flight {
                debug!("joining in-flight refresh");
                in_flight.clone()
            } else {
                if state.session_expired {
                    return Err(TokenManagerError::SessionExpired);
                }

                // Spawned so the refresh completes even if every caller
                // stops waiting; its own completion clears `in_flight`.
                let task = tokio::spawn(Self::run_refresh(Arc::clone(&self.inner), state.epoch));
                let inner = Arc::clone(&self.inner);
                let shared = async move {
                    task.await.unwrap_or_else(|e| {
                        inner.state.lock().in_flight = None;
                        Err(TokenManagerError::Internal(e.to_string()))
                    })
                }
                .boxed()
                .shared();
                state.in_flight = Some(shared.clone());
                shared
            }
        };

        shared.await
    }

    async fn run_refresh(inner: Arc<Inner>, epoch: u64) -> RefreshResult {
        let wait = {
            let state = inner.state.lock();
            state
                .last_attempt_at
                .map(|last| {
                    (last + inner.config.min_refresh_interval)
                        .saturating_duration_since(inner.scheduler.now())
                })
                .unwrap_or_default()
        };
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "delaying refresh to respect minimum interval");
            inner.scheduler.sleep(wait).await;
        }
        inner.state.lock().last_attempt_at = Some(inner.scheduler.now());

        let result = Self::attempt(&inner, epoch).await;
        Self::settle(&inner, epoch, result).await
    }

    async fn attempt(inner: &Arc<Inner>, epoch: u64) -> Result<RefreshOutcome, FailureKind> {
        let refresh_token = inner
            .storage
            .refresh_token()
            .await
            .map_err(|e| FailureKind::Counted(e.into()))?;

        if refresh_token.is_none() && inner.config.refresh_token_required {
            warn!("no refresh token available");
            return Err(FailureKind::Terminal(
                TokenManagerError::SessionExpired,
                SessionExpiryReason::MissingRefreshToken,
            ));
        }

        let timeout = inner.config.refresh_timeout;
        let mut outcome =
            match tokio::time::timeout(timeout, inner.client.refresh(refresh_token.as_deref()))
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(failure)) => return Err(classify(failure)),
                Err(_) => return Err(FailureKind::Counted(TokenManagerError::Timeout(timeout))),
            };

        match outcome.tokens.as_mut() {
            Some(pair) => {
                // Servers that do not rotate refresh tokens omit them
                if pair.refresh.is_none() {
                    pair.refresh = refresh_token;
                }
            }
            None if inner.config.refresh_token_required => {
                return Err(FailureKind::Counted(TokenManagerError::InvalidResponse(
                    "response carried no access token".to_string(),
                )));
            }
            None => {}
        }

        let _gate = inner.write_gate.lock().await;
        {
            let mut state = inner.state.lock();
            if state.session_expired {
                return Err(FailureKind::Expired);
            }
            if state.epoch != epoch {
                return Err(FailureKind::Counted(TokenManagerError::Superseded));
            }
        }
        if let Some(pair) = &outcome.tokens {
            inner.storage.set_tokens(pair).await.map_err(|e| FailureKind::Counted(e.into()))?;
        }
        inner.state.lock().generation += 1;

        Ok(outcome)
    }

    async fn settle(
        inner: &Arc<Inner>,
        epoch: u64,
        result: Result<RefreshOutcome, FailureKind>,
    ) -> RefreshResult {
        match result {
            Ok(outcome) => {
                inner.state.lock().failure_count = 0;

                let now = inner.clock.unix_timestamp();
                let expires_in = outcome.access_token_lifetime.or_else(|| {
                    outcome.tokens.as_ref().and_then(|pair| pair.expires_in(now))
                });
                Self::schedule_proactive(inner, expires_in);

                inner.state.lock().in_flight = None;
                info!(expires_in = ?expires_in, "token refresh succeeded");
                inner.events.emit(ClientEvent::TokensRefreshed);
                Ok(outcome)
            }
            Err(FailureKind::Expired) => {
                inner.state.lock().in_flight = None;
                warn!(epoch, "session ended during refresh, new tokens discarded");
                Err(TokenManagerError::SessionExpired)
            }
            Err(FailureKind::Counted(TokenManagerError::Superseded)) => {
                inner.state.lock().in_flight = None;
                debug!(epoch, "discarding refresh result for a replaced session");
                Err(TokenManagerError::Superseded)
            }
            Err(FailureKind::Terminal(err, reason)) => {
                error!(error = %err, %reason, "refresh rejected, session expired");
                Self::expire(inner, ClientEvent::SessionExpired { reason }).await;
                inner.state.lock().in_flight = None;
                Err(err)
            }
            Err(FailureKind::Counted(err)) => {
                let tripped = {
                    let mut state = inner.state.lock();
                    state.failure_count += 1;
                    let tripped = state.failure_count >= inner.config.max_failures;
                    if !tripped {
                        state.in_flight = None;
                    }
                    warn!(
                        error = %err,
                        failures = state.failure_count,
                        max = inner.config.max_failures,
                        "token refresh failed"
                    );
                    tripped
                };

                if !tripped {
                    return Err(err);
                }

                error!(failures = inner.config.max_failures, "refresh failure limit reached");
                Self::expire(
                    inner,
                    ClientEvent::SessionExpired { reason: SessionExpiryReason::TooManyFailures },
                )
                .await;
                inner.state.lock().in_flight = None;
                Err(TokenManagerError::SessionExpired)
            }
        }
    }

    /// Enter the terminal state and publish `event` once
    async fn expire(inner: &Arc<Inner>, event: ClientEvent) {
        let _gate = inner.write_gate.lock().await;
        let newly_expired = {
            let mut state = inner.state.lock();
            let newly = !state.session_expired;
            state.epoch += 1;
            state.session_expired = true;
            state.cancel_timers();
            newly
        };
        if !newly_expired {
            return;
        }

        if let Err(e) = inner.storage.clear_tokens().await {
            warn!(error = %e, "failed to clear tokens after session expiry");
        }
        inner.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryTokenStorage;
    use crate::testing::fixtures::{jwt_expiring_at, refreshed_tokens};
    use crate::testing::mocks::{RecordingListener, ScriptedRefreshClient};
    use crate::time::MockClock;

    const NOW: u64 = 1_700_000_000;

    fn setup(
        config: TokenManagerConfig,
    ) -> (TokenManager, Arc<ScriptedRefreshClient>, Arc<MemoryTokenStorage>) {
        let client = Arc::new(ScriptedRefreshClient::new());
        let storage = Arc::new(MemoryTokenStorage::with_tokens(TokenPair::new(
            jwt_expiring_at(NOW as i64 - 10),
            Some("refresh-0".to_string()),
        )));
        let manager = TokenManager::builder(client.clone(), storage.clone())
            .config(config)
            .clock(Arc::new(MockClock::at_unix(NOW)))
            .build();
        (manager, client, storage)
    }

    #[test]
    fn test_proactive_delay_formula() {
        let config = TokenManagerConfig::default();
        // 1 h token: refresh 5 min early
        assert_eq!(proactive_refresh_delay(3600, &config), Some(Duration::from_secs(3300)));
        // Short token: floor of 30 s
        assert_eq!(proactive_refresh_delay(60, &config), Some(Duration::from_secs(30)));
        // Week-long token: capped at 24 h
        assert_eq!(
            proactive_refresh_delay(7 * 24 * 3600, &config),
            Some(Duration::from_secs(24 * 3600))
        );
        assert_eq!(proactive_refresh_delay(0, &config), None);
        assert_eq!(proactive_refresh_delay(-5, &config), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_success_persists_and_resets() {
        let (manager, client, storage) = setup(TokenManagerConfig::default());
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));

        let outcome = manager.refresh().await.unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(client.seen_refresh_tokens(), vec![Some("refresh-0".to_string())]);
        assert_eq!(storage.snapshot().unwrap().access, outcome.access_token().unwrap());
        assert_eq!(storage.snapshot().unwrap().refresh.as_deref(), Some("refresh-1"));
        assert_eq!(manager.failure_count(), 0);
        assert!(!manager.is_refresh_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_rotated_refresh_token_keeps_old_one() {
        let (manager, client, storage) = setup(TokenManagerConfig::default());
        client.push_ok(RefreshOutcome {
            tokens: Some(TokenPair::new(jwt_expiring_at(NOW as i64 + 600), None)),
            access_token_lifetime: Some(600),
        });

        manager.refresh().await.unwrap();
        assert_eq!(storage.snapshot().unwrap().refresh.as_deref(), Some("refresh-0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_call() {
        let client =
            Arc::new(ScriptedRefreshClient::new().with_latency(Duration::from_millis(200)));
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));
        let manager = TokenManager::builder(
            client.clone(),
            Arc::new(MemoryTokenStorage::with_tokens(TokenPair::new("a", Some("r".into())))),
        )
        .build();

        let results = futures::future::join_all((0..10).map(|_| manager.refresh())).await;

        assert_eq!(client.calls(), 1);
        let first = results[0].as_ref().unwrap().access_token().map(str::to_string);
        assert!(first.is_some());
        for result in &results {
            assert_eq!(result.as_ref().unwrap().access_token().map(str::to_string), first);
        }
        assert!(!manager.is_refresh_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_refresh_expires_session() {
        let (manager, client, storage) = setup(TokenManagerConfig::default());
        let listener = Arc::new(RecordingListener::new());
        manager.events().add_listener(listener.clone());
        client.push_status(401);

        assert_eq!(manager.refresh().await, Err(TokenManagerError::SessionExpired));
        assert!(manager.is_session_expired());
        assert!(storage.snapshot().is_none());
        assert_eq!(
            listener.events(),
            vec![ClientEvent::SessionExpired { reason: SessionExpiryReason::RefreshRejected }]
        );

        // Sticky: no further I/O
        assert_eq!(manager.refresh().await, Err(TokenManagerError::SessionExpired));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_refresh_is_revoked() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_status(403);

        assert_eq!(manager.refresh().await, Err(TokenManagerError::RefreshRevoked));
        assert!(manager.is_session_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_refresh_is_counted() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_err(RefreshFailure::Status {
            status: 429,
            message: None,
            retry_after: Some(Duration::from_secs(5)),
        });

        let err = manager.refresh().await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(manager.failure_count(), 1);
        assert!(!manager.is_session_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient_failure() {
        let client = Arc::new(ScriptedRefreshClient::new().with_latency(Duration::from_secs(60)));
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "late"));
        let manager = TokenManager::builder(
            client.clone(),
            Arc::new(MemoryTokenStorage::with_tokens(TokenPair::new("a", Some("r".into())))),
        )
        .build();

        let err = manager.refresh().await.unwrap_err();
        assert_eq!(err, TokenManagerError::Timeout(Duration::from_secs(10)));
        assert!(err.is_retryable());
        assert_eq!(manager.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_interval_between_attempts() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_status(500);
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));

        let start = Instant::now();
        assert!(manager.refresh().await.is_err());
        assert!(manager.refresh().await.is_ok());

        assert!(Instant::now() - start >= Duration::from_secs(10));
        assert_eq!(manager.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_token_expires_in_header_mode() {
        let client = Arc::new(ScriptedRefreshClient::new());
        let manager = TokenManager::new(client.clone(), Arc::new(MemoryTokenStorage::new()));

        assert_eq!(manager.refresh().await, Err(TokenManagerError::SessionExpired));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cookie_mode_refreshes_without_token() {
        let client = Arc::new(ScriptedRefreshClient::new());
        client.push_ok(RefreshOutcome { tokens: None, access_token_lifetime: Some(900) });
        let config =
            TokenManagerConfig { refresh_token_required: false, ..TokenManagerConfig::default() };
        let manager = TokenManager::builder(client.clone(), Arc::new(MemoryTokenStorage::new()))
            .config(config)
            .build();

        assert!(manager.refresh().await.is_ok());
        assert_eq!(client.seen_refresh_tokens(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_refresh_fires_before_expiry() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_ok(refreshed_tokens(NOW as i64 + 7200, "refresh-1"));

        assert_eq!(manager.schedule_proactive_refresh(Some(600)), Some(Duration::from_secs(300)));
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(client.calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_previous_timer() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.set_fallback(Ok(refreshed_tokens(NOW as i64 + 100_000, "r")));

        manager.schedule_proactive_refresh(Some(400));
        manager.schedule_proactive_refresh(Some(3600));
        assert_eq!(manager.schedule_proactive_refresh(None), None);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_times_out_session() {
        let (manager, _, _) = setup(TokenManagerConfig {
            session_timeout: Duration::from_secs(60),
            ..TokenManagerConfig::default()
        });
        let mut events = manager.subscribe();

        manager.start_session_watchdog();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(manager.is_session_expired());
        assert_eq!(events.recv().await.unwrap(), ClientEvent::SessionTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_during_refresh_discards_tokens() {
        let client = Arc::new(ScriptedRefreshClient::new().with_latency(Duration::from_secs(5)));
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));
        let storage =
            Arc::new(MemoryTokenStorage::with_tokens(TokenPair::new("a", Some("r".into()))));
        let manager = TokenManager::builder(client.clone(), storage.clone())
            .config(TokenManagerConfig {
                session_timeout: Duration::from_secs(2),
                ..TokenManagerConfig::default()
            })
            .clock(Arc::new(MockClock::at_unix(NOW)))
            .build();
        let generation = manager.credential_generation();

        manager.start_session_watchdog();
        assert_eq!(manager.refresh().await, Err(TokenManagerError::SessionExpired));

        assert_eq!(client.calls(), 1);
        assert!(manager.is_session_expired());
        assert!(storage.snapshot().is_none());
        assert_eq!(manager.credential_generation(), generation);
        assert!(!manager.is_refresh_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_advances_on_new_credentials() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_status(500);
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));

        let start = manager.credential_generation();
        assert!(manager.refresh().await.is_err());
        assert_eq!(manager.credential_generation(), start);

        manager.refresh().await.unwrap();
        assert_eq!(manager.credential_generation(), start + 1);

        let pair = TokenPair::new(jwt_expiring_at(NOW as i64 + 3600), Some("login".into()));
        manager.set_session(pair).await.unwrap();
        assert_eq!(manager.credential_generation(), start + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_session_resets_sticky_flag() {
        let (manager, client, storage) = setup(TokenManagerConfig::default());
        client.push_status(401);
        let _ = manager.refresh().await;
        assert!(manager.is_session_expired());

        let pair = TokenPair::new(jwt_expiring_at(NOW as i64 + 3600), Some("fresh".into()));
        manager.set_session(pair.clone()).await.unwrap();

        assert!(!manager.is_session_expired());
        assert_eq!(manager.failure_count(), 0);
        assert_eq!(storage.snapshot(), Some(pair));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_session_blocks_refresh() {
        let (manager, client, storage) = setup(TokenManagerConfig::default());
        manager.clear_session().await.unwrap();

        assert!(storage.snapshot().is_none());
        assert_eq!(manager.refresh().await, Err(TokenManagerError::SessionExpired));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_session_schedules_refresh() {
        let (manager, client, _) = setup(TokenManagerConfig::default());
        client.push_ok(refreshed_tokens(NOW as i64 + 3600, "refresh-1"));

        assert!(manager.restore_session().await.unwrap());
        // Stored token is already expired, so the 30 s floor applies
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(client.calls(), 1);
    }
}
