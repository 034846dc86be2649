//! Mock implementations of common traits
//!
//! Provides mock objects for testing purposes.

// Allow missing error/panic docs for test mocks - they are designed to be simple
// and errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::auth::{RefreshClient, RefreshFailure, RefreshOutcome};
use crate::events::{ClientEvent, EventDisposition, LoginRedirect, SessionListener};

type ScriptedResult = Result<RefreshOutcome, RefreshFailure>;

/// Refresh client that replays a script of responses
///
/// Each call pops the next scripted result. Once the script runs out, the
/// fallback (a network error unless set) is returned.
///
/// # Examples
///
/// ```
/// use ledgerlens_common::testing::mocks::ScriptedRefreshClient;
///
/// let client = ScriptedRefreshClient::new();
/// client.push_status(500);
/// client.push_status(401);
/// assert_eq!(client.remaining(), 2);
/// ```
#[derive(Debug)]
pub struct ScriptedRefreshClient {
    script: Mutex<VecDeque<ScriptedResult>>,
    fallback: Mutex<Option<ScriptedResult>>,
    calls: AtomicUsize,
    seen_tokens: Mutex<Vec<Option<String>>>,
    latency: Mutex<Duration>,
}

impl ScriptedRefreshClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Simulated network latency applied to every call
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    pub fn push_ok(&self, outcome: RefreshOutcome) {
        self.script.lock().push_back(Ok(outcome));
    }

    pub fn push_err(&self, failure: RefreshFailure) {
        self.script.lock().push_back(Err(failure));
    }

    pub fn push_status(&self, status: u16) {
        self.push_err(RefreshFailure::Status { status, message: None, retry_after: None });
    }

    /// Result returned once the script is exhausted
    pub fn set_fallback(&self, result: ScriptedResult) {
        *self.fallback.lock() = Some(result);
    }

    /// Number of calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens passed to each call, in order
    pub fn seen_refresh_tokens(&self) -> Vec<Option<String>> {
        self.seen_tokens.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl Default for ScriptedRefreshClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshClient for ScriptedRefreshClient {
    async fn refresh(&self, refresh_token: Option<&str>) -> ScriptedResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens.lock().push(refresh_token.map(str::to_string));

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        next.or_else(|| self.fallback.lock().clone())
            .unwrap_or_else(|| Err(RefreshFailure::Network("script exhausted".to_string())))
    }
}

/// Listener that records every event and answers with a fixed disposition
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ClientEvent>>,
    prevent: bool,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener that prevents every cancelable default action
    pub fn preventing() -> Self {
        Self { events: Mutex::new(Vec::new()), prevent: true }
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }
}

impl SessionListener for RecordingListener {
    fn on_event(&self, event: &ClientEvent) -> EventDisposition {
        self.events.lock().push(event.clone());
        if self.prevent {
            EventDisposition::Prevent
        } else {
            EventDisposition::Continue
        }
    }
}

/// Login redirect that counts invocations
#[derive(Debug, Default)]
pub struct CountingRedirect {
    count: AtomicUsize,
}

impl CountingRedirect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl LoginRedirect for CountingRedirect {
    fn redirect_to_login(&self, _event: &ClientEvent) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let client = ScriptedRefreshClient::new();
        client.push_status(500);
        client.push_ok(RefreshOutcome::default());

        assert!(client.refresh(Some("r")).await.is_err());
        assert!(client.refresh(None).await.is_ok());
        assert!(matches!(client.refresh(None).await, Err(RefreshFailure::Network(_))));

        assert_eq!(client.calls(), 3);
        assert_eq!(client.seen_refresh_tokens()[0].as_deref(), Some("r"));
    }
}
