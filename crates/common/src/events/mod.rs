//! Client lifecycle events
//!
//! The client core never navigates or renders anything itself. Terminal
//! conditions (session expired, session timeout, plan upgrade required) are
//! published through an [`EventNotifier`]:
//!
//! - synchronous [`SessionListener`]s run in registration order and may
//!   return [`EventDisposition::Prevent`] to suppress the default action
//!   (for example the login redirect);
//! - [`EventNotifier::subscribe`] hands out a `tokio::sync::broadcast`
//!   receiver for observers that only watch.
//!
//! The default action of the session events is the [`LoginRedirect`]
//! collaborator installed with [`EventNotifier::with_login_redirect`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionExpiryReason {
    /// The refresh endpoint answered 401
    RefreshRejected,
    /// The refresh endpoint answered 403
    RefreshRevoked,
    /// Consecutive transient refresh failures reached the limit
    TooManyFailures,
    /// No refresh token was available
    MissingRefreshToken,
}

impl fmt::Display for SessionExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RefreshRejected => "refresh_rejected",
            Self::RefreshRevoked => "refresh_revoked",
            Self::TooManyFailures => "too_many_failures",
            Self::MissingRefreshToken => "missing_refresh_token",
        };
        f.write_str(s)
    }
}

/// Event emitted by the client core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The session can no longer be recovered without a new login
    SessionExpired { reason: SessionExpiryReason },
    /// The absolute session lifetime elapsed
    SessionTimeout,
    /// A request hit a plan limit (429/403 with `upgrade_required`)
    UpgradeRequired { status: u16, message: Option<String> },
    /// A refresh completed and new tokens were stored
    TokensRefreshed,
}

impl ClientEvent {
    /// Whether listeners can prevent this event's default action
    pub fn is_cancelable(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::SessionTimeout)
    }
}

/// What the default action should do after listeners ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDisposition {
    /// Run the default action
    #[default]
    Continue,
    /// Suppress the default action
    Prevent,
}

/// Synchronous event listener
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &ClientEvent) -> EventDisposition;
}

impl<F> SessionListener for F
where
    F: Fn(&ClientEvent) -> EventDisposition + Send + Sync,
{
    fn on_event(&self, event: &ClientEvent) -> EventDisposition {
        self(event)
    }
}

/// Sends the user back to the login screen
///
/// Implemented by the UI layer; the client core only decides when.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, event: &ClientEvent);
}

/// Fan-out point for [`ClientEvent`]s
#[derive(Clone)]
pub struct EventNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
    sender: broadcast::Sender<ClientEvent>,
    login_redirect: Option<Arc<dyn LoginRedirect>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { listeners: Arc::new(RwLock::new(Vec::new())), sender, login_redirect: None }
    }

    /// Run `redirect` as the default action of session events
    #[must_use]
    pub fn with_login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.login_redirect = Some(redirect);
        self
    }

    /// Register a listener that may prevent default actions
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribe to every emitted event
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Publish an event and report whether its default action should run
    ///
    /// Every listener sees the event even after one of them prevented it.
    /// Prevention is ignored for events that are not cancelable.
    pub fn emit(&self, event: ClientEvent) -> EventDisposition {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();

        let mut disposition = EventDisposition::Continue;
        for listener in listeners {
            if listener.on_event(&event) == EventDisposition::Prevent {
                disposition = EventDisposition::Prevent;
            }
        }

        if disposition == EventDisposition::Prevent && !event.is_cancelable() {
            warn!(?event, "listener tried to prevent a non-cancelable event");
            disposition = EventDisposition::Continue;
        }

        // No receivers is not an error
        if self.sender.send(event.clone()).is_err() {
            debug!(?event, "event emitted with no subscribers");
        }

        if disposition == EventDisposition::Continue && event.is_cancelable() {
            if let Some(redirect) = &self.login_redirect {
                info!(?event, "redirecting to login");
                redirect.redirect_to_login(&event);
            }
        }

        disposition
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNotifier")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.sender.receiver_count())
            .field("login_redirect", &self.login_redirect.is_some())
            .finish()
    }
}
