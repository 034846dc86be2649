//! FIFO retry queue with a global rate-limit window
//!
//! Every job submitted through [`RetryQueue::execute_with_retry`] is run by a
//! single worker task, one job at a time and in submission order. The worker
//! stays with a job through its backoff waits, so a queue never has more than
//! one request in flight against the backend.
//!
//! Per job:
//!
//! ```text
//! Pending -> Executing -> Succeeded
//!                      -> Failed     (non-retryable error)
//!                      -> Exhausted  (retry budget spent)
//!                      -> Retrying -> Executing
//! ```
//!
//! A rate-limited failure pushes the queue-wide `reset_at` forward; no attempt
//! of any job starts before it. The wait in `Retrying` is therefore
//! `max(delay, reset_at - now)`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use crate::error::ErrorClassification;
use crate::time::{Scheduler, TokioScheduler};

/// Errors returned by [`RetryQueue::execute_with_retry`]
#[derive(Debug, Clone, Error)]
pub enum RetryQueueError<E> {
    /// The retry budget was spent; carries the last failure
    #[error("operation failed after {retries} retries: {last_error}")]
    Exhausted { retries: u32, last_error: E },

    /// The operation failed with an error that must not be retried
    #[error("{0}")]
    NonRetryable(E),

    /// The queue shut down before the job completed
    #[error("retry queue closed")]
    Closed,
}

impl<E> RetryQueueError<E> {
    /// The underlying operation error, if there is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::NonRetryable(e) => Some(e),
            Self::Closed => None,
        }
    }

    /// Number of retries performed before giving up
    pub fn retries(&self) -> u32 {
        match self {
            Self::Exhausted { retries, .. } => *retries,
            _ => 0,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, Duration, &E) + Send + Sync>;

/// Per-call retry options
pub struct RetryOptions<E> {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    should_retry: Option<RetryPredicate<E>>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> RetryOptions<E> {
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self { max_retries, backoff, should_retry: None, on_retry: None }
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the retryability predicate
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Observe each retry as `(attempt, delay, error)` before its wait
    #[must_use]
    pub fn on_retry(mut self, hook: impl Fn(u32, Duration, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }
}

impl<E: ErrorClassification> RetryOptions<E> {
    fn is_retryable(&self, error: &E) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(3, BackoffPolicy::default())
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("custom_predicate", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Queue-wide cooldown set by rate-limited failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitWindow {
    reset_at: Option<Instant>,
}

impl RateLimitWindow {
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Move `reset_at` to `until` unless it is already later
    pub fn extend(&mut self, until: Instant) -> bool {
        match self.reset_at {
            Some(current) if current >= until => false,
            _ => {
                self.reset_at = Some(until);
                true
            }
        }
    }

    /// Time left before execution may resume
    pub fn remaining(&self, now: Instant) -> Duration {
        self.reset_at.map(|reset| reset.saturating_duration_since(now)).unwrap_or_default()
    }
}

type Job = Box<dyn FnOnce(Arc<QueueShared>) -> BoxFuture<'static, ()> + Send>;

struct QueueShared {
    name: String,
    scheduler: Arc<dyn Scheduler>,
    window: Mutex<RateLimitWindow>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: AtomicUsize,
}

impl QueueShared {
    async fn wait_for_rate_limit(&self) {
        loop {
            let remaining = self.window.lock().remaining(self.scheduler.now());
            if remaining.is_zero() {
                return;
            }
            debug!(queue = %self.name, wait_ms = remaining.as_millis() as u64, "queue paused by rate limit");
            self.scheduler.sleep(remaining).await;
        }
    }
}

/// Single-worker FIFO retry queue
///
/// Cheap to clone; clones feed the same worker. The worker is spawned on the
/// first submission and exits once every handle is dropped.
#[derive(Clone)]
pub struct RetryQueue {
    shared: Arc<QueueShared>,
}

impl fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryQueue")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .field("window", &*self.shared.window.lock())
            .finish()
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new("default")
    }
}

impl RetryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scheduler(name, Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(name: impl Into<String>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                name: name.into(),
                scheduler,
                window: Mutex::new(RateLimitWindow::default()),
                sender: Mutex::new(None),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Jobs submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Time left in the current rate-limit window
    pub fn rate_limit_remaining(&self) -> Duration {
        self.shared.window.lock().remaining(self.shared.scheduler.now())
    }

    pub fn rate_limit_window(&self) -> RateLimitWindow {
        *self.shared.window.lock()
    }

    /// Run `operation` through the queue with retries
    ///
    /// `operation` is called once per attempt. The returned future resolves
    /// when the job succeeds, fails non-retryably or spends its budget.
    /// Dropping it abandons the job: no further attempt starts, but an
    /// attempt already running is not interrupted.
    ///
    /// # Errors
    ///
    /// - [`RetryQueueError::NonRetryable`] for errors the predicate rejects
    /// - [`RetryQueueError::Exhausted`] after `max_retries` retries
    /// - [`RetryQueueError::Closed`] if the worker went away
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        options: RetryOptions<E>,
    ) -> Result<T, RetryQueueError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: ErrorClassification + fmt::Display + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |shared| {
            async move {
                let result = run_job(&shared, operation, options, &tx).await;
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                if tx.send(result).is_err() {
                    debug!(queue = %shared.name, "caller stopped waiting for job result");
                }
            }
            .boxed()
        });

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender().send(job).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(RetryQueueError::Closed);
        }

        rx.await.unwrap_or(Err(RetryQueueError::Closed))
    }

    fn sender(&self) -> mpsc::UnboundedSender<Job> {
        let mut slot = self.shared.sender.lock();
        if let Some(sender) = slot.as_ref().filter(|s| !s.is_closed()) {
            return sender.clone();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker(Arc::downgrade(&self.shared), receiver));
        debug!(queue = %self.shared.name, "retry queue worker started");
        *slot = Some(sender.clone());
        sender
    }
}

async fn worker(shared: Weak<QueueShared>, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.recv().await {
        let Some(shared) = shared.upgrade() else { break };
        job(shared).await;
    }
    debug!("retry queue worker stopped");
}

async fn run_job<T, E, F, Fut>(
    shared: &QueueShared,
    mut operation: F,
    options: RetryOptions<E>,
    caller: &oneshot::Sender<Result<T, RetryQueueError<E>>>,
) -> Result<T, RetryQueueError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorClassification + fmt::Display,
{
    let mut retries = 0u32;

    loop {
        shared.wait_for_rate_limit().await;
        if caller.is_closed() {
            debug!(queue = %shared.name, retries, "job abandoned before attempt");
            return Err(RetryQueueError::Closed);
        }

        let error = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    info!(queue = %shared.name, retries, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let attempt = retries + 1;
        let hinted = error.retry_after();
        let delay = hinted.unwrap_or_else(|| options.backoff.delay_for(attempt));

        let now = shared.scheduler.now();
        if error.is_rate_limited() && shared.window.lock().extend(now + delay) {
            warn!(
                queue = %shared.name,
                cooldown_ms = delay.as_millis() as u64,
                server_hint = hinted.is_some(),
                "rate limited, pausing queue"
            );
        }

        if !options.is_retryable(&error) {
            debug!(queue = %shared.name, error = %error, "non-retryable failure");
            return Err(RetryQueueError::NonRetryable(error));
        }
        if retries >= options.max_retries {
            warn!(queue = %shared.name, retries, error = %error, "retry budget exhausted");
            return Err(RetryQueueError::Exhausted { retries, last_error: error });
        }

        retries = attempt;
        if let Some(hook) = &options.on_retry {
            hook(attempt, delay, &error);
        }

        let reset_at = shared.window.lock().reset_at();
        let resume_at = reset_at.map_or(now + delay, |reset| reset.max(now + delay));
        debug!(
            queue = %shared.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after backoff"
        );
        shared.scheduler.sleep_until(resume_at).await;
    }
}
