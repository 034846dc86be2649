//! Timer and sleep abstraction
//!
//! [`Scheduler`] replaces ad-hoc `tokio::time` calls in the client core. The
//! production implementation, [`TokioScheduler`], sits on Tokio's timer wheel,
//! which means `#[tokio::test(start_paused = true)]` turns every backoff,
//! proactive refresh and watchdog into virtual time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Source of monotonic time, sleeps and cancellable one-shot timers
pub trait Scheduler: Send + Sync + 'static {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Future that completes after `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Run `task` once after `delay` unless the returned handle is cancelled
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;

    /// Future that completes at `deadline` (immediately if it has passed)
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        self.sleep(deadline.saturating_duration_since(self.now()))
    }
}

/// Handle to a scheduled timer
///
/// Dropping the handle does not cancel the timer; call [`TimerHandle::cancel`].
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(abort: Option<AbortHandle>, cancelled: Arc<AtomicBool>, fired: Arc<AtomicBool>) -> Self {
        Self { cancelled, fired, abort }
    }

    /// Cancel the timer; a no-op once the task has started running
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if !self.fired.load(Ordering::SeqCst) {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    /// Check if the timer has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if the delay elapsed and the task started
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// [`Scheduler`] backed by the ambient Tokio runtime
///
/// `schedule` spawns a task, so it must be called from within a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicBool::new(false));
        let task_cancelled = Arc::clone(&cancelled);
        let task_fired = Arc::clone(&fired);

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_cancelled.load(Ordering::SeqCst) {
                return;
            }
            // Once fired, cancel() must not abort the task from within itself
            task_fired.store(true, Ordering::SeqCst);
            task.await;
        });

        TimerHandle::new(Some(join.abort_handle()), cancelled, fired)
    }
}
