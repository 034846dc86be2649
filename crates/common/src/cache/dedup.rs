//! In-flight coalescing plus a short TTL cache for read requests
//!
//! At most one operation runs per [`DedupKey`] at any instant. Callers that
//! arrive while it runs await the same shared future; successful results are
//! then cached for the TTL. Errors are never cached, and entries leave the
//! cache only when their TTL elapses (or on explicit invalidation).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::key::DedupKey;
use super::stats::{DedupStats, MetricsCollector};
use crate::time::{Scheduler, TokioScheduler};

/// Advisory request priority, recorded in traces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupOptions {
    /// TTL for a successful result; the deduplicator default when `None`
    pub cache_ttl: Option<Duration>,
    /// Bypass (but still refresh) the cache
    pub skip_cache: bool,
    pub priority: RequestPriority,
}

impl DedupOptions {
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }
}

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    ttl: Duration,
}

impl<V> CachedEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) < self.ttl
    }
}

struct InFlight<V, E> {
    generation: u64,
    future: SharedResult<V, E>,
}

struct DedupState<V, E> {
    in_flight: HashMap<DedupKey, InFlight<V, E>>,
    cache: HashMap<DedupKey, CachedEntry<V>>,
    next_generation: u64,
}

struct Inner<V, E> {
    state: Mutex<DedupState<V, E>>,
    default_ttl: Duration,
    scheduler: Arc<dyn Scheduler>,
    metrics: MetricsCollector,
}

/// Request deduplicator for values of type `V` and errors of type `E`
///
/// Cheap to clone; clones share state.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use ledgerlens_common::cache::{DedupKey, DedupOptions, RequestDeduplicator};
///
/// #[tokio::main]
/// async fn main() {
///     let dedup: RequestDeduplicator<u32, String> =
///         RequestDeduplicator::new(Duration::from_secs(5));
///     let key = DedupKey::from_request("GET", "/api/accounts");
///
///     let first = dedup.execute_request(key.clone(), || async { Ok(1) }, DedupOptions::default());
///     let second = dedup.execute_request(key, || async { Ok(2) }, DedupOptions::default());
///
///     let (a, b) = tokio::join!(first, second);
///     assert_eq!((a, b), (Ok(1), Ok(1)));
/// }
/// ```
pub struct RequestDeduplicator<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for RequestDeduplicator<V, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V, E> fmt::Debug for RequestDeduplicator<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestDeduplicator")
            .field("default_ttl", &self.inner.default_ttl)
            .field("in_flight", &state.in_flight.len())
            .field("cached", &state.cache.len())
            .finish()
    }
}

impl<V, E> RequestDeduplicator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_scheduler(default_ttl, Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(default_ttl: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DedupState {
                    in_flight: HashMap::new(),
                    cache: HashMap::new(),
                    next_generation: 0,
                }),
                default_ttl,
                scheduler,
                metrics: MetricsCollector::default(),
            }),
        }
    }

    /// Run `operation` unless an identical request can be shared
    ///
    /// In order: join the in-flight call for `key`; serve a fresh cached
    /// value unless `skip_cache`; otherwise run `operation`. `operation` is
    /// invoked at most once, and not at all when the result is shared.
    ///
    /// # Errors
    ///
    /// Returns the operation's error to every caller sharing the call.
    pub async fn execute_request<F, Fut>(
        &self,
        key: DedupKey,
        operation: F,
        options: DedupOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let shared = {
            let mut state = self.inner.state.lock();

            if let Some(in_flight) = state.in_flight.get(&key) {
                self.inner.metrics.record_coalesced();
                trace!(key = %key, priority = ?options.priority, "joining in-flight request");
                in_flight.future.clone()
            } else {
                let now = self.inner.scheduler.now();
                if !options.skip_cache {
                    if let Some(entry) = state.cache.get(&key) {
                        if entry.is_fresh(now) {
                            self.inner.metrics.record_hit();
                            trace!(key = %key, "serving cached response");
                            return Ok(entry.value.clone());
                        }
                        state.cache.remove(&key);
                        self.inner.metrics.record_expirations(1);
                    }
                }

                self.inner.metrics.record_miss();
                let generation = state.next_generation;
                state.next_generation += 1;

                let ttl = options.cache_ttl.unwrap_or(self.inner.default_ttl);
                let future = Self::track(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    generation,
                    ttl,
                    operation(),
                );
                state
                    .in_flight
                    .insert(key.clone(), InFlight { generation, future: future.clone() });
                debug!(key = %key, priority = ?options.priority, "executing request");
                future
            }
        };

        shared.await
    }

    /// Wrap `fut` so its completion unregisters it and caches success
    fn track<Fut>(
        inner: Weak<Inner<V, E>>,
        key: DedupKey,
        generation: u64,
        ttl: Duration,
        fut: Fut,
    ) -> SharedResult<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        async move {
            let result = fut.await;
            if let Some(inner) = inner.upgrade() {
                let now = inner.scheduler.now();
                let mut state = inner.state.lock();
                // After an invalidation the slot is gone or owned by a newer
                // call; a detached result is neither unregistered nor cached
                let owned = state.in_flight.get(&key).is_some_and(|f| f.generation == generation);
                if owned {
                    state.in_flight.remove(&key);
                }
                if let (true, Ok(value)) = (owned, &result) {
                    if !ttl.is_zero() {
                        state
                            .cache
                            .insert(key, CachedEntry { value: value.clone(), cached_at: now, ttl });
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Drop the cached value for `key`; an in-flight call is detached so the
    /// next request starts fresh
    pub fn invalidate(&self, key: &DedupKey) -> bool {
        let mut state = self.inner.state.lock();
        let cached = state.cache.remove(key).is_some();
        let in_flight = state.in_flight.remove(key).is_some();
        cached || in_flight
    }

    /// Drop every cached value
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.cache.clear();
        debug!("request cache cleared");
    }

    /// Remove expired cache entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.scheduler.now();
        let mut state = self.inner.state.lock();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.is_fresh(now));
        let removed = before - state.cache.len();
        self.inner.metrics.record_expirations(removed as u64);
        removed
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.inner.state.lock();
        self.inner.metrics.snapshot(state.cache.len(), state.in_flight.len())
    }
}
