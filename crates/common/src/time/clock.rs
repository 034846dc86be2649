//! Wall-clock abstraction for testability
//!
//! JWT expiry is expressed in seconds since the UNIX epoch, so the token
//! manager reads wall-clock time through [`Clock`] and tests pin it with
//! [`MockClock`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Trait for time operations to enable testing
pub trait Clock: Send + Sync {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    /// Get whole seconds since UNIX epoch
    fn unix_timestamp(&self) -> i64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
    }
}

/// Real system clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves when [`MockClock::advance`] is called.
///
/// ```
/// use std::time::Duration;
///
/// use ledgerlens_common::time::{Clock, MockClock};
///
/// let clock = MockClock::at_unix(1_700_000_000);
/// clock.advance(Duration::from_secs(90));
/// assert_eq!(clock.unix_timestamp(), 1_700_000_090);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
    base_system_time: SystemTime,
}

impl MockClock {
    /// Create a new mock clock starting at the current real time
    pub fn new() -> Self {
        Self::with_system_time(SystemTime::now())
    }

    /// Create a mock clock whose wall clock starts at `system_time`
    pub fn with_system_time(system_time: SystemTime) -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            base_system_time: system_time,
        }
    }

    /// Create a mock clock whose wall clock starts at `secs` since the epoch
    pub fn at_unix(secs: u64) -> Self {
        Self::with_system_time(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + *self.elapsed.lock()
    }
}
