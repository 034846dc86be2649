//! Time abstractions
//!
//! - **[`clock`]**: wall-clock and monotonic time ([`Clock`], [`SystemClock`],
//!   [`MockClock`])
//! - **[`scheduler`]**: timers and sleeps ([`Scheduler`], [`TokioScheduler`],
//!   [`TimerHandle`])
//!
//! Everything that waits (backoff, proactive refresh, session watchdog) goes
//! through a [`Scheduler`], so tests drive it with Tokio's paused clock
//! instead of real timers:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use ledgerlens_common::time::{Scheduler, TokioScheduler};
//!
//! #[tokio::main(flavor = "current_thread", start_paused = true)]
//! async fn main() {
//!     let scheduler = TokioScheduler;
//!     let start = scheduler.now();
//!     scheduler.sleep(Duration::from_secs(3600)).await;
//!     assert!(scheduler.now() - start >= Duration::from_secs(3600));
//! }
//! ```

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, MockClock, SystemClock};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
