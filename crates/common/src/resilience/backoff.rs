//! Exponential backoff with proportional jitter
//!
//! `delay(n) = min(max_delay, initial * multiplier^(n-1) + jitter)` where
//! `jitter` is drawn uniformly from `[0, jitter_ratio * base]`. As long as
//! `multiplier >= 1 + jitter_ratio` consecutive delays never decrease.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for the retry queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the jitter as a fraction of the base delay
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter
    #[must_use]
    pub fn without_jitter(self) -> Self {
        Self { jitter_ratio: 0.0, ..self }
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        millis_to_duration(millis)
    }

    /// Delay before retry number `attempt`, with random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit = if self.jitter_ratio > 0.0 { rand::thread_rng().gen_range(0.0..=1.0) } else { 0.0 };
        self.delay_with_jitter(attempt, unit)
    }

    /// Delay before retry number `attempt` with jitter fixed at `unit` of
    /// its maximum (`unit` in `[0, 1]`)
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = base * self.jitter_ratio * unit.clamp(0.0, 1.0);
        millis_to_duration(base + jitter).min(self.max_delay)
    }
}

fn millis_to_duration(millis: f64) -> Duration {
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        Duration::from_millis(u64::MAX)
    } else {
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
