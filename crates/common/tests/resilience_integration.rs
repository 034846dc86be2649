//! Integration tests for resilience module
//!
//! Exercises backoff and the shared retry queue on Tokio's paused clock, so
//! delays are asserted exactly.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerlens_common::error::{ErrorClassification, ErrorSeverity};
use ledgerlens_common::resilience::{BackoffPolicy, RetryOptions, RetryQueue, RetryQueueError};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Custom error type for testing
#[derive(Debug, Clone, PartialEq)]
enum ApiFailure {
    Unavailable,
    TooManyRequests(Option<Duration>),
    BadRequest,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "503 service unavailable"),
            Self::TooManyRequests(_) => write!(f, "429 too many requests"),
            Self::BadRequest => write!(f, "400 bad request"),
        }
    }
}

impl ErrorClassification for ApiFailure {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::BadRequest)
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests(hint) => *hint,
            _ => None,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooManyRequests(_))
    }
}

fn elapsed_ms(start: Instant) -> u128 {
    (Instant::now() - start).as_millis()
}

/// Validates that computed backoff grows monotonically and respects the cap.
///
/// # Test Steps
/// 1. Use the default policy (1 s initial, x2, 30 s cap, 10 % jitter)
/// 2. Sample delays for attempts 1..=10 with random jitter
/// 3. Verify each delay is at least the previous one
/// 4. Verify no delay exceeds 30 s and late attempts sit at the cap
#[test]
fn test_backoff_monotonic_and_capped() {
    let policy = BackoffPolicy::default();

    for _ in 0..50 {
        let delays: Vec<Duration> = (1..=10).map(|n| policy.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays decreased: {delays:?}");
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert!(delays[0] >= Duration::from_secs(1) && delays[0] <= Duration::from_millis(1100));
        assert_eq!(delays[9], Duration::from_secs(30));
    }
}

/// Validates that a server-provided retry hint replaces computed backoff.
///
/// # Test Steps
/// 1. Fail the first attempt with a 429 carrying a 5 s hint
/// 2. Succeed on the second attempt
/// 3. Verify the retry started exactly 5000 ms after the first attempt
#[tokio::test(start_paused = true)]
async fn test_server_hint_overrides_backoff() {
    let queue = RetryQueue::new("hint");
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let log = Arc::clone(&attempts);
    let result = queue
        .execute_with_retry(
            move || {
                let log = Arc::clone(&log);
                async move {
                    let mut log = log.lock();
                    log.push(elapsed_ms(start));
                    if log.len() == 1 {
                        Err(ApiFailure::TooManyRequests(Some(Duration::from_secs(5))))
                    } else {
                        Ok("done")
                    }
                }
            },
            RetryOptions::default(),
        )
        .await;

    assert_eq!(result.expect("retry succeeds"), "done");
    assert_eq!(*attempts.lock(), vec![0, 5000]);
}

/// Validates that a rate limit pauses every queued request.
///
/// # Test Steps
/// 1. Job A hits a 429 with an 8 s hint at t = 0
/// 2. At t = 2 s the queue reports 6 s of remaining cooldown
/// 3. Job B is submitted at t = 2 s
/// 4. Verify B's first attempt starts no earlier than t = 8 s
#[tokio::test(start_paused = true)]
async fn test_rate_limit_gates_later_requests() {
    let queue = RetryQueue::new("gating");
    let start = Instant::now();
    let a_calls = Arc::new(AtomicU32::new(0));

    let job_a = {
        let queue = queue.clone();
        let calls = Arc::clone(&a_calls);
        tokio::spawn(async move {
            queue
                .execute_with_retry(
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(ApiFailure::TooManyRequests(Some(Duration::from_secs(8))))
                            } else {
                                Ok(())
                            }
                        }
                    },
                    RetryOptions::default(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(queue.rate_limit_remaining(), Duration::from_secs(6));

    let b_started = queue
        .execute_with_retry(
            move || async move { Ok::<_, ApiFailure>(elapsed_ms(start)) },
            RetryOptions::default(),
        )
        .await
        .expect("job B");

    assert!(b_started >= 8000, "job B started at {b_started} ms");
    assert!(job_a.await.expect("join").is_ok());
    assert_eq!(a_calls.load(Ordering::SeqCst), 2);
}

/// Validates retry budget accounting and hook reporting.
///
/// # Test Steps
/// 1. Always fail with a transient error, no jitter, 3 retries
/// 2. Verify 4 attempts were made (1 + 3 retries)
/// 3. Verify the hook saw attempts 1..=3 with delays 1 s, 2 s, 4 s
#[tokio::test(start_paused = true)]
async fn test_exhaustion_reports_each_retry() {
    let queue = RetryQueue::new("exhaust");
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let hook_seen = Arc::clone(&seen);
    let options = RetryOptions::new(3, BackoffPolicy::default().without_jitter()).on_retry(
        move |attempt, delay, _err: &ApiFailure| hook_seen.lock().push((attempt, delay)),
    );

    let counter = Arc::clone(&calls);
    let result: Result<(), _> = queue
        .execute_with_retry(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiFailure::Unavailable) }
            },
            options,
        )
        .await;

    match result {
        Err(RetryQueueError::Exhausted { retries, last_error }) => {
            assert_eq!(retries, 3);
            assert_eq!(last_error, ApiFailure::Unavailable);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *seen.lock(),
        vec![
            (1, Duration::from_secs(1)),
            (2, Duration::from_secs(2)),
            (3, Duration::from_secs(4)),
        ]
    );
}

/// Validates that client errors are returned without retrying.
#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_fails_fast() {
    let queue = RetryQueue::new("fail-fast");
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let counter = Arc::clone(&calls);
    let result: Result<(), _> = queue
        .execute_with_retry(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiFailure::BadRequest) }
            },
            RetryOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(RetryQueueError::NonRetryable(ApiFailure::BadRequest))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(elapsed_ms(start), 0);
}
