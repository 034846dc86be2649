//! Integration tests for cache module
//!
//! Covers request coalescing, TTL expiry and key normalization of the
//! request deduplicator on Tokio's paused clock.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerlens_common::cache::{DedupKey, DedupOptions, RequestDeduplicator};

type Dedup = RequestDeduplicator<String, String>;

fn counted_fetch(
    calls: &Arc<AtomicU32>,
    latency: Duration,
) -> impl std::future::Future<Output = Result<String, String>> + Send + 'static {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    async move {
        tokio::time::sleep(latency).await;
        Ok(format!("response-{n}"))
    }
}

/// Verifies identical concurrent reads share one underlying call.
///
/// # Test Steps
/// 1. Start 10 concurrent requests for the same key, 200 ms latency each
/// 2. Verify the operation ran exactly once
/// 3. Verify all 10 callers received the same value
/// 4. Verify the stats count 1 miss and 9 coalesced callers
#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_coalesce() {
    let dedup = Dedup::new(Duration::from_secs(5));
    let calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let dedup = dedup.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                dedup
                    .execute_request(
                        DedupKey::from_request("GET", "/api/accounts"),
                        || counted_fetch(&calls, Duration::from_millis(200)),
                        DedupOptions::default(),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.expect("join"), Ok("response-1".to_string()));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = dedup.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 9);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.cached, 1);
}

/// Verifies the cache serves within its TTL and refetches after it.
///
/// # Test Steps
/// 1. Fetch once with a 5 s TTL
/// 2. Fetch again at t = 4.9 s and expect the cached value
/// 3. Fetch at t = 5 s and expect a fresh call
#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_triggers_refetch() {
    let dedup = Dedup::new(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let key = DedupKey::from_request("GET", "/api/transactions");
    let options = DedupOptions::default().ttl(Duration::from_secs(5));

    let fetch = || counted_fetch(&calls, Duration::ZERO);

    assert_eq!(dedup.execute_request(key.clone(), fetch, options).await, Ok("response-1".into()));

    tokio::time::advance(Duration::from_millis(4900)).await;
    assert_eq!(dedup.execute_request(key.clone(), fetch, options).await, Ok("response-1".into()));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(dedup.execute_request(key.clone(), fetch, options).await, Ok("response-2".into()));

    let stats = dedup.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
}

/// Verifies failed reads are shared but never cached.
#[tokio::test(start_paused = true)]
async fn test_errors_are_not_cached() {
    let dedup = Dedup::new(Duration::from_secs(5));
    let calls = Arc::new(AtomicU32::new(0));
    let key = DedupKey::from_request("GET", "/api/reports");

    let failing = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<String, _>("503".to_string()) }
    };
    assert_eq!(
        dedup.execute_request(key.clone(), failing, DedupOptions::default()).await,
        Err("503".to_string())
    );

    let result = dedup
        .execute_request(
            key,
            || counted_fetch(&calls, Duration::ZERO),
            DedupOptions::default(),
        )
        .await;
    assert_eq!(result, Ok("response-2".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Verifies `skip_cache` bypasses a fresh entry and `invalidate` drops it.
#[tokio::test(start_paused = true)]
async fn test_skip_cache_and_invalidate() {
    let dedup = Dedup::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicU32::new(0));
    let key = DedupKey::from_request("GET", "/api/accounts/1");
    let fetch = || counted_fetch(&calls, Duration::ZERO);

    dedup.execute_request(key.clone(), fetch, DedupOptions::default()).await.expect("first");
    let bypass =
        dedup.execute_request(key.clone(), fetch, DedupOptions::default().skip_cache()).await;
    assert_eq!(bypass, Ok("response-2".into()));

    assert!(dedup.invalidate(&key));
    let after = dedup.execute_request(key.clone(), fetch, DedupOptions::default()).await;
    assert_eq!(after, Ok("response-3".into()));
    assert!(!DedupKey::from_request("GET", "/api/other").to_hex().is_empty());
}

/// Verifies semantically identical requests produce the same key.
///
/// # Test Steps
/// 1. Build keys differing only in method case, slashes and parameter order
/// 2. Verify they are equal and share a hex digest
/// 3. Verify a different parameter value yields a different key
#[test]
fn test_key_normalization() {
    let a = DedupKey::new("get", "/api/transactions/?page=2&sort=date", [("limit", "25")]);
    let b = DedupKey::new("GET", "api/transactions", [("sort", "date"), ("limit", "25"), ("page", "2")]);
    let c = DedupKey::new("GET", "/api/transactions", [("page", "3"), ("sort", "date"), ("limit", "25")]);

    assert_eq!(a, b);
    assert_eq!(a.to_hex(), b.to_hex());
    assert_ne!(a, c);
    assert_ne!(DedupKey::from_request("GET", "/api/x"), DedupKey::from_request("POST", "/api/x"));
}
