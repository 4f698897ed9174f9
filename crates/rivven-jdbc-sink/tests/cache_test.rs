//! Tests for rivven-jdbc-sink connection cache

use rivven_jdbc_sink::prelude::*;
use rivven_jdbc_sink::testing::ScriptedConnectionProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn cache_over(
    raw: &Arc<ScriptedConnectionProvider>,
    max_retries: u32,
    backoff: Duration,
) -> Arc<CachedConnectionProvider> {
    Arc::new(CachedConnectionProvider::new(raw.clone(), max_retries, backoff))
}

// ==================== Acquisition Loop ====================

#[tokio::test]
async fn test_retry_till_failure() {
    let raw = Arc::new(ScriptedConnectionProvider::new().always_fail());
    let cache = cache_over(&raw, 15, Duration::from_millis(1));

    let err = cache
        .get_connection()
        .await
        .err()
        .expect("all attempts fail");

    assert_eq!(err.category(), ErrorCategory::RetriesExhausted);
    assert!(matches!(err, Error::RetriesExhausted { attempts: 15, .. }));
    assert_eq!(raw.attempts(), 15);

    let cause = err.last_failure().expect("last failure kept");
    assert!(cause.to_string().contains("#15"));
}

#[tokio::test]
async fn test_retry_till_connect() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new()
            .fail_times(14)
            .then_succeed()
            .always_fail(),
    );
    let cache = cache_over(&raw, 15, Duration::from_millis(1));

    assert!(cache.get_connection().await.is_ok());
    assert_eq!(raw.attempts(), 15);
    assert_eq!(raw.connections().len(), 1);

    let stats = cache.stats();
    assert_eq!(stats.attempts, 15);
    assert_eq!(stats.failures, 14);
    assert_eq!(stats.connections_created, 1);
}

#[tokio::test]
async fn test_exact_budget_for_small_n() {
    for n in 1..=4u32 {
        let raw = Arc::new(ScriptedConnectionProvider::new().always_fail());
        let cache = cache_over(&raw, n, Duration::ZERO);

        let result = cache.get_connection().await;
        assert!(matches!(result, Err(Error::RetriesExhausted { .. })));
        assert_eq!(raw.attempts(), n, "budget {}", n);

        let raw = Arc::new(ScriptedConnectionProvider::new().fail_times(n - 1));
        let cache = cache_over(&raw, n, Duration::ZERO);

        assert!(cache.get_connection().await.is_ok());
        assert_eq!(raw.attempts(), n, "budget {}", n);
    }
}

#[tokio::test]
async fn test_backoff_between_attempts() {
    let raw = Arc::new(ScriptedConnectionProvider::new().always_fail());
    let cache = cache_over(&raw, 3, Duration::from_millis(50));

    let start = Instant::now();
    let _ = cache.get_connection().await;

    // two sleeps between three attempts, none after the last
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(raw.attempts(), 3);
}

// ==================== Cache Reuse ====================

#[tokio::test]
async fn test_valid_connection_is_reused_without_acquisition() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    for _ in 0..5 {
        cache.get_connection().await.unwrap();
    }

    assert_eq!(raw.attempts(), 1);
    assert_eq!(raw.probes(), 5);
    assert_eq!(cache.stats().cache_hits, 5);
}

#[tokio::test]
async fn test_invalid_connection_is_released_and_loop_restarts() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new()
            .fail_times(2)
            .then_succeed()
            .fail_times(2)
            .then_succeed(),
    );
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    let first = raw.connections()[0].clone();
    first.set_valid(false);

    // a counter carried over from the first call would exhaust the budget here
    cache.get_connection().await.unwrap();

    assert_eq!(raw.attempts(), 6);
    assert_eq!(first.close_calls(), 1);

    let connections = raw.connections();
    assert_eq!(connections.len(), 2);
    assert!(!connections[1].is_closed());

    let stats = cache.stats();
    assert_eq!(stats.probe_failures, 1);
    assert_eq!(stats.connections_released, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_connection() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new().with_connect_delay(Duration::from_millis(20)),
    );
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(raw.attempts(), 1);
    assert_eq!(raw.connections().len(), 1);
}

// ==================== Close ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_till_close() {
    let raw = Arc::new(ScriptedConnectionProvider::new().always_fail());
    let cache = cache_over(&raw, UNBOUNDED_RETRIES, Duration::from_secs(10));

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    raw.wait_for_attempt().await;
    cache.close(true).await;

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("close wakes the backoff sleep")
        .unwrap();

    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(raw.attempts(), 1);
    assert_eq!(raw.close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_close_stops_loop_within_one_backoff() {
    let raw = Arc::new(ScriptedConnectionProvider::new().always_fail());
    let cache = cache_over(&raw, UNBOUNDED_RETRIES, Duration::from_millis(200));

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    raw.wait_for_attempt().await;
    let start = Instant::now();
    cache.close(false).await;

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("loop observes close")
        .unwrap();

    assert!(matches!(result, Err(Error::Closed)));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(raw.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_cancels_in_flight_attempt() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new().with_connect_delay(Duration::from_secs(10)),
    );
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.close(true).await;

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("in-flight attempt is dropped")
        .unwrap();

    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(raw.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_completing_after_close_is_released() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new().with_connect_delay(Duration::from_millis(200)),
    );
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.close(false).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Closed)));

    let connections = raw.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_last_failing_attempt_reports_closed() {
    let raw = Arc::new(
        ScriptedConnectionProvider::new()
            .always_fail()
            .with_connect_delay(Duration::from_millis(200)),
    );
    let cache = cache_over(&raw, 1, Duration::from_millis(1));

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.close(false).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(raw.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_close_during_attempt_skips_next_backoff() {
    let backoff = Duration::from_secs(2);
    let raw = Arc::new(
        ScriptedConnectionProvider::new()
            .always_fail()
            .with_connect_delay(Duration::from_millis(200)),
    );
    let cache = cache_over(&raw, UNBOUNDED_RETRIES, backoff);

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_connection().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let start = Instant::now();
    cache.close(false).await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("loop observes close")
        .unwrap();

    assert!(matches!(result, Err(Error::Closed)));
    assert!(start.elapsed() < backoff, "took {:?}", start.elapsed());
    assert_eq!(raw.attempts(), 1);
}

#[tokio::test]
async fn test_drop_without_close_releases_cached_connection() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    let conn = raw.connections()[0].clone();
    drop(cache);

    tokio::time::timeout(Duration::from_secs(1), async {
        while !conn.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("released in the background");

    assert_eq!(conn.close_calls(), 1);
}

#[tokio::test]
async fn test_drop_after_close_releases_nothing_twice() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    let conn = raw.connections()[0].clone();
    cache.close(false).await;
    drop(cache);

    tokio::task::yield_now().await;
    assert_eq!(conn.close_calls(), 1);
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    let conn = raw.connections()[0].clone();

    cache.close(true).await;
    cache.close(true).await;
    cache.close(false).await;

    assert_eq!(conn.close_calls(), 1);
    assert_eq!(raw.close_calls(), 1);
    assert_eq!(cache.stats().connections_released, 1);
}

#[tokio::test]
async fn test_close_swallows_release_failure() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, 3, Duration::from_millis(1));

    cache.get_connection().await.unwrap();
    let conn = raw.connections()[0].clone();
    conn.set_fail_close(true);

    cache.close(false).await;

    assert!(cache.is_closed());
    assert_eq!(conn.close_calls(), 1);
    assert_eq!(raw.close_calls(), 1);
}

#[tokio::test]
async fn test_get_after_close_fails_fast() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = cache_over(&raw, UNBOUNDED_RETRIES, Duration::from_secs(10));

    cache.get_connection().await.unwrap();
    cache.close(false).await;

    let start = Instant::now();
    for _ in 0..3 {
        let err = cache.get_connection().await.err().expect("closed");
        assert!(err.is_closed());
    }

    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(raw.attempts(), 1);
    assert_eq!(raw.probes(), 0);
}

#[tokio::test]
async fn test_validity_timeout_override() {
    let raw = Arc::new(ScriptedConnectionProvider::new());
    let cache = CachedConnectionProvider::new(raw, 3, Duration::from_millis(1))
        .with_validity_timeout(Duration::from_secs(1));

    assert_eq!(cache.validity_timeout(), Duration::from_secs(1));
    assert_eq!(cache.backoff(), Duration::from_millis(1));
    assert!(format!("{:?}", cache).contains("max_retries: 3"));
}
