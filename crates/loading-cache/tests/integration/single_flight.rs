use std::sync::Arc;
use std::time::Duration;

use loading_cache::{CacheError, LoadingCache};
use loading_cache_test::{self as test, LoadFailed};
use tokio::sync::Notify;
use tokio::time::Instant;

async fn double(key: u32) -> Result<u32, LoadFailed> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(key * 2)
}

/// Fifty concurrent lookups of the same key share one computation, and only take as long as
/// that single computation.
#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_load_once() {
    test::setup();

    let (loader, calls) = test::counted(double);
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let start = Instant::now();
    let results = futures::future::join_all((0..50).map(|_| cache.get(5))).await;
    let elapsed = start.elapsed();

    assert_eq!(calls.get(), 1);
    assert_eq!(results.len(), 50);
    for result in results {
        assert_eq!(result.unwrap(), 10);
    }
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_spawned_lookups_load_once() {
    test::setup();

    let (loader, calls) = test::counted(double);
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(5).await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap(), 10);
    }
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_values_are_served_from_memory() {
    test::setup();

    let (loader, calls) = test::counted(double);
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);
    assert!(cache.is_empty());
    assert_eq!(cache.peek(&21), None);

    assert_eq!(cache.get(21).await.unwrap(), 42);

    let start = Instant::now();
    for _ in 0..10 {
        assert_eq!(cache.get(21).await.unwrap(), 42);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    assert_eq!(calls.get(), 1);
    assert_eq!(cache.peek(&21), Some(42));
    assert_eq!(cache.len(), 1);
}

/// A pending load does not hold up lookups of other keys.
#[tokio::test]
async fn test_keys_load_independently() {
    test::setup();

    // key `0` loads until the gate is opened
    let gate = Arc::new(Notify::new());
    let loader = {
        let gate = Arc::clone(&gate);
        move |key: u32| {
            let gate = Arc::clone(&gate);
            async move {
                if key == 0 {
                    gate.notified().await;
                }
                Ok::<_, LoadFailed>(key + 100)
            }
        }
    };
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let slow = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(0).await }
    });
    while cache.is_empty() {
        tokio::task::yield_now().await;
    }

    assert_eq!(cache.get(1).await.unwrap(), 101);
    assert_eq!(cache.peek(&0), None);
    assert!(!slow.is_finished());

    gate.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), 100);
    assert_eq!(cache.peek(&0), Some(100));
}

/// Giving up on the wait does not cancel the computation.
#[tokio::test(start_paused = true)]
async fn test_timed_out_winner_keeps_loading() {
    test::setup();

    let (loader, calls) = test::counted(double);
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let timeout = Duration::from_millis(10);
    let err = cache.get_timeout(1, timeout).await.unwrap_err();
    assert!(matches!(err, CacheError::TimedOut(t) if t == timeout));
    assert!(err.is_wait_error());

    let start = Instant::now();
    assert_eq!(cache.get(1).await.unwrap(), 2);
    // only the remainder of the first load
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(100), "{elapsed:?}");
    assert_eq!(calls.get(), 1);

    assert_eq!(cache.get_timeout(1, timeout).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_winner_keeps_loading() {
    test::setup();

    let (loader, calls) = test::counted(double);
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let winner = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(3).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.get(), 1);

    winner.abort();
    assert!(winner.await.unwrap_err().is_cancelled());

    assert_eq!(cache.get(3).await.unwrap(), 6);
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_debug() {
    test::setup();

    let cache: LoadingCache<u32, _> = LoadingCache::identity(double);
    insta::assert_snapshot!(format!("{cache:?}"), @r#"LoadingCache { name: "default", entries: 0 }"#);
}
