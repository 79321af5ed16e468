use std::sync::Arc;
use std::time::Duration;

use loading_cache::{CacheConfig, CacheError, Identity, LoadingCache};
use loading_cache_test::{self as test, LoadFailed};

async fn load(key: &'static str) -> Result<String, LoadFailed> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    match key {
        "bad" => Err(LoadFailed(key.into())),
        "panic" => panic!("loader exploded on {key}"),
        _ => Ok(key.to_uppercase()),
    }
}

/// A failure is delivered to everyone, but not remembered.
#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    test::setup();

    let (loader, calls) = test::counted(load);
    let cache: LoadingCache<&'static str, _> = LoadingCache::identity(loader);

    let first = cache.get("bad").await.unwrap_err();
    let second = cache.get("bad").await.unwrap_err();

    assert_eq!(calls.get(), 2);
    assert_eq!(first.loader_error(), Some(&LoadFailed("bad".into())));
    assert_eq!(second.loader_error(), Some(&LoadFailed("bad".into())));
    assert!(!first.is_wait_error());
    assert!(cache.is_empty());

    // a failing key does not interfere with others
    assert_eq!(cache.get("good").await.unwrap(), "GOOD");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_are_shared() {
    test::setup();

    let (loader, calls) = test::counted(load);
    let cache: LoadingCache<&'static str, _> = LoadingCache::identity(loader);

    let results = futures::future::join_all((0..10).map(|_| cache.get("bad"))).await;
    assert_eq!(calls.get(), 1);

    let errors: Vec<_> = results.into_iter().map(Result::unwrap_err).collect();
    for err in &errors {
        match (err, &errors[0]) {
            (CacheError::Loader(err), CacheError::Loader(first)) => {
                assert!(Arc::ptr_eq(err, first));
            }
            other => panic!("unexpected errors: {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_cached_when_configured() {
    test::setup();

    let config = CacheConfig {
        name: "negative".into(),
        retry_failures_after: Some(Duration::from_secs(60)),
    };
    let (loader, calls) = test::counted(load);
    let cache = LoadingCache::with_config(config, Identity, loader);
    assert_eq!(cache.name(), "negative");

    cache.get("bad").await.unwrap_err();
    tokio::time::advance(Duration::from_secs(30)).await;
    let err = cache.get("bad").await.unwrap_err();
    assert_eq!(err.loader_error(), Some(&LoadFailed("bad".into())));
    assert_eq!(calls.get(), 1);
    assert_eq!(cache.len(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    cache.get("bad").await.unwrap_err();
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failures_cached_for_unbounded_time() {
    test::setup();

    let config = CacheConfig {
        retry_failures_after: Some(Duration::from_secs(u64::MAX)),
        ..Default::default()
    };
    let (loader, calls) = test::counted(load);
    let cache = LoadingCache::with_config(config, Identity, loader);

    let (first, second) = futures::future::join(cache.get("bad"), cache.get("bad")).await;
    for err in [first.unwrap_err(), second.unwrap_err()] {
        assert_eq!(err.loader_error(), Some(&LoadFailed("bad".into())));
    }

    let err = cache.get("bad").await.unwrap_err();
    assert_eq!(err.loader_error(), Some(&LoadFailed("bad".into())));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panics_are_faults() {
    test::setup();

    let (loader, calls) = test::counted(load);
    let config = CacheConfig {
        retry_failures_after: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let cache = LoadingCache::with_config(config, Identity, loader);

    let results = futures::future::join_all((0..3).map(|_| cache.get("panic"))).await;
    assert_eq!(calls.get(), 1);
    for result in results {
        match result {
            Err(CacheError::Fault(fault)) => {
                assert_eq!(fault.message(), "loader exploded on panic");
            }
            other => panic!("expected a fault, got {other:?}"),
        }
    }

    // faults are never cached
    assert!(cache.is_empty());
    assert!(matches!(
        cache.get("panic").await,
        Err(CacheError::Fault(_))
    ));
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_eager_panics_are_faults() {
    test::setup();

    let loader = |key: u32| {
        if key == 0 {
            panic!("cannot load zero");
        }
        async move { Ok::<_, LoadFailed>(key) }
    };
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    let err = cache.get(0).await.unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"unable to load cache item");
    assert!(matches!(err, CacheError::Fault(fault) if fault.message() == "cannot load zero"));

    assert!(cache.is_empty());
    assert_eq!(cache.get(1).await.unwrap(), 1);
}

/// Tearing down the computation interrupts everyone waiting for it.
#[tokio::test]
async fn test_runtime_shutdown_interrupts_waiters() {
    test::setup();

    let (loader, calls) = test::counted(|_key: u32| {
        futures::future::pending::<Result<u32, LoadFailed>>()
    });
    let cache: LoadingCache<u32, _> = LoadingCache::identity(loader);

    // the computation gets spawned onto the runtime of the winner
    let other = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let _winner = other.spawn({
        let cache = cache.clone();
        async move { cache.get(1).await }
    });
    while calls.get() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // subscribe to the running computation before tearing it down
    let mut follower = Box::pin(cache.get(1));
    assert!(futures::poll!(&mut follower).is_pending());

    other.shutdown_background();

    let result = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, CacheError::Interrupted));
    assert!(err.is_wait_error());
    assert!(cache.is_empty());
}
