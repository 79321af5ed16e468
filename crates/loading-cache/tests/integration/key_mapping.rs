use std::sync::Arc;
use std::time::Duration;

use loading_cache::{CacheConfig, LoadingCache};
use loading_cache_test::{self as test, LoadFailed};

/// A request to copy a file, carrying information that does not affect the result.
#[derive(Debug, Clone)]
struct CopierRequest {
    source: &'static str,
    target: &'static str,
    use_converter: bool,
    requested_by: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CopierKey {
    source: &'static str,
    target: &'static str,
    use_converter: bool,
}

fn copier_key(request: &CopierRequest) -> CopierKey {
    CopierKey {
        source: request.source,
        target: request.target,
        use_converter: request.use_converter,
    }
}

async fn copy(request: CopierRequest) -> Result<Arc<String>, LoadFailed> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mode = if request.use_converter {
        "converted"
    } else {
        "copied"
    };
    Ok(Arc::new(format!(
        "{mode} {} to {} for {}",
        request.source, request.target, request.requested_by
    )))
}

fn request(use_converter: bool, requested_by: &'static str) -> CopierRequest {
    CopierRequest {
        source: "a.txt",
        target: "b.txt",
        use_converter,
        requested_by,
    }
}

/// Requests that only differ in irrelevant parts share a computation.
#[tokio::test(start_paused = true)]
async fn test_requests_share_cache_key() {
    test::setup();

    let (loader, calls) = test::counted(copy);
    let cache = LoadingCache::with_config(CacheConfig::default(), copier_key, loader);

    let (alice, bob) = futures::future::join(
        cache.get(request(false, "alice")),
        cache.get(request(false, "bob")),
    )
    .await;
    let (alice, bob) = (alice.unwrap(), bob.unwrap());

    assert_eq!(calls.get(), 1);
    assert!(Arc::ptr_eq(&alice, &bob));
    // the winning request decides about the value
    assert_eq!(*alice, "copied a.txt to b.txt for alice");

    // later requests are served the same value
    let carol = cache.get(request(false, "carol")).await.unwrap();
    assert!(Arc::ptr_eq(&alice, &carol));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_cache_keys() {
    test::setup();

    let (loader, calls) = test::counted(copy);
    let cache = LoadingCache::new(copier_key, loader);

    let (copied, converted) = futures::future::join(
        cache.get(request(false, "alice")),
        cache.get(request(true, "alice")),
    )
    .await;

    assert_eq!(calls.get(), 2);
    assert_eq!(cache.len(), 2);
    assert_eq!(*copied.unwrap(), "copied a.txt to b.txt for alice");
    assert_eq!(*converted.unwrap(), "converted a.txt to b.txt for alice");

    let peeked = cache.peek(&request(true, "dave")).unwrap();
    assert_eq!(*peeked, "converted a.txt to b.txt for alice");
}
