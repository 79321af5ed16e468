//! Helpers for testing the loading caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Wrap loaders in [`counted`] to assert on how often the cache actually invoked them. The
//!    returned [`Calls`] handle stays valid after the loader has been moved into a cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use loading_cache::{BlockingLoader, Loader};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `loading_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("loading_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The domain error of the test loaders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to load {0}")]
pub struct LoadFailed(pub String);

/// A loader that counts its invocations.
#[derive(Debug)]
pub struct Counted<L> {
    inner: L,
    calls: Calls,
}

/// A shared handle to the number of invocations of a [`Counted`] loader.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    /// The number of times the loader was invoked so far.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps `loader` so that its invocations are counted.
pub fn counted<L>(loader: L) -> (Counted<L>, Calls) {
    let calls = Calls::default();
    let loader = Counted {
        inner: loader,
        calls: calls.clone(),
    };
    (loader, calls)
}

impl<K, L: Loader<K>> Loader<K> for Counted<L> {
    type Value = L::Value;
    type Error = L::Error;
    type Load = L::Load;

    fn load(&self, key: K) -> Self::Load {
        self.calls.increment();
        self.inner.load(key)
    }
}

impl<K, L: BlockingLoader<K>> BlockingLoader<K> for Counted<L> {
    type Value = L::Value;
    type Error = L::Error;

    fn load(&self, key: K) -> Result<Self::Value, Self::Error> {
        self.calls.increment();
        self.inner.load(key)
    }
}
