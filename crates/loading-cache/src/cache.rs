use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{Identity, KeyMapper};
use crate::loader::Loader;
use crate::store::{Claim, Slot, Store, fault, wait};

type CacheStore<K, L, M> =
    Store<<M as KeyMapper<K>>::Key, <L as Loader<K>>::Value, <L as Loader<K>>::Error>;

/// An in-memory cache for async computations, with request coalescing.
///
/// The cache is constructed from a [`KeyMapper`] that derives the cache key of each request key,
/// and a [`Loader`] that computes missing values. For every cache key, the loader runs at most
/// once at a time, no matter how many callers ask for the key concurrently: the first caller to
/// miss spawns the computation, and everyone else waits for it to complete. Once a value has
/// been loaded it is served from memory for the lifetime of the cache.
///
/// Computations are spawned onto the Tokio runtime and run to completion even when every caller
/// waiting for them has given up. [`get`](Self::get) must therefore be called from within a
/// Tokio runtime.
///
/// Clones share the same underlying cache, so the usual way to use this is to create one cache
/// at startup and hand clones to everything that needs it.
pub struct LoadingCache<K, L, M = Identity>
where
    L: Loader<K>,
    M: KeyMapper<K>,
{
    mapper: Arc<M>,
    loader: Arc<L>,
    store: Arc<CacheStore<K, L, M>>,
    _request: PhantomData<fn(K)>,
}

impl<K, L> LoadingCache<K, L>
where
    L: Loader<K>,
    Identity: KeyMapper<K>,
{
    /// Creates a cache that uses request keys as cache keys.
    pub fn identity(loader: L) -> Self {
        Self::new(Identity, loader)
    }
}

impl<K, L, M> LoadingCache<K, L, M>
where
    L: Loader<K>,
    M: KeyMapper<K>,
{
    /// Creates a new cache with the default [`CacheConfig`].
    pub fn new(mapper: M, loader: L) -> Self {
        Self::with_config(CacheConfig::default(), mapper, loader)
    }

    /// Creates a new cache.
    pub fn with_config(config: CacheConfig, mapper: M, loader: L) -> Self {
        Self {
            mapper: Arc::new(mapper),
            loader: Arc::new(loader),
            store: Arc::new(Store::new(config)),
            _request: PhantomData,
        }
    }

    /// The name of this cache, as configured.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// The number of keys that are loaded, being loaded, or remembered as failed.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether nothing has been requested from this cache yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value for `key` if it has already been loaded, without ever loading it.
    pub fn peek(&self, key: &K) -> Option<L::Value> {
        self.store.peek(&self.mapper.cache_key(key))
    }

    /// Gets the value for `key`, loading it if necessary.
    ///
    /// All callers waiting on the same computation receive the same outcome. A failed load is not
    /// cached (unless configured otherwise), so the next call with the same key loads again.
    pub async fn get(&self, key: K) -> Result<L::Value, CacheError<L::Error>> {
        let cache_key = self.mapper.cache_key(&key);

        let computation = match self.store.begin(cache_key) {
            Slot::Done(outcome) => return outcome,
            Slot::Follow(computation) => computation,
            Slot::Lead(claim) => {
                let computation = claim.computation();
                self.spawn_load(claim, key);
                computation
            }
        };

        wait(computation).await
    }

    /// Like [`get`](Self::get), but stops waiting after `timeout`.
    ///
    /// Timing out only affects this caller. The computation keeps running, and its value will be
    /// cached as usual.
    pub async fn get_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> Result<L::Value, CacheError<L::Error>> {
        tokio::time::timeout(timeout, self.get(key))
            .await
            .unwrap_or(Err(CacheError::TimedOut(timeout)))
    }

    /// Starts the loader and spawns its computation.
    fn spawn_load(&self, claim: Claim<M::Key, L::Value, L::Error>, key: K) {
        let name = claim.name().to_owned();
        tracing::debug!(cache = %name, "Loading cache item");

        let load = match catch_unwind(AssertUnwindSafe(|| self.loader.load(key))) {
            Ok(load) => load,
            Err(panic) => return claim.complete(fault(&name, panic)),
        };

        let span = tracing::debug_span!("load", cache = %name);
        let task = async move {
            metric!(counter("caches.computation") += 1, "cache" => &name);
            let start = Instant::now();

            let outcome = match AssertUnwindSafe(load).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    tracing::debug!(
                        error = &err as &dyn std::error::Error,
                        "Failed to load cache item"
                    );
                    metric!(counter("caches.computation.failed") += 1, "cache" => &name);
                    Err(CacheError::Loader(Arc::new(err)))
                }
                Err(panic) => fault(&name, panic),
            };

            metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => &name);
            claim.complete(outcome);
        };

        tokio::spawn(task.instrument(span));
    }
}

impl<K, L, M> Clone for LoadingCache<K, L, M>
where
    L: Loader<K>,
    M: KeyMapper<K>,
{
    fn clone(&self) -> Self {
        Self {
            mapper: Arc::clone(&self.mapper),
            loader: Arc::clone(&self.loader),
            store: Arc::clone(&self.store),
            _request: PhantomData,
        }
    }
}

impl<K, L, M> fmt::Debug for LoadingCache<K, L, M>
where
    L: Loader<K>,
    M: KeyMapper<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("name", &self.name())
            .field("entries", &self.len())
            .finish()
    }
}
