use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{Identity, KeyMapper};
use crate::loader::BlockingLoader;
use crate::store::{Claim, Outcome, Slot, Store, fault, wait};

type CacheStore<K, L, M> = Store<
    <M as KeyMapper<K>>::Key,
    <L as BlockingLoader<K>>::Value,
    <L as BlockingLoader<K>>::Error,
>;

/// The thread-blocking counterpart to [`LoadingCache`](crate::LoadingCache).
///
/// The first caller to miss a key runs the [`BlockingLoader`] on its own thread. Every other
/// thread asking for the same key in the meantime is blocked until that load is done, while
/// threads asking for other keys are not affected at all.
///
/// This must not be used from within async code, as waiting blocks the current thread.
pub struct BlockingLoadingCache<K, L, M = Identity>
where
    L: BlockingLoader<K>,
    M: KeyMapper<K>,
{
    mapper: Arc<M>,
    loader: Arc<L>,
    store: Arc<CacheStore<K, L, M>>,
    _request: PhantomData<fn(K)>,
}

impl<K, L> BlockingLoadingCache<K, L>
where
    L: BlockingLoader<K>,
    Identity: KeyMapper<K>,
{
    /// Creates a cache that uses request keys as cache keys.
    pub fn identity(loader: L) -> Self {
        Self::new(Identity, loader)
    }
}

impl<K, L, M> BlockingLoadingCache<K, L, M>
where
    L: BlockingLoader<K>,
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

    /// Gets the value for `key`, loading it on the current thread if necessary.
    ///
    /// Blocks while another thread is loading the same key.
    pub fn get(&self, key: K) -> Result<L::Value, CacheError<L::Error>> {
        let cache_key = self.mapper.cache_key(&key);

        match self.store.begin(cache_key) {
            Slot::Done(outcome) => outcome,
            Slot::Follow(computation) => futures::executor::block_on(wait(computation)),
            Slot::Lead(claim) => {
                let outcome = self.load(&claim, key);
                claim.complete(outcome.clone());
                outcome
            }
        }
    }

    fn load(
        &self,
        claim: &Claim<M::Key, L::Value, L::Error>,
        key: K,
    ) -> Outcome<L::Value, L::Error> {
        let name = claim.name();
        let _span = tracing::debug_span!("load", cache = name).entered();
        tracing::debug!("Loading cache item");
        metric!(counter("caches.computation") += 1, "cache" => name);
        let start = Instant::now();

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.loader.load(key))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    "Failed to load cache item"
                );
                metric!(counter("caches.computation.failed") += 1, "cache" => name);
                Err(CacheError::Loader(Arc::new(err)))
            }
            Err(panic) => fault(name, panic),
        };

        metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name);
        outcome
    }
}

impl<K, L, M> Clone for BlockingLoadingCache<K, L, M>
where
    L: BlockingLoader<K>,
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

impl<K, L, M> fmt::Debug for BlockingLoadingCache<K, L, M>
where
    L: BlockingLoader<K>,
    M: KeyMapper<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingLoadingCache")
            .field("name", &self.name())
            .field("entries", &self.len())
            .finish()
    }
}
