use std::hash::Hash;

/// Derives the canonical cache key from a request key.
///
/// Different request keys that should share one cache entry have to map to equal cache keys.
/// This runs on every lookup, so it should be cheap, and it has to be deterministic for the
/// lifetime of the cache.
///
/// Any `Fn(&K) -> Key` closure is a `KeyMapper`.
pub trait KeyMapper<K> {
    /// The canonical key the cache is indexed by.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    /// Returns the cache key corresponding to `key`.
    fn cache_key(&self, key: &K) -> Self::Key;
}

/// The [`KeyMapper`] for request keys which already are canonical.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<K> KeyMapper<K> for Identity
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    type Key = K;

    fn cache_key(&self, key: &K) -> K {
        key.clone()
    }
}

impl<K, KK, F> KeyMapper<K> for F
where
    F: Fn(&K) -> KK,
    KK: Eq + Hash + Clone + Send + Sync + 'static,
{
    type Key = KK;

    fn cache_key(&self, key: &K) -> KK {
        self(key)
    }
}
