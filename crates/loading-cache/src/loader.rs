use std::future::Future;

/// Performs the expensive computation of a [`LoadingCache`](crate::LoadingCache) entry.
///
/// The cache calls [`load`](Self::load) at most once for each cache key among all concurrent
/// callers, and polls the returned future on a spawned task. A loader must not look up the key
/// it is currently loading from the same cache, as it would end up waiting on itself.
///
/// Any `Fn(K) -> impl Future<Output = Result<V, E>>` closure is a `Loader`.
pub trait Loader<K> {
    /// The loaded value. It is cloned for every caller, so wrap expensive values in an `Arc`.
    type Value: Clone + Send + Sync + 'static;
    /// The domain error of a failed load.
    type Error: std::error::Error + Send + Sync + 'static;
    /// The computation future.
    type Load: Future<Output = Result<Self::Value, Self::Error>> + Send + 'static;

    /// Starts loading the value for `key`.
    fn load(&self, key: K) -> Self::Load;
}

impl<K, F, Fut, V, E> Loader<K> for F
where
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;
    type Load = Fut;

    fn load(&self, key: K) -> Fut {
        self(key)
    }
}

/// The synchronous counterpart to [`Loader`], used by
/// [`BlockingLoadingCache`](crate::BlockingLoadingCache).
///
/// The load runs on the thread of the caller that first missed the key.
///
/// Any `Fn(K) -> Result<V, E>` closure is a `BlockingLoader`.
pub trait BlockingLoader<K> {
    /// The loaded value. It is cloned for every caller, so wrap expensive values in an `Arc`.
    type Value: Clone + Send + Sync + 'static;
    /// The domain error of a failed load.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the value for `key`.
    fn load(&self, key: K) -> Result<Self::Value, Self::Error>;
}

impl<K, F, V, E> BlockingLoader<K> for F
where
    F: Fn(K) -> Result<V, E>,
    V: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn load(&self, key: K) -> Result<V, E> {
        self(key)
    }
}
