use std::time::Duration;

use serde::Deserialize;

/// Configuration of a single cache.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The name of the cache, used to tag metrics and log spans.
    pub name: String,

    /// For how long a failed load is remembered.
    ///
    /// While remembered, lookups of the key return the same error without invoking the loader.
    /// By default failures are not cached at all, and every lookup after a failure starts a new
    /// load. Panicking loaders are never cached.
    #[serde(with = "humantime_serde")]
    pub retry_failures_after: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            retry_failures_after: None,
        }
    }
}
