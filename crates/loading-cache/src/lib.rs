//! A concurrent, lazily populated loading cache with request coalescing.
//!
//! Concurrent lookups for the same key are collapsed into a single computation: the first caller
//! to miss installs a pending computation into the underlying map, every other caller racing for
//! that key waits on the very same computation, and only the first caller ever writes the
//! finished value back. No lock is held while a value is being loaded, so distinct keys load in
//! parallel.
//!
//! There are two flavours sharing the same store:
//!
//! - [`LoadingCache`] for async [`Loader`]s, whose computations are spawned onto the Tokio
//!   runtime and thus outlive any single waiter.
//! - [`BlockingLoadingCache`] for synchronous [`BlockingLoader`]s, which runs the computation on
//!   the thread of the first caller and blocks the others until it is done.
//!
//! Entries are never evicted. Failed loads are not cached unless
//! [`CacheConfig::retry_failures_after`] says so.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod blocking;
mod cache;
mod config;
mod error;
mod key;
mod loader;
mod store;

pub use blocking::BlockingLoadingCache;
pub use cache::LoadingCache;
pub use config::CacheConfig;
pub use error::{CacheError, LoaderFault};
pub use key::{Identity, KeyMapper};
pub use loader::{BlockingLoader, Loader};
