use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::{CacheError, LoaderFault};

/// The outcome of a single load, as delivered to every caller waiting on it.
pub(crate) type Outcome<V, E> = Result<V, CacheError<E>>;

/// A load in progress, which every caller racing for the same key awaits.
pub(crate) type Computation<V, E> = Shared<oneshot::Receiver<Outcome<V, E>>>;

/// The contents of a single slot in the [`Store`].
enum Cell<V, E> {
    /// The value is currently being loaded.
    Pending(Computation<V, E>),
    /// The value has been loaded. This is final.
    Ready(V),
    /// Loading failed, and lookups replay the error until `retry_at`, or forever if that is too
    /// far in the future to be represented.
    Failed {
        error: CacheError<E>,
        retry_at: Option<Instant>,
    },
}

/// Whether a remembered failure should still be replayed.
fn is_remembered(retry_at: Option<Instant>) -> bool {
    retry_at.is_none_or(|retry_at| retry_at > Instant::now())
}

/// How a caller takes part in a lookup that missed the fast path.
pub(crate) enum Slot<KK: Eq + Hash, V, E> {
    /// The lookup has already been settled.
    Done(Outcome<V, E>),
    /// Another caller is loading the value, wait for it.
    Follow(Computation<V, E>),
    /// This caller won the race and has to load the value.
    Lead(Claim<KK, V, E>),
}

/// The shared map backing a cache.
pub(crate) struct Store<KK: Eq + Hash, V, E> {
    name: Arc<str>,
    retry_failures_after: Option<Duration>,
    cells: DashMap<KK, Cell<V, E>>,
}

impl<KK, V, E> Store<KK, V, E>
where
    KK: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            name: config.name.into(),
            retry_failures_after: config.retry_failures_after,
            cells: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns the value if it has been loaded already.
    pub fn peek(&self, key: &KK) -> Option<V> {
        match self.cells.get(key).as_deref() {
            Some(Cell::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Looks the key up, and installs a new pending computation if it is missing.
    pub fn begin(self: &Arc<Self>, key: KK) -> Slot<KK, V, E> {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some(outcome) = self.lookup(&key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            tracing::trace!(cache = name, "Serving cache item from memory");
            return Slot::Done(outcome);
        }

        self.install(key)
    }

    /// The slow path of [`begin`](Self::begin).
    ///
    /// This is the only place where new slots are created. The map's entry API makes the
    /// insertion atomic, so exactly one caller per key ends up with [`Slot::Lead`] and all others
    /// follow that caller's computation until it is settled.
    fn install(self: &Arc<Self>, key: KK) -> Slot<KK, V, E> {
        let name = self.name();
        let (sender, receiver) = oneshot::channel();
        let computation = receiver.shared();

        match self.cells.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                match entry.get() {
                    // Another caller settled the key after the fast path missed.
                    Cell::Ready(value) => return Slot::Done(Ok(value.clone())),
                    Cell::Pending(running) => {
                        // A concurrent cache lookup was deduplicated.
                        metric!(counter("caches.channel.hit") += 1, "cache" => name);
                        return Slot::Follow(running.clone());
                    }
                    Cell::Failed { error, retry_at } if is_remembered(*retry_at) => {
                        return Slot::Done(Err(error.clone()));
                    }
                    // The remembered failure has expired, retry.
                    Cell::Failed { .. } => {}
                }
                entry.insert(Cell::Pending(computation.clone()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Cell::Pending(computation.clone()));
            }
        }

        metric!(counter("caches.channel.miss") += 1, "cache" => name);
        Slot::Lead(Claim {
            store: Arc::clone(self),
            key,
            sender: Some(sender),
            computation,
        })
    }

    /// The read-only fast path.
    fn lookup(&self, key: &KK) -> Option<Outcome<V, E>> {
        match self.cells.get(key).as_deref()? {
            Cell::Ready(value) => Some(Ok(value.clone())),
            Cell::Failed { error, retry_at } if is_remembered(*retry_at) => {
                Some(Err(error.clone()))
            }
            _ => None,
        }
    }

    /// Writes the outcome of the computation for `key` back into the map.
    fn settle(&self, key: &KK, outcome: &Outcome<V, E>) {
        match (outcome, self.retry_failures_after) {
            (Ok(value), _) => {
                self.cells.insert(key.clone(), Cell::Ready(value.clone()));
            }
            (Err(error @ CacheError::Loader(_)), Some(retry_after)) => {
                let cell = Cell::Failed {
                    error: error.clone(),
                    retry_at: Instant::now().checked_add(retry_after),
                };
                self.cells.insert(key.clone(), cell);
            }
            (Err(_), _) => self.abandon(key),
        }
    }
}

impl<KK: Eq + Hash, V, E> Store<KK, V, E> {
    /// Removes the pending computation for `key`, so that the next lookup starts over.
    fn abandon(&self, key: &KK) {
        self.cells
            .remove_if(key, |_, cell| matches!(cell, Cell::Pending(_)));
    }
}

/// The exclusive right to load and settle the value of a single key.
///
/// Dropping a claim without [`complete`](Self::complete)-ing it removes the pending computation
/// from the store, and everyone waiting on it observes [`CacheError::Interrupted`].
pub(crate) struct Claim<KK: Eq + Hash, V, E> {
    store: Arc<Store<KK, V, E>>,
    key: KK,
    sender: Option<oneshot::Sender<Outcome<V, E>>>,
    computation: Computation<V, E>,
}

impl<KK, V, E> Claim<KK, V, E>
where
    KK: Eq + Hash + Clone,
    V: Clone,
{
    /// The computation this claim is going to complete.
    pub fn computation(&self) -> Computation<V, E> {
        self.computation.clone()
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Settles the slot and hands the outcome to everyone waiting on the computation.
    pub fn complete(mut self, outcome: Outcome<V, E>) {
        // Settle the map first. This ensures that callers either get a computation that will
        // receive the outcome, or they start a new one.
        self.store.settle(&self.key, &outcome);
        if let Some(sender) = self.sender.take() {
            // nobody waiting is fine
            sender.send(outcome).ok();
        }
    }
}

impl<KK: Eq + Hash, V, E> Drop for Claim<KK, V, E> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::debug!(cache = &*self.store.name, "Cache computation was abandoned");
            self.store.abandon(&self.key);
        }
    }
}

/// Waits for a computation to finish.
pub(crate) async fn wait<V: Clone, E>(computation: Computation<V, E>) -> Outcome<V, E> {
    computation
        .await
        .unwrap_or_else(|_canceled| Err(CacheError::Interrupted))
}

/// Turns a panic of the loader into the outcome of its computation.
pub(crate) fn fault<V, E>(name: &str, panic: Box<dyn Any + Send>) -> Outcome<V, E> {
    let fault = LoaderFault::from_panic(panic);
    tracing::error!(
        error = &fault as &dyn std::error::Error,
        cache = name,
        "Loader panicked"
    );
    metric!(counter("caches.computation.failed") += 1, "cache" => name);
    Err(CacheError::Fault(fault))
}
