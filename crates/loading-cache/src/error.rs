use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error returned by a cache lookup.
///
/// [`Loader`](Self::Loader) and [`Fault`](Self::Fault) describe the outcome of a computation and
/// are delivered to every caller that waited on it. [`Interrupted`](Self::Interrupted) and
/// [`TimedOut`](Self::TimedOut) only concern the wait of a single caller.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The loader failed with a domain error.
    #[error(transparent)]
    Loader(Arc<E>),
    /// The computation went away without producing a result, for example because its task was
    /// aborted during runtime shutdown.
    #[error("interrupted while loading cache item")]
    Interrupted,
    /// The caller stopped waiting for the computation, which keeps running in the background.
    #[error("timed out after {0:?} waiting for cache item")]
    TimedOut(Duration),
    /// The loader panicked.
    #[error("unable to load cache item")]
    Fault(#[source] LoaderFault),
}

impl<E> CacheError<E> {
    /// Returns the domain error of the loader, if that is what failed.
    pub fn loader_error(&self) -> Option<&E> {
        match self {
            Self::Loader(err) => Some(&**err),
            _ => None,
        }
    }

    /// Whether this error describes the wait of the caller, rather than the computation.
    pub fn is_wait_error(&self) -> bool {
        matches!(self, Self::Interrupted | Self::TimedOut(_))
    }
}

// Not derived, as that would require `E: Clone`.
impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Loader(err) => Self::Loader(Arc::clone(err)),
            Self::Interrupted => Self::Interrupted,
            Self::TimedOut(duration) => Self::TimedOut(*duration),
            Self::Fault(fault) => Self::Fault(fault.clone()),
        }
    }
}

/// A panic raised by a loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("loader panicked: {message}")]
pub struct LoaderFault {
    message: String,
}

impl LoaderFault {
    /// Extracts the message of a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast_ref::<&'static str>() {
                Some(message) => (*message).to_owned(),
                None => "Box<dyn Any>".to_owned(),
            },
        };
        Self { message }
    }

    /// The panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
