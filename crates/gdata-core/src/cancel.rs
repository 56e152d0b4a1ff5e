//! Cooperative cancellation.
//!
//! A [`Cancellable`] is shared between the caller and every blocking step of
//! an operation. Blocking waits register a handler so that cancelling wakes
//! them immediately instead of at the next poll.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

type Handler = Box<dyn FnOnce() + Send>;

/// Identifies a handler registered with [`Cancellable::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
}

/// A cloneable cancellation token.
#[derive(Clone, Default)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Cancellable {
    /// Creates a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and runs every connected handler once.
    ///
    /// Cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let handlers = match self.inner.handlers.lock() {
            Ok(mut handlers) => std::mem::take(&mut *handlers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (_, handler) in handlers {
            handler();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a `cancelled` error if the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    /// Registers a handler to run when the token is cancelled.
    ///
    /// If the token is already cancelled the handler runs immediately.
    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut handlers = match self.inner.handlers.lock() {
                Ok(handlers) => handlers,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !self.is_cancelled() {
                handlers.push((id, Box::new(handler)));
                return id;
            }
        }
        handler();
        id
    }

    /// Removes a handler that has not run yet.
    pub fn disconnect(&self, id: HandlerId) {
        let mut handlers = match self.inner.handlers.lock() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.retain(|(handler_id, _)| *handler_id != id);
    }
}
