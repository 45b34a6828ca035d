//! Promises: the producing side of a future.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{Error, ErrorKind, Result};
use crate::future::future::Future;
use crate::future::shared_state::SharedState;

/// Write-once producer of a value or an error.
///
/// A promise hands out a single [`Future`]. Dropping a promise whose result
/// was never set breaks it: the future becomes ready with a
/// `BrokenPromise` error instead of waiting forever.
///
/// # Example
///
/// ```ignore
/// let promise = Promise::new();
/// let future = promise.get_future()?;
/// filament::spawn(move || promise.set_value(42))?;
/// assert_eq!(future.get()?, 42);
/// ```
pub struct Promise<T> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T> Promise<T> {
    /// Creates a promise with a fresh shared state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Some(SharedState::new()),
        }
    }

    /// Moves the shared state into a new promise, leaving `self`
    /// uninitialized.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            state: self.state.take(),
        }
    }

    /// Returns true if the promise still owns a shared state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&Arc<SharedState<T>>> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::PromiseUninitialized))
    }

    /// Returns the future bound to this promise.
    ///
    /// # Errors
    ///
    /// `FutureAlreadyRetrieved` on a second call, `PromiseUninitialized`
    /// if the promise was moved from.
    pub fn get_future(&self) -> Result<Future<T>> {
        let state = self.state()?;
        state.retrieve()?;
        Ok(Future::from_state(Arc::clone(state)))
    }

    /// Stores a value and wakes everyone waiting on the future.
    ///
    /// # Errors
    ///
    /// `PromiseAlreadySatisfied` if a result is already set,
    /// `PromiseUninitialized` if the promise was moved from.
    pub fn set_value(&self, value: T) -> Result<()> {
        self.state()?.set(Ok(value))
    }

    /// Stores an error, re-raised by the future's `get`.
    ///
    /// # Errors
    ///
    /// As [`set_value`](Self::set_value).
    pub fn set_exception(&self, error: Error) -> Result<()> {
        self.state()?.set(Err(error))
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Registers a callback run the first time anyone waits on the future,
    /// before the waiter blocks. The callback may satisfy the promise
    /// through the [`Completer`] it receives, making the result lazy.
    ///
    /// # Errors
    ///
    /// `PromiseUninitialized` if the promise was moved from.
    pub fn set_wait_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Completer<T>) + Send + 'static,
    {
        let state = self.state()?;
        let completer = Completer {
            state: Arc::downgrade(state),
        };
        state.set_callback(Box::new(move || callback(&completer)));
        Ok(())
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state)
            .finish()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.abandon();
        }
    }
}

/// Handle passed to a promise's wait callback for satisfying it.
pub struct Completer<T> {
    state: Weak<SharedState<T>>,
}

impl<T> Completer<T> {
    fn state(&self) -> Result<Arc<SharedState<T>>> {
        self.state
            .upgrade()
            .ok_or_else(|| Error::new(ErrorKind::PromiseUninitialized))
    }

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// As [`Promise::set_value`].
    pub fn set_value(&self, value: T) -> Result<()> {
        self.state()?.set(Ok(value))
    }

    /// Stores an error.
    ///
    /// # Errors
    ///
    /// As [`Promise::set_value`].
    pub fn set_exception(&self, error: Error) -> Result<()> {
        self.state()?.set(Err(error))
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}
