//! Future handles: the consuming side of a shared state.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::future::shared_state::SharedState;
use crate::waitable::Waitable;

/// Anything [`waitfor_any`](crate::future::waitfor_any) and
/// [`waitfor_all`](crate::future::waitfor_all) can wait on.
///
/// Object safe, so differently typed futures can be mixed in one
/// `&[&dyn Awaitable]`.
pub trait Awaitable {
    /// Returns true once the result is available.
    fn is_ready(&self) -> bool;

    /// Blocks the caller until the result is available.
    ///
    /// # Errors
    ///
    /// `FutureUninitialized` on an invalid handle, `Interrupted` if the
    /// calling fiber is interrupted while blocked.
    fn wait(&self) -> Result<()>;

    /// Registers `waiter` to be signalled when the result becomes
    /// available. Returns `Ok(false)`, registering nothing, if it already is.
    ///
    /// # Errors
    ///
    /// `FutureUninitialized` on an invalid handle.
    fn attach(&self, waiter: &Arc<dyn Waitable>) -> Result<bool>;

    /// Removes a registration made by [`attach`](Self::attach).
    fn detach(&self, waiter: &Arc<dyn Waitable>);
}

impl<A: Awaitable + ?Sized> Awaitable for &A {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn wait(&self) -> Result<()> {
        (**self).wait()
    }

    fn attach(&self, waiter: &Arc<dyn Waitable>) -> Result<bool> {
        (**self).attach(waiter)
    }

    fn detach(&self, waiter: &Arc<dyn Waitable>) {
        (**self).detach(waiter);
    }
}

fn uninitialized() -> Error {
    Error::new(ErrorKind::FutureUninitialized)
}

/// Unique handle to the result of a [`Promise`](crate::future::Promise) or
/// [`PackagedTask`](crate::future::PackagedTask).
///
/// [`get`](Self::get) copies the result and may be repeated;
/// [`take`](Self::take) moves it out and invalidates the handle. Use
/// [`share`](Self::share) for a cloneable handle.
pub struct Future<T> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T> Future<T> {
    pub(crate) fn from_state(state: Arc<SharedState<T>>) -> Self {
        Self { state: Some(state) }
    }

    fn state(&self) -> Result<&Arc<SharedState<T>>> {
        self.state.as_ref().ok_or_else(uninitialized)
    }

    /// Returns true if the handle refers to a shared state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Returns true once a value or an error is stored.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_ready())
    }

    /// Returns true if a value is stored.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.has_value())
    }

    /// Returns true if an error is stored.
    #[must_use]
    pub fn has_exception(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.has_exception())
    }

    /// Blocks until the result is available, without consuming it.
    ///
    /// # Errors
    ///
    /// `FutureUninitialized` on an invalid handle, `Interrupted` if the
    /// calling fiber is interrupted while blocked.
    pub fn wait(&self) -> Result<()> {
        self.state()?.wait()
    }

    /// Blocks until the result is available and moves it out, for results
    /// that cannot be copied. Afterwards the handle is invalid.
    ///
    /// # Errors
    ///
    /// The stored error, if the producer set one or was dropped unsatisfied.
    /// Otherwise as [`wait`](Self::wait); an interrupted `take` leaves the
    /// handle valid.
    pub fn take(&mut self) -> Result<T> {
        self.wait()?;
        let state = self.state.take().ok_or_else(uninitialized)?;
        state.take()
    }

    /// Converts into a cloneable [`SharedFuture`].
    #[must_use]
    pub fn share(self) -> SharedFuture<T> {
        SharedFuture { state: self.state }
    }
}

impl<T: Clone> Future<T> {
    /// Blocks until the result is available and returns a copy of it.
    ///
    /// The handle stays valid: later calls to `get` or [`wait`](Self::wait)
    /// return at once with the same outcome.
    ///
    /// # Errors
    ///
    /// The stored error, if the producer set one or was dropped unsatisfied.
    /// Otherwise as [`wait`](Self::wait).
    pub fn get(&self) -> Result<T> {
        self.state()?.get()
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.state)
            .finish()
    }
}

impl<T> Awaitable for Future<T> {
    fn is_ready(&self) -> bool {
        Self::is_ready(self)
    }

    fn wait(&self) -> Result<()> {
        Self::wait(self)
    }

    fn attach(&self, waiter: &Arc<dyn Waitable>) -> Result<bool> {
        Ok(self.state()?.attach(waiter))
    }

    fn detach(&self, waiter: &Arc<dyn Waitable>) {
        if let Some(state) = &self.state {
            state.detach(waiter);
        }
    }
}

/// Cloneable handle to a shared state. Every clone observes the same
/// result and becomes ready at the same time.
pub struct SharedFuture<T> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T> SharedFuture<T> {
    fn state(&self) -> Result<&Arc<SharedState<T>>> {
        self.state.as_ref().ok_or_else(uninitialized)
    }

    /// Returns true if the handle refers to a shared state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Returns true once a value or an error is stored.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_ready())
    }

    /// Returns true if a value is stored.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.has_value())
    }

    /// Returns true if an error is stored.
    #[must_use]
    pub fn has_exception(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.has_exception())
    }

    /// Blocks until the result is available.
    ///
    /// # Errors
    ///
    /// As [`Future::wait`].
    pub fn wait(&self) -> Result<()> {
        self.state()?.wait()
    }
}

impl<T: Clone> SharedFuture<T> {
    /// Blocks until the result is available and returns a copy of it. May
    /// be called any number of times, from any clone.
    ///
    /// # Errors
    ///
    /// The stored error, or as [`Future::wait`].
    pub fn get(&self) -> Result<T> {
        self.state()?.get()
    }
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for SharedFuture<T> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<T> From<Future<T>> for SharedFuture<T> {
    fn from(future: Future<T>) -> Self {
        future.share()
    }
}

impl<T> fmt::Debug for SharedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFuture")
            .field("state", &self.state)
            .finish()
    }
}

impl<T> Awaitable for SharedFuture<T> {
    fn is_ready(&self) -> bool {
        Self::is_ready(self)
    }

    fn wait(&self) -> Result<()> {
        Self::wait(self)
    }

    fn attach(&self, waiter: &Arc<dyn Waitable>) -> Result<bool> {
        Ok(self.state()?.attach(waiter))
    }

    fn detach(&self, waiter: &Arc<dyn Waitable>) {
        if let Some(state) = &self.state {
            state.detach(waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Promise;
    use crate::test_utils::{init_test_logging, run_on_scheduler};
    use crate::{spawn, this_fiber};

    #[test]
    fn default_future_is_invalid() {
        init_test_logging();
        let mut future = Future::<u32>::default();
        assert!(!future.valid());
        assert!(!future.is_ready());
        assert_eq!(
            future.wait().expect_err("invalid").kind(),
            ErrorKind::FutureUninitialized
        );
        assert_eq!(
            future.get().expect_err("invalid").kind(),
            ErrorKind::FutureUninitialized
        );
        assert_eq!(
            future.take().expect_err("invalid").kind(),
            ErrorKind::FutureUninitialized
        );
        let shared = future.share();
        assert!(!shared.valid());
    }

    #[test]
    fn get_in_main_context_runs_producer_fiber() {
        init_test_logging();
        run_on_scheduler(|_| {
            let promise = Promise::new();
            let future = promise.get_future().expect("future");
            let mut producer = spawn(move || {
                this_fiber::yield_now()?;
                promise.set_value(String::from("done"))
            })
            .expect("spawn");
            producer.detach();
            assert_eq!(future.get().expect("value"), "done");
        });
    }

    #[test]
    fn fiber_blocks_on_future_until_set() {
        init_test_logging();
        run_on_scheduler(|_| {
            let promise = Promise::new();
            let future = promise.get_future().expect("future");
            let consumer = spawn(move || {
                assert_eq!(future.get()?, 7);
                Ok(())
            })
            .expect("spawn");
            this_fiber::yield_now().expect("consumer blocks");
            assert!(!consumer.is_finished());
            promise.set_value(7).expect("set");
            consumer.join().expect("join");
        });
    }

    #[test]
    fn shared_clones_see_same_result() {
        init_test_logging();
        run_on_scheduler(|_| {
            let promise = Promise::new();
            let shared = promise.get_future().expect("future").share();
            let readers: Vec<_> = (0..3)
                .map(|_| {
                    let copy = shared.clone();
                    spawn(move || {
                        assert_eq!(copy.get()?, vec![1, 2]);
                        Ok(())
                    })
                    .expect("spawn")
                })
                .collect();
            this_fiber::yield_now().expect("readers block");
            assert!(readers.iter().all(|r| !r.is_finished()));
            promise.set_value(vec![1, 2]).expect("set");
            for reader in readers {
                reader.join().expect("join");
            }
            assert_eq!(shared.get().expect("still readable"), vec![1, 2]);
        });
    }

    #[test]
    fn interrupted_get_keeps_future_valid() {
        init_test_logging();
        run_on_scheduler(|_| {
            let promise = Promise::<u8>::new();
            let future = promise.get_future().expect("future");
            let shared = future.share();
            let copy = shared.clone();
            let consumer = spawn(move || copy.get().map(drop)).expect("spawn");
            this_fiber::yield_now().expect("consumer blocks");
            consumer.interrupt();
            let err = consumer.join().expect_err("interrupted");
            assert_eq!(err.kind(), ErrorKind::Interrupted);
            assert!(shared.valid());
            promise.set_value(1).expect("set");
            assert_eq!(shared.get().expect("value"), 1);
        });
    }

    #[test]
    fn get_repeats_and_wait_after_get_returns() {
        init_test_logging();
        crate::test_phase!("get_repeats_and_wait_after_get_returns");
        let promise = Promise::new();
        let future = promise.get_future().expect("future");
        promise.set_value(42).expect("set");
        assert_eq!(future.get().expect("first"), 42);
        assert_eq!(future.get().expect("second"), 42);
        future.wait().expect("wait after get");
        future.wait().expect("wait again");
        assert!(future.valid());
        assert!(future.has_value());
        crate::test_complete!("get_repeats_and_wait_after_get_returns");
    }

    #[test]
    fn stored_error_is_raised_on_every_get() {
        init_test_logging();
        let promise = Promise::<u32>::new();
        let future = promise.get_future().expect("future");
        promise
            .set_exception(Error::new(ErrorKind::User).with_message("refused"))
            .expect("set");
        for _ in 0..2 {
            let err = future.get().expect_err("stored error");
            assert_eq!(err.kind(), ErrorKind::User);
            assert_eq!(err.message(), Some("refused"));
        }
        future.wait().expect("ready");
        assert!(future.has_exception());
    }

    #[test]
    fn take_moves_result_out_once() {
        init_test_logging();
        #[derive(Debug)]
        struct Token(u8);

        let promise = Promise::new();
        let mut future = promise.get_future().expect("future");
        promise.set_value(Token(3)).expect("set");
        assert_eq!(future.take().expect("value").0, 3);
        assert!(!future.valid());
        let err = future.take().expect_err("consumed");
        assert_eq!(err.kind(), ErrorKind::FutureUninitialized);
    }
}
