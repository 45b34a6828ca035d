//! The write-once result slot behind promises, packaged tasks and futures.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::runtime;
use crate::tracing_compat::trace;
use crate::waitable::{same_waitable, Defer, Waitable};

/// Callback run the first time anyone waits on a shared state.
pub(crate) type WaitCallback = Box<dyn FnOnce() + Send + 'static>;

struct Inner<T> {
    /// `Some` once satisfied, until a unique future takes the value.
    result: Option<Result<T>>,
    ready: bool,
    retrieved: bool,
    waiters: Vec<Arc<dyn Waitable>>,
    callback: Option<WaitCallback>,
}

/// Shared state connecting one producer to its future(s).
///
/// Transitions exactly once from waiting to ready. Waiters register a
/// [`Waitable`] and are all woken by the transition.
pub(crate) struct SharedState<T> {
    inner: spin::Mutex<Inner<T>>,
}

impl<T> SharedState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: spin::Mutex::new(Inner {
                result: None,
                ready: false,
                retrieved: false,
                waiters: Vec::new(),
                callback: None,
            }),
        })
    }

    /// Marks the state as handed to a future.
    pub(crate) fn retrieve(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.retrieved {
            return Err(Error::new(ErrorKind::FutureAlreadyRetrieved));
        }
        inner.retrieved = true;
        Ok(())
    }

    /// Stores the result and wakes every waiter.
    pub(crate) fn set(&self, result: Result<T>) -> Result<()> {
        let (waiters, callback) = {
            let mut inner = self.inner.lock();
            if inner.ready {
                return Err(Error::new(ErrorKind::PromiseAlreadySatisfied));
            }
            inner.result = Some(result);
            inner.ready = true;
            (std::mem::take(&mut inner.waiters), inner.callback.take())
        };
        drop(callback);
        trace!(waiters = waiters.len(), "shared state satisfied");
        for waiter in waiters {
            waiter.set_ready();
        }
        Ok(())
    }

    /// Stores a broken-promise error unless a result is already there.
    pub(crate) fn abandon(&self) {
        if self.set(Err(Error::broken_promise())).is_ok() {
            trace!("producer dropped, promise broken");
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    pub(crate) fn has_value(&self) -> bool {
        matches!(self.inner.lock().result, Some(Ok(_)))
    }

    pub(crate) fn has_exception(&self) -> bool {
        matches!(self.inner.lock().result, Some(Err(_)))
    }

    /// Installs the wait callback, replacing any earlier one. Ignored once
    /// the state is ready.
    pub(crate) fn set_callback(&self, callback: WaitCallback) {
        let replaced = {
            let mut inner = self.inner.lock();
            if inner.ready {
                return;
            }
            inner.callback.replace(callback)
        };
        drop(replaced);
    }

    /// Runs the wait callback if it has not run yet. It runs at most once
    /// per shared state, whichever handle waits first.
    fn fire_callback(&self) {
        let callback = self.inner.lock().callback.take();
        if let Some(callback) = callback {
            trace!("running wait callback");
            callback();
        }
    }

    /// Registers `waiter` unless the state is already ready. Returns whether
    /// it was registered.
    pub(crate) fn attach(&self, waiter: &Arc<dyn Waitable>) -> bool {
        self.fire_callback();
        let mut inner = self.inner.lock();
        if inner.ready {
            return false;
        }
        inner.waiters.push(Arc::clone(waiter));
        true
    }

    pub(crate) fn detach(&self, waiter: &Arc<dyn Waitable>) {
        self.inner
            .lock()
            .waiters
            .retain(|w| !same_waitable(w, waiter));
    }

    /// Blocks the caller until the state is ready. An interruption point
    /// while blocked.
    pub(crate) fn wait(&self) -> Result<()> {
        self.fire_callback();
        loop {
            if self.is_ready() {
                return Ok(());
            }
            runtime::check_interruption()?;
            let waiter = runtime::notifier()?;
            let mut inner = self.inner.lock();
            if inner.ready {
                return Ok(());
            }
            inner.waiters.push(Arc::clone(&waiter));
            let _registered = Defer::new(|| self.detach(&waiter));
            runtime::wait(Box::new(inner))?;
        }
    }

    /// Waits, then moves the result out.
    pub(crate) fn take(&self) -> Result<T> {
        self.wait()?;
        self.inner
            .lock()
            .result
            .take()
            .unwrap_or_else(|| Err(Error::new(ErrorKind::FutureUninitialized)))
    }
}

impl<T: Clone> SharedState<T> {
    /// Waits, then clones the result.
    pub(crate) fn get(&self) -> Result<T> {
        self.wait()?;
        self.inner
            .lock()
            .result
            .clone()
            .unwrap_or_else(|| Err(Error::new(ErrorKind::FutureUninitialized)))
    }
}

impl<T> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedState")
            .field("ready", &inner.ready)
            .field("retrieved", &inner.retrieved)
            .field("waiters", &inner.waiters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Hits(AtomicUsize);

    impl Waitable for Hits {
        fn is_ready(&self) -> bool {
            self.0.load(Ordering::SeqCst) > 0
        }

        fn set_ready(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn set_once_then_already_satisfied() {
        let state = SharedState::new();
        state.set(Ok(1)).expect("first");
        let err = state.set(Ok(2)).expect_err("second");
        assert_eq!(err.kind(), ErrorKind::PromiseAlreadySatisfied);
        assert_eq!(state.take().expect("value"), 1);
    }

    #[test]
    fn retrieve_twice_fails() {
        let state = SharedState::<()>::new();
        state.retrieve().expect("first");
        let err = state.retrieve().expect_err("second");
        assert_eq!(err.kind(), ErrorKind::FutureAlreadyRetrieved);
    }

    #[test]
    fn set_wakes_attached_waiters_once() {
        let state = SharedState::new();
        let hits = Arc::new(Hits::default());
        let waiter: Arc<dyn Waitable> = hits.clone();
        assert!(state.attach(&waiter));
        state.set(Ok(())).expect("set");
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
        assert!(!state.attach(&waiter));
    }

    #[test]
    fn detach_prevents_wake() {
        let state = SharedState::new();
        let hits = Arc::new(Hits::default());
        let waiter: Arc<dyn Waitable> = hits.clone();
        assert!(state.attach(&waiter));
        state.detach(&waiter);
        state.set(Ok(())).expect("set");
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn abandon_breaks_only_unsatisfied_state() {
        let broken = SharedState::<u8>::new();
        broken.abandon();
        assert!(broken.has_exception());
        assert!(broken.take().expect_err("broken").is_broken_promise());

        let kept = SharedState::new();
        kept.set(Ok(3_u8)).expect("set");
        kept.abandon();
        assert!(kept.has_value());
    }

    #[test]
    fn callback_fires_once_and_can_satisfy() {
        let state = SharedState::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let target = Arc::downgrade(&state);
        state.set_callback(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(state) = target.upgrade() {
                state.set(Ok(9)).expect("set from callback");
            }
        }));
        assert_eq!(state.get().expect("value"), 9);
        assert_eq!(state.get().expect("value"), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
