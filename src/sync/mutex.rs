//! Fiber-aware mutex with direct handoff.
//!
//! Blocking in [`Mutex::lock`] suspends the calling fiber instead of the OS
//! thread. Unlocking hands ownership straight to the longest-waiting fiber
//! and marks it ready, so a woken fiber never races a newcomer for the lock.
//!
//! # Example
//!
//! ```ignore
//! use filament::sync::Mutex;
//!
//! let counter = Arc::new(Mutex::new(0));
//!
//! let c = Arc::clone(&counter);
//! filament::spawn(move || {
//!     *c.lock()? += 1;
//!     Ok(())
//! })?;
//! ```
//!
//! # Interruption
//!
//! A contended `lock` is an interruption point. An interrupted or unwound
//! waiter leaves the queue; if ownership had already been handed to it, the
//! lock is passed on to the next waiter.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::runtime;
use crate::tracing_compat::trace;
use crate::waitable::{Defer, Waitable};

/// A queued waiter, shared between the waiting side and the queue.
#[derive(Debug)]
pub(super) struct WaitNode {
    waiter: Arc<dyn Waitable>,
    signalled: AtomicBool,
}

impl WaitNode {
    pub(super) fn new(waiter: Arc<dyn Waitable>) -> Arc<Self> {
        Arc::new(Self {
            waiter,
            signalled: AtomicBool::new(false),
        })
    }

    /// Marks the node chosen. Called with the owning queue's lock held.
    pub(super) fn signal(&self) {
        self.signalled.store(true, Ordering::Release);
    }

    pub(super) fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::Acquire)
    }

    /// Wakes the waiter. Called after the queue lock is released.
    pub(super) fn wake(&self) {
        self.waiter.set_ready();
    }
}

#[derive(Debug, Default)]
struct LockState {
    locked: bool,
    waiters: VecDeque<Arc<WaitNode>>,
}

/// A mutual exclusion lock for fibers.
///
/// # Fairness
///
/// FIFO: contended acquisitions are granted in arrival order. An unlocked
/// mutex never has waiters, so [`try_lock`](Self::try_lock) cannot jump the
/// queue.
pub struct Mutex<T> {
    state: spin::Mutex<LockState>,
    data: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            state: spin::Mutex::new(LockState::default()),
            data: parking_lot::Mutex::new(value),
        }
    }

    /// Returns true if the mutex is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Returns the number of fibers waiting for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquires the mutex, suspending the calling fiber while it is held
    /// elsewhere. Called outside any fiber, drives the thread's scheduler
    /// until the lock is granted.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the calling fiber is interrupted while
    /// waiting, or `NoScheduler` if the mutex is contended and the calling
    /// thread has no scheduler to wait on.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        if let Some(guard) = self.try_lock() {
            return Ok(guard);
        }
        runtime::check_interruption()?;
        let node = WaitNode::new(runtime::notifier()?);

        let mut state = self.state.lock();
        if !state.locked {
            state.locked = true;
            drop(state);
            return Ok(self.guard());
        }
        state.waiters.push_back(Arc::clone(&node));
        trace!(waiters = state.waiters.len(), "mutex contended");
        let pending = Defer::new(|| self.abandon(&node));

        loop {
            runtime::wait(Box::new(state))?;
            if node.is_signalled() {
                break;
            }
            runtime::check_interruption()?;
            state = self.state.lock();
            if node.is_signalled() {
                drop(state);
                break;
            }
        }
        pending.cancel();
        Ok(self.guard())
    }

    /// Acquires the mutex if it is free.
    #[must_use]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        drop(state);
        Some(self.guard())
    }

    /// Returns a mutable reference to the underlying data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            data: self.data.lock(),
            release: Release { mutex: self },
        }
    }

    /// Releases the lock, handing it to the next waiter if there is one.
    fn unlock(&self) {
        let next = {
            let mut state = self.state.lock();
            let next = state.waiters.pop_front();
            match &next {
                Some(node) => node.signal(),
                None => state.locked = false,
            }
            next
        };
        if let Some(node) = next {
            trace!("mutex handed off");
            node.wake();
        }
    }

    /// Removes a waiter that gives up. A waiter that was already granted the
    /// lock owns it and must pass it on.
    fn abandon(&self, node: &Arc<WaitNode>) {
        let granted = {
            let mut state = self.state.lock();
            if !node.is_signalled() {
                state.waiters.retain(|queued| !Arc::ptr_eq(queued, node));
            }
            node.is_signalled()
        };
        if granted {
            self.unlock();
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("locked", &state.locked)
            .field("waiters", &state.waiters.len())
            .finish_non_exhaustive()
    }
}

struct Release<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Drop for Release<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// A guard that releases the mutex when dropped.
///
/// The guard stays on the fiber that acquired it and travels with the
/// fiber's stack, so holding it across suspension points is fine.
#[must_use = "guard will be immediately released if not held"]
pub struct MutexGuard<'a, T> {
    // Field order matters: the data lock is released before the handoff.
    data: parking_lot::MutexGuard<'a, T>,
    release: Release<'a, T>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// The mutex this guard belongs to.
    pub(super) fn mutex(&self) -> &'a Mutex<T> {
        self.release.mutex
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexGuard")
            .field("data", &*self.data)
            .finish()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
