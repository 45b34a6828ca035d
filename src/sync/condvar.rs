//! Condition variable for fibers.
//!
//! [`Condvar`] keeps a FIFO of waiting fibers and is not tied to a single
//! mutex. [`Condvar::wait`] queues the caller, releases the mutex and
//! suspends in one step, so a notification sent after the mutex is released
//! always finds the waiter queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime;
use crate::sync::mutex::{MutexGuard, WaitNode};
use crate::tracing_compat::trace;
use crate::waitable::Defer;

/// A condition variable.
///
/// Notifications are not stored: `notify_one` with no waiter does nothing.
/// Callers loop on their own predicate, or use
/// [`wait_while`](Self::wait_while).
#[derive(Default)]
pub struct Condvar {
    waiters: spin::Mutex<VecDeque<Arc<WaitNode>>>,
}

impl Condvar {
    /// Creates a condition variable with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `guard`'s mutex and suspends until notified, then locks the
    /// mutex again.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the calling fiber is interrupted before or
    /// while waiting; the mutex is then left unlocked. Errors from
    /// re-locking the mutex are passed through.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        let mutex = guard.mutex();
        runtime::check_interruption()?;
        let node = WaitNode::new(runtime::notifier()?);

        let mut waiters = self.waiters.lock();
        waiters.push_back(Arc::clone(&node));
        let pending = Defer::new(|| self.abandon(&node));
        drop(guard);

        loop {
            runtime::wait(Box::new(waiters))?;
            if node.is_signalled() {
                break;
            }
            runtime::check_interruption()?;
            waiters = self.waiters.lock();
            if node.is_signalled() {
                drop(waiters);
                break;
            }
        }
        pending.cancel();
        mutex.lock()
    }

    /// Waits until `condition` returns false, re-checking after every
    /// notification.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait).
    pub fn wait_while<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
    ) -> Result<MutexGuard<'a, T>>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    /// Wakes the longest-waiting fiber, if any.
    pub fn notify_one(&self) {
        let node = {
            let mut waiters = self.waiters.lock();
            let node = waiters.pop_front();
            if let Some(node) = &node {
                node.signal();
            }
            node
        };
        if let Some(node) = node {
            trace!("condvar notify_one");
            node.wake();
        }
    }

    /// Wakes every waiting fiber.
    pub fn notify_all(&self) {
        let nodes: Vec<_> = {
            let mut waiters = self.waiters.lock();
            waiters.drain(..).inspect(|node| node.signal()).collect()
        };
        trace!(woken = nodes.len(), "condvar notify_all");
        for node in nodes {
            node.wake();
        }
    }

    /// Returns the number of queued waiters.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Removes a waiter that gives up. A notification already delivered to
    /// it is passed on so it is not lost.
    fn abandon(&self, node: &Arc<WaitNode>) {
        let notified = {
            let mut waiters = self.waiters.lock();
            if !node.is_signalled() {
                waiters.retain(|queued| !Arc::ptr_eq(queued, node));
            }
            node.is_signalled()
        };
        if notified {
            self.notify_one();
        }
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("waiters", &self.waiters())
            .finish()
    }
}
