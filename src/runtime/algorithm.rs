//! The scheduling algorithm interface.
//!
//! Every part of the runtime that needs to block, wake or spawn goes through
//! [`Algorithm`]; nothing outside the scheduler implementation names a
//! concrete scheduler type.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::record::{FiberOptions, FiberRecord};
use crate::waitable::Waitable;

/// A lock handed to [`Algorithm::wait`] to be released once the calling
/// fiber is marked as blocked.
pub trait WaitGuard {
    /// Releases the lock.
    fn release(self: Box<Self>);
}

impl<T: ?Sized> WaitGuard for spin::MutexGuard<'_, T> {
    fn release(self: Box<Self>) {}
}

impl<T: ?Sized> WaitGuard for parking_lot::MutexGuard<'_, T> {
    fn release(self: Box<Self>) {}
}

/// A pluggable scheduling policy, one per OS thread.
///
/// # Contract
///
/// - A fiber handed to an algorithm is on exactly one of its queues, or is
///   its single active fiber, or has terminated.
/// - Only the owning thread resumes its fibers; other threads make a fiber
///   runnable with [`Waitable::set_ready`] or move it with
///   [`migrate_to`](Self::migrate_to).
/// - Blocking calls made outside any fiber (the thread's main context) drive
///   the scheduler until the awaited waitable fires.
pub trait Algorithm: Send + Sync + fmt::Debug {
    /// Admits a newly created `Ready` fiber.
    fn spawn(&self, fiber: Arc<FiberRecord>);

    /// Changes a fiber's scheduling priority.
    fn priority(&self, fiber: &Arc<FiberRecord>, priority: i32);

    /// Blocks the caller until `fiber` terminates. Returns at once if it
    /// already has.
    ///
    /// # Errors
    ///
    /// `Interrupted` if the calling fiber is interrupted while waiting,
    /// `DeadlockWouldOccur` if a fiber joins itself.
    fn join(&self, fiber: &Arc<FiberRecord>) -> Result<()>;

    /// Returns the fiber currently running on this scheduler.
    fn active(&self) -> Option<Arc<FiberRecord>>;

    /// Runs one scheduling step. Returns false if there was nothing to do,
    /// so the caller may park the thread.
    fn run(&self) -> bool;

    /// Marks the caller blocked, releases `guard`, and suspends until some
    /// waitable registered by the caller fires. The caller re-checks its own
    /// condition afterwards; wakeups may be spurious.
    fn wait(&self, guard: Box<dyn WaitGuard + '_>);

    /// Moves the calling fiber to the back of the ready queue.
    fn yield_now(&self);

    /// Returns the waitable that wakes the caller: the active fiber, or the
    /// main-context notifier when called outside any fiber.
    fn notifier(&self) -> Arc<dyn Waitable>;

    /// Adopts a `Ready` fiber taken from another scheduler.
    ///
    /// # Errors
    ///
    /// `InvalidMigration` if the fiber is running, blocked or terminated.
    fn migrate_to(&self, fiber: Arc<FiberRecord>) -> Result<()>;

    /// Gives up a `Ready` fiber for another scheduler to adopt.
    fn steal_from(&self) -> Option<Arc<FiberRecord>>;

    /// Parks the scheduler thread until woken or `timeout` elapses.
    fn park(&self, timeout: Duration);

    /// Options for fibers spawned on this scheduler.
    fn fiber_options(&self) -> FiberOptions {
        FiberOptions::default()
    }
}
