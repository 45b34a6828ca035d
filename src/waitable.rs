//! The waitable protocol shared by every blocking primitive.
//!
//! A blocking primitive registers an `Arc<dyn Waitable>` (obtained from the
//! scheduler's [`notifier`](crate::runtime::Algorithm::notifier)) with
//! whatever it waits on, then asks the scheduler to suspend. Whoever changes
//! the awaited condition calls [`Waitable::set_ready`] on every registered
//! waitable. Registrations are shared ownership: both the waiting side and
//! the signalling side hold a strong reference.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::runtime::parker::Parker;

/// Something that can be woken.
pub trait Waitable: Send + Sync + fmt::Debug {
    /// Returns true once the waitable has been signalled.
    fn is_ready(&self) -> bool;

    /// Signals the waitable. Signalling an already ready waitable, or one
    /// that is not currently blocked, has no effect.
    fn set_ready(&self);
}

/// Returns true if both handles refer to the same waitable.
pub(crate) fn same_waitable(a: &Arc<dyn Waitable>, b: &Arc<dyn Waitable>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Waitable standing in for the thread's main context (code running outside
/// any fiber on a thread with an installed scheduler).
///
/// The ready flag is sticky so a signal that arrives while the main context
/// is busy driving other fibers is not lost. Signalling also unparks the
/// scheduler thread in case it went idle.
#[derive(Debug)]
pub struct MainNotifier {
    fired: AtomicBool,
    parker: Parker,
}

impl MainNotifier {
    pub(crate) fn new(parker: Parker) -> Self {
        Self {
            fired: AtomicBool::new(false),
            parker,
        }
    }

    /// Clears the flag before a new registration.
    pub(crate) fn arm(&self) {
        self.fired.store(false, Ordering::Release);
    }

    /// Consumes the flag, returning whether it was set.
    pub(crate) fn take(&self) -> bool {
        self.fired.swap(false, Ordering::AcqRel)
    }
}

impl Waitable for MainNotifier {
    fn is_ready(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn set_ready(&self) {
        self.fired.store(true, Ordering::Release);
        self.parker.unpark();
    }
}

/// Fan-in waitable registered with several sources at once.
///
/// The first source to fire records it and forwards the signal; later
/// signals are absorbed. The flag lives under a lock so the waiting side can
/// check it and suspend without a missed-wakeup window: pass the guard from
/// [`AnyWaiter::lock`] to the scheduler's `wait`.
#[derive(Debug)]
pub struct AnyWaiter {
    fired: spin::Mutex<bool>,
    target: Arc<dyn Waitable>,
}

impl AnyWaiter {
    /// Creates a fan-in waitable forwarding to `target`.
    #[must_use]
    pub fn new(target: Arc<dyn Waitable>) -> Self {
        Self {
            fired: spin::Mutex::new(false),
            target,
        }
    }

    /// Locks the fired flag.
    pub fn lock(&self) -> spin::MutexGuard<'_, bool> {
        self.fired.lock()
    }
}

impl Waitable for AnyWaiter {
    fn is_ready(&self) -> bool {
        *self.fired.lock()
    }

    fn set_ready(&self) {
        {
            let mut fired = self.fired.lock();
            if *fired {
                return;
            }
            *fired = true;
        }
        self.target.set_ready();
    }
}

/// Runs a closure when dropped, including during unwinding.
///
/// Blocking primitives use this to deregister their waitables whether the
/// wait completes, fails, or is torn down by a forced unwind.
pub(crate) struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Defer<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }

    /// Drops the closure without running it.
    pub(crate) fn cancel(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
