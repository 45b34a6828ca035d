//! Scheduler runtime.
//!
//! Each OS thread has at most one installed scheduling algorithm, set once
//! before the first fiber is spawned there and kept for the thread's
//! lifetime. Fibers run on the stack of their own execution context but on
//! the thread of the scheduler that resumed them; while one runs, the thread
//! records it together with that scheduler, so a migrated fiber talks to its
//! new owner.
//!
//! - [`algorithm`]: the [`Algorithm`] interface
//! - [`round_robin`]: the default [`RoundRobin`] scheduler
//! - [`builder`]: [`RuntimeBuilder`] installing a configured scheduler
//! - [`config`] / [`env_config`]: configuration and environment overrides
//! - [`parker`]: idle thread parking

pub mod algorithm;
pub mod builder;
pub mod config;
pub mod env_config;
pub mod parker;
pub mod round_robin;

pub use algorithm::{Algorithm, WaitGuard};
pub use builder::RuntimeBuilder;
pub use config::RuntimeConfig;
pub use round_robin::{RoundRobin, SchedulerStats};

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::error::{Error, ErrorKind, Result};
use crate::record::FiberRecord;
use crate::tracing_compat::debug;
use crate::waitable::{Defer, Waitable};

/// The fiber a thread is currently switched into, and the scheduler that
/// resumed it.
pub(crate) struct Running {
    algorithm: Weak<dyn Algorithm>,
    fiber: Arc<FiberRecord>,
}

#[derive(Default)]
struct ThreadState {
    algorithm: Option<Arc<dyn Algorithm>>,
    running: Option<Running>,
}

thread_local! {
    // The coroutine runtime's thread state is touched first so that it is
    // still usable while fibers are unwound during this one's teardown.
    static THREAD: RefCell<ThreadState> = {
        let _ = generator::is_generator();
        RefCell::new(ThreadState::default())
    };
}

/// Installs `algorithm` as the calling thread's scheduler.
///
/// # Errors
///
/// Fails with [`ErrorKind::Config`] if a scheduler is already installed or
/// the caller is a fiber.
pub fn install(algorithm: Arc<dyn Algorithm>) -> Result<()> {
    THREAD.with(|thread| {
        let mut thread = thread.borrow_mut();
        if thread.running.is_some() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("a fiber cannot install a scheduling algorithm"));
        }
        if thread.algorithm.is_some() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("a scheduling algorithm is already installed on this thread"));
        }
        debug!(algorithm = ?algorithm, "scheduling algorithm installed");
        thread.algorithm = Some(algorithm);
        Ok(())
    })
}

/// Returns the scheduling algorithm for the calling thread.
///
/// Inside a fiber this is the scheduler that resumed it, which differs from
/// the installed one after a migration.
///
/// # Errors
///
/// Fails with [`ErrorKind::NoScheduler`] if none is installed, or if the
/// scheduler that owns the calling fiber is being torn down.
pub fn current() -> Result<Arc<dyn Algorithm>> {
    THREAD
        .try_with(|thread| {
            let thread = thread.borrow();
            match &thread.running {
                Some(running) => running.algorithm.upgrade(),
                None => thread.algorithm.clone(),
            }
        })
        .ok()
        .flatten()
        .ok_or_else(Error::no_scheduler)
}

/// Returns true if a scheduler is installed on the calling thread.
#[must_use]
pub fn is_installed() -> bool {
    THREAD
        .try_with(|thread| thread.borrow().algorithm.is_some())
        .unwrap_or(false)
}

/// Records that the calling thread switches into `fiber` on behalf of
/// `algorithm`. Returns what was recorded before, for [`leave_fiber`].
pub(crate) fn enter_fiber(
    algorithm: Weak<dyn Algorithm>,
    fiber: Arc<FiberRecord>,
) -> Option<Running> {
    THREAD
        .try_with(|thread| {
            thread
                .borrow_mut()
                .running
                .replace(Running { algorithm, fiber })
        })
        .ok()
        .flatten()
}

/// Restores the bookkeeping saved by [`enter_fiber`] once the fiber has
/// switched back.
pub(crate) fn leave_fiber(previous: Option<Running>) {
    let left = THREAD
        .try_with(|thread| std::mem::replace(&mut thread.borrow_mut().running, previous))
        .ok()
        .flatten();
    drop(left);
}

/// Returns the fiber the calling thread is switched into, if any.
pub(crate) fn current_fiber() -> Option<Arc<FiberRecord>> {
    THREAD
        .try_with(|thread| {
            thread
                .borrow()
                .running
                .as_ref()
                .map(|running| Arc::clone(&running.fiber))
        })
        .ok()
        .flatten()
}

/// Interruption point: consumes a pending interruption of the calling fiber.
pub(crate) fn check_interruption() -> Result<()> {
    match current_fiber() {
        Some(fiber) if fiber.take_interruption() => {
            debug!(fiber = %fiber.id(), "interruption observed");
            Err(Error::interrupted().with_fiber(fiber.id()))
        }
        _ => Ok(()),
    }
}

/// Returns the waitable that wakes the caller.
///
/// Inside a fiber this is the fiber itself; in the main context it is the
/// installed scheduler's notifier.
pub(crate) fn notifier() -> Result<Arc<dyn Waitable>> {
    match current_fiber() {
        Some(fiber) => Ok(fiber as Arc<dyn Waitable>),
        None => Ok(current()?.notifier()),
    }
}

/// Blocks the caller until something registered by it fires.
///
/// A fiber blocks through its own record and holds no strong reference to
/// its scheduler while suspended, so a scheduler dropped meanwhile can still
/// tear it down.
pub(crate) fn wait(guard: Box<dyn WaitGuard + '_>) -> Result<()> {
    match current_fiber() {
        Some(fiber) => fiber.block(guard),
        None => current()?.wait(guard),
    }
    Ok(())
}

/// Moves the caller to the back of the ready queue, or runs one scheduling
/// step from the main context.
pub(crate) fn yield_now() -> Result<()> {
    match current_fiber() {
        Some(fiber) => {
            fiber.mark_ready();
            fiber.suspend();
        }
        None => current()?.yield_now(),
    }
    Ok(())
}

/// Blocks the caller until `fiber` terminates.
pub(crate) fn join(fiber: &Arc<FiberRecord>) -> Result<()> {
    match current_fiber() {
        Some(me) if Arc::ptr_eq(&me, fiber) => Err(Error::new(ErrorKind::DeadlockWouldOccur)
            .with_message("a fiber cannot join itself")
            .with_fiber(fiber.id())),
        Some(me) => join_with(fiber, me.clone(), &|guard| me.block(guard)),
        None => current()?.join(fiber),
    }
}

/// Join loop shared by schedulers: registers `waiter` on `fiber` and waits
/// until the fiber has released its joiners.
pub(crate) fn join_with<'f>(
    fiber: &'f FiberRecord,
    waiter: Arc<dyn Waitable>,
    wait: &dyn Fn(Box<dyn WaitGuard + 'f>),
) -> Result<()> {
    loop {
        check_interruption()?;
        let Some(guard) = fiber.join_locked(Arc::clone(&waiter)) else {
            return Ok(());
        };
        let _unjoin = Defer::new(|| fiber.unjoin(&waiter));
        wait(Box::new(guard));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_fails_without_install() {
        std::thread::spawn(|| {
            let err = current().expect_err("nothing installed");
            assert_eq!(err.kind(), ErrorKind::NoScheduler);
            assert!(!is_installed());
        })
        .join()
        .expect("thread");
    }

    #[test]
    fn install_is_set_once() {
        std::thread::spawn(|| {
            install(RoundRobin::new(RuntimeConfig::default())).expect("first install");
            assert!(is_installed());
            assert!(current().is_ok());
            let err = install(RoundRobin::new(RuntimeConfig::default()))
                .expect_err("second install");
            assert_eq!(err.kind(), ErrorKind::Config);
        })
        .join()
        .expect("thread");
    }

    #[test]
    fn fiber_cannot_install_a_scheduler() {
        crate::test_utils::run_on_scheduler(|rr| {
            let fiber = crate::spawn(|| {
                let err = install(RoundRobin::new(RuntimeConfig::default()))
                    .expect_err("inside a fiber");
                assert_eq!(err.kind(), ErrorKind::Config);
                assert!(current_fiber().is_some());
                Ok(())
            })
            .expect("spawn");
            rr.run_until_idle();
            fiber.join().expect("join");
            assert!(current_fiber().is_none());
        });
    }

    #[test]
    fn main_context_has_no_fiber_and_no_interruption() {
        assert!(current_fiber().is_none());
        assert!(check_interruption().is_ok());
    }
}
