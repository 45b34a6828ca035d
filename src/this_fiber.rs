//! Operations on the calling fiber.
//!
//! Outside any fiber (the thread's main context) these calls are harmless:
//! there is no id, nothing to interrupt, and yielding runs one scheduling
//! step of the installed scheduler.

use std::sync::Arc;

use crate::error::Result;
use crate::record::FiberRecord;
use crate::runtime;
use crate::types::FiberId;

/// Returns the id of the calling fiber.
#[must_use]
pub fn id() -> Option<FiberId> {
    runtime::current_fiber().map(|fiber| fiber.id())
}

/// Moves the calling fiber to the back of the ready queue.
///
/// # Errors
///
/// Fails with `NoScheduler` when called outside any fiber on a thread
/// without a scheduler.
pub fn yield_now() -> Result<()> {
    runtime::yield_now()
}

/// Returns `Interrupted` if an interruption of the calling fiber is pending
/// and enabled, consuming the request.
///
/// # Errors
///
/// `Interrupted` as described.
pub fn interruption_point() -> Result<()> {
    runtime::check_interruption()
}

/// Returns true if the calling fiber accepts interruption.
#[must_use]
pub fn interruption_enabled() -> bool {
    runtime::current_fiber().is_some_and(|fiber| fiber.interruption_enabled())
}

/// Returns true if an interruption of the calling fiber is pending.
#[must_use]
pub fn interruption_requested() -> bool {
    runtime::current_fiber().is_some_and(|fiber| fiber.interruption_requested())
}

/// Returns the calling fiber's scheduling priority.
#[must_use]
pub fn priority() -> Option<i32> {
    runtime::current_fiber().map(|fiber| fiber.priority())
}

/// Changes the calling fiber's scheduling priority. Does nothing outside a
/// fiber.
pub fn set_priority(priority: i32) {
    let Some(fiber) = runtime::current_fiber() else {
        return;
    };
    match runtime::current() {
        Ok(algorithm) => algorithm.priority(&fiber, priority),
        Err(_) => fiber.set_priority(priority),
    }
}

/// Disables interruption of the calling fiber until dropped.
///
/// Requests arriving meanwhile stay pending and are observed at the first
/// interruption point after the guard is gone. Guards nest; each restores
/// the setting it found.
#[must_use = "interruption is re-enabled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DisableInterruption {
    fiber: Option<Arc<FiberRecord>>,
    previous: bool,
}

impl DisableInterruption {
    /// Disables interruption of the calling fiber.
    pub fn new() -> Self {
        let fiber = runtime::current_fiber();
        let previous = fiber
            .as_ref()
            .map_or(false, |fiber| fiber.set_interruption_enabled(false));
        Self { fiber, previous }
    }
}

impl Default for DisableInterruption {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterruption {
    fn drop(&mut self) {
        if let Some(fiber) = &self.fiber {
            fiber.set_interruption_enabled(self.previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{init_test_logging, run_on_scheduler};
    use crate::spawn;
    use parking_lot::Mutex;

    #[test]
    fn main_context_is_not_a_fiber() {
        init_test_logging();
        assert_eq!(id(), None);
        assert_eq!(priority(), None);
        assert!(!interruption_enabled());
        assert!(!interruption_requested());
        assert!(interruption_point().is_ok());
        let _guard = DisableInterruption::new();
    }

    #[test]
    fn id_matches_handle() {
        init_test_logging();
        run_on_scheduler(|_| {
            let seen = Arc::new(Mutex::new(None));
            let slot = Arc::clone(&seen);
            let fiber = spawn(move || {
                *slot.lock() = id();
                Ok(())
            })
            .expect("spawn");
            let expected = fiber.id();
            fiber.join().expect("join");
            assert_eq!(*seen.lock(), Some(expected));
        });
    }

    #[test]
    fn interruption_point_consumes_request() {
        init_test_logging();
        run_on_scheduler(|_| {
            let fiber = spawn(|| {
                yield_now()?;
                assert!(interruption_requested());
                let err = interruption_point().expect_err("pending");
                assert_eq!(err.kind(), ErrorKind::Interrupted);
                assert!(!interruption_requested());
                interruption_point()
            })
            .expect("spawn");
            yield_now().expect("fiber runs to its yield");
            fiber.interrupt();
            fiber.join().expect("second interruption point passes");
        });
    }

    #[test]
    fn disabled_interruption_defers_request() {
        init_test_logging();
        run_on_scheduler(|_| {
            let fiber = spawn(|| {
                {
                    let _off = DisableInterruption::new();
                    assert!(!interruption_enabled());
                    yield_now()?;
                    interruption_point()?;
                    {
                        let _nested = DisableInterruption::new();
                    }
                    assert!(!interruption_enabled());
                }
                assert!(interruption_enabled());
                interruption_point()
            })
            .expect("spawn");
            yield_now().expect("fiber disables interruption and yields");
            fiber.interrupt();
            let err = fiber.join().expect_err("observed after the guard");
            assert_eq!(err.kind(), ErrorKind::Interrupted);
        });
    }

    #[test]
    fn set_priority_of_calling_fiber() {
        init_test_logging();
        run_on_scheduler(|_| {
            let fiber = spawn(|| {
                set_priority(7);
                assert_eq!(priority(), Some(7));
                Ok(())
            })
            .expect("spawn");
            fiber.join().expect("join");
        });
    }
}
