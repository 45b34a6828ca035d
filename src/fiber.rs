//! Fiber handles.
//!
//! [`spawn`] and [`Builder::spawn`] create a fiber on the calling thread's
//! scheduler and return a [`Fiber`] handle. The handle joins, detaches,
//! interrupts and re-prioritizes the fiber.
//!
//! Dropping a handle that was neither joined nor detached while the fiber is
//! still running tears the fiber down: it unwinds at its next suspension
//! point, running its destructors, and never resumes normally.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::record::FiberRecord;
use crate::runtime;
use crate::tracing_compat::debug;
use crate::types::FiberId;

/// Spawns a fiber with default options on the calling thread's scheduler.
///
/// # Errors
///
/// Fails with `NoScheduler` if the thread has no scheduler, or with a
/// resource error if the fiber's stack or context cannot be created.
pub fn spawn<F>(f: F) -> Result<Fiber>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    Builder::new().spawn(f)
}

/// Fiber factory, used to configure a fiber before spawning it.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
    preserve_fpu: Option<bool>,
    priority: i32,
}

impl Builder {
    /// Creates a builder that inherits the scheduler's defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the fiber. The name shows up in logs and in `Debug` output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the fiber's stack size in bytes.
    #[must_use]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Preserves floating-point state across this fiber's switches.
    #[must_use]
    pub fn preserve_fpu(mut self, preserve: bool) -> Self {
        self.preserve_fpu = Some(preserve);
        self
    }

    /// Sets the initial scheduling priority. Higher runs first.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Spawns a fiber running `f`.
    ///
    /// # Errors
    ///
    /// As [`spawn`].
    pub fn spawn<F>(self, f: F) -> Result<Fiber>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let algorithm = runtime::current()?;
        let mut options = algorithm.fiber_options();
        options.name = self.name;
        options.priority = self.priority;
        if let Some(size) = self.stack_size {
            options.stack_size = size;
        }
        if let Some(preserve) = self.preserve_fpu {
            options.preserve_fpu = preserve;
        }
        let record = FiberRecord::new(options, Box::new(f))?;
        algorithm.spawn(Arc::clone(&record));
        Ok(Fiber {
            record,
            joinable: true,
        })
    }
}

/// Handle to a spawned fiber.
pub struct Fiber {
    record: Arc<FiberRecord>,
    joinable: bool,
}

impl Fiber {
    /// Returns the fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.record.id()
    }

    /// Returns the fiber's name, if it was given one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.record.name()
    }

    /// Returns true until the handle is joined or detached.
    #[must_use]
    pub fn joinable(&self) -> bool {
        self.joinable
    }

    /// Returns true once the fiber's body has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.record.is_terminated()
    }

    /// Waits for the fiber to finish.
    ///
    /// Called from a fiber this suspends the caller; called from the main
    /// context it drives the scheduler until the fiber is done.
    ///
    /// # Errors
    ///
    /// Returns the fiber's own failure, if its body returned an error or
    /// panicked. Returns `NotJoinable` if the handle was detached,
    /// `DeadlockWouldOccur` if a fiber joins itself, and `Interrupted` if
    /// the joining fiber is interrupted. A join that fails for any of the
    /// latter reasons detaches the target instead of tearing it down.
    pub fn join(mut self) -> Result<()> {
        if !self.joinable {
            return Err(Error::new(ErrorKind::NotJoinable).with_fiber(self.id()));
        }
        match runtime::join(&self.record) {
            Ok(()) => {
                self.joinable = false;
                self.record.outcome().map_or(Ok(()), Err)
            }
            Err(err) => {
                self.detach();
                Err(err)
            }
        }
    }

    /// Lets the fiber run to completion on its own. A failure of a detached
    /// fiber is logged instead of reported.
    pub fn detach(&mut self) {
        if self.joinable {
            self.joinable = false;
            self.record.set_detached();
            debug!(fiber = %self.id(), "fiber detached");
        }
    }

    /// Requests cooperative interruption. The fiber observes it at its next
    /// interruption point unless interruption is disabled there.
    pub fn interrupt(&self) {
        self.record.request_interruption();
    }

    /// Returns true if an interruption is pending.
    #[must_use]
    pub fn interruption_requested(&self) -> bool {
        self.record.interruption_requested()
    }

    /// Returns the scheduling priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.record.priority()
    }

    /// Changes the scheduling priority through the thread's scheduler.
    pub fn set_priority(&self, priority: i32) {
        match runtime::current() {
            Ok(algorithm) => algorithm.priority(&self.record, priority),
            Err(_) => self.record.set_priority(priority),
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("joinable", &self.joinable)
            .field("state", &self.record.state())
            .finish()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.joinable && !self.record.is_terminated() {
            debug!(fiber = %self.id(), "joinable fiber dropped, unwinding");
            self.record.request_unwind();
        }
    }
}
