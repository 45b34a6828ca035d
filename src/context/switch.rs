//! Caller/callee switch points backed by a stackful coroutine.
//!
//! An [`ExecutionContext`] runs its entry function on a stack of its own,
//! inside whichever thread resumes it. `resume` switches from the caller
//! onto that stack together with one transfer value; `suspend`, called from
//! the entry function, switches back. Any number of contexts are multiplexed
//! on one OS thread, and a suspended context may be resumed later from a
//! different thread.
//!
//! The switch routine saves every register the platform ABI requires a
//! callee to preserve, floating-point control state included; the
//! per-switch flag is recorded for diagnostics.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use generator::{Generator, Gn};
use parking_lot::Mutex;

use crate::context::stack::Stack;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;

/// What the callee did with control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// The callee suspended and can be resumed again.
    Suspended,
    /// The entry function returned; the context cannot be resumed.
    Finished,
}

/// A pair of switch points: the caller (whoever resumes) and the callee
/// (the entry function running on the context's stack).
pub struct ExecutionContext<X> {
    coroutine: Mutex<Generator<'static, (), ()>>,
    transfer: Arc<Mutex<Option<X>>>,
    stack_size: usize,
}

impl<X: Send + 'static> ExecutionContext<X> {
    /// Creates the callee side on a stack of `stack.size()` bytes. `entry`
    /// receives the value passed to the first [`resume`](Self::resume) and
    /// does not run before it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ContextCreation`] if the stack memory cannot be
    /// mapped.
    pub fn new<F>(stack: &Stack, entry: F) -> Result<Self>
    where
        F: FnOnce(X) + Send + 'static,
    {
        let transfer = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&transfer);
        let words = stack.size() / std::mem::size_of::<usize>();
        let coroutine = panic::catch_unwind(AssertUnwindSafe(move || {
            Gn::<()>::new_opt(words, move || {
                let first = slot.lock().take();
                if let Some(first) = first {
                    entry(first);
                }
            })
        }))
        .map_err(|payload| {
            Error::new(ErrorKind::ContextCreation)
                .with_message(format!("failed to map a {} byte stack", stack.size()))
                .with_source(Error::panicked(payload.as_ref()))
        })?;
        Ok(Self {
            coroutine: Mutex::new(coroutine),
            transfer,
            stack_size: stack.size(),
        })
    }

    /// Switches into the callee on the calling thread. Returns once the
    /// callee suspends or its entry function returns.
    ///
    /// # Panics
    ///
    /// Panics if the callee is already running or has finished.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn resume(&self, transfer: X, preserve_fpu: bool) -> Switch {
        let Some(mut coroutine) = self.coroutine.try_lock() else {
            panic!("resume of an execution context whose callee is running");
        };
        assert!(
            !coroutine.is_done(),
            "resume of a finished execution context"
        );
        trace!(stack_size = self.stack_size, preserve_fpu, "switch to callee");
        *self.transfer.lock() = Some(transfer);
        let _ = coroutine.resume();
        if coroutine.is_done() {
            Switch::Finished
        } else {
            Switch::Suspended
        }
    }

    /// Switches back to the caller. Must be called from the callee's entry
    /// function.
    ///
    /// Returns the value passed to the `resume` that switched back in.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn suspend(&self, preserve_fpu: bool) -> Option<X> {
        trace!(stack_size = self.stack_size, preserve_fpu, "switch to caller");
        generator::co_yield_with(());
        self.transfer.lock().take()
    }
}

impl<X> ExecutionContext<X> {
    /// Returns true once the entry function has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.coroutine
            .try_lock()
            .is_some_and(|coroutine| coroutine.is_done())
    }

    /// Returns the usable stack size in bytes.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl<X> fmt::Debug for ExecutionContext<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stack_size", &self.stack_size)
            .field("finished", &self.is_finished())
            .finish()
    }
}
