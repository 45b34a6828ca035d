//! Packaged tasks: a callable bound to the future of its result.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::error::{Error, ErrorKind, Result};
use crate::future::future::Future;
use crate::future::shared_state::SharedState;
use crate::record::fiber::is_forced_unwind;
use crate::tracing_compat::{debug, trace};

type TaskFn<R> = Box<dyn FnOnce() -> Result<R> + Send + 'static>;

struct TaskCell<R> {
    state: Arc<SharedState<R>>,
    func: spin::Mutex<Option<TaskFn<R>>>,
}

impl<R> TaskCell<R> {
    fn started(&self) -> bool {
        self.func.lock().is_none()
    }

    /// Runs the callable and stores its outcome.
    fn invoke(&self) -> Result<()> {
        let func = self
            .func
            .lock()
            .take()
            .ok_or_else(|| Error::new(ErrorKind::TaskAlreadyStarted))?;
        trace!("packaged task started");
        let result = match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(result) => result,
            Err(payload) if is_forced_unwind(payload.as_ref()) => {
                self.state.abandon();
                panic::resume_unwind(payload);
            }
            Err(payload) => {
                debug!("packaged task panicked");
                Err(Error::panicked(payload.as_ref()))
            }
        };
        self.state.set(result)
    }
}

/// A callable whose result, value or error, is delivered through a
/// [`Future`].
///
/// The task runs at most once, on whichever fiber calls it. Dropping a task
/// that never ran breaks its future.
///
/// # Example
///
/// ```ignore
/// let task = PackagedTask::new(|| Ok(6 * 7));
/// let answer = task.get_future()?;
/// filament::spawn(move || task.call())?;
/// assert_eq!(answer.get()?, 42);
/// ```
pub struct PackagedTask<R> {
    cell: Option<Arc<TaskCell<R>>>,
}

impl<R> PackagedTask<R> {
    /// Wraps `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        Self {
            cell: Some(Arc::new(TaskCell {
                state: SharedState::new(),
                func: spin::Mutex::new(Some(Box::new(func))),
            })),
        }
    }

    fn cell(&self) -> Result<&Arc<TaskCell<R>>> {
        self.cell
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::TaskMoved))
    }

    /// Returns true if the task still owns its callable's state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Moves the task out, leaving `self` in the moved-from state.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            cell: self.cell.take(),
        }
    }

    /// Returns the future bound to this task.
    ///
    /// # Errors
    ///
    /// `FutureAlreadyRetrieved` on a second call, `TaskMoved` if the task
    /// was moved from.
    pub fn get_future(&self) -> Result<Future<R>> {
        let cell = self.cell()?;
        cell.state.retrieve()?;
        Ok(Future::from_state(Arc::clone(&cell.state)))
    }

    /// Runs the callable, storing what it returns in the shared state. An
    /// error returned by the callable, or a panic inside it, is stored too
    /// and surfaces from the future's `get`.
    ///
    /// # Errors
    ///
    /// `TaskMoved` if the task was moved from, `TaskAlreadyStarted` on a
    /// second call.
    pub fn call(&self) -> Result<()> {
        self.cell()?.invoke()
    }
}

impl<R: Send + 'static> PackagedTask<R> {
    /// Registers a callback run the first time anyone waits on the future,
    /// before the waiter blocks. Passing the callback's [`TaskInvoker`] to
    /// `invoke` runs the task lazily on the waiting fiber.
    ///
    /// # Errors
    ///
    /// `TaskMoved` if the task was moved from.
    pub fn set_wait_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&TaskInvoker<R>) + Send + 'static,
    {
        let cell = self.cell()?;
        let invoker = TaskInvoker {
            cell: Arc::downgrade(cell),
        };
        cell.state.set_callback(Box::new(move || callback(&invoker)));
        Ok(())
    }
}

impl<R> fmt::Debug for PackagedTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PackagedTask");
        match &self.cell {
            Some(cell) => s
                .field("started", &cell.started())
                .field("state", &cell.state),
            None => s.field("moved", &true),
        };
        s.finish()
    }
}

impl<R> Drop for PackagedTask<R> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            if !cell.started() {
                cell.state.abandon();
            }
        }
    }
}

/// Handle passed to a packaged task's wait callback.
pub struct TaskInvoker<R> {
    cell: Weak<TaskCell<R>>,
}

impl<R> TaskInvoker<R> {
    /// Runs the task now, on the calling fiber.
    ///
    /// # Errors
    ///
    /// `TaskMoved` if the task was already dropped, otherwise as
    /// [`PackagedTask::call`].
    pub fn invoke(&self) -> Result<()> {
        self.cell
            .upgrade()
            .ok_or_else(|| Error::new(ErrorKind::TaskMoved))?
            .invoke()
    }
}

impl<R> fmt::Debug for TaskInvoker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInvoker").finish_non_exhaustive()
    }
}
