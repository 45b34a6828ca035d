//! Fiber control block.
//!
//! A [`FiberRecord`] owns a fiber's lifecycle state, its flag bits, the slot
//! for a failure captured from its body, the list of fibers waiting to join
//! it, and the execution context its body runs on. Records are shared through
//! `Arc`: scheduler queues, joiners, [`Fiber`](crate::Fiber) handles and the
//! started body itself each hold a strong reference, so a record is freed
//! only once it is terminated and unreferenced. A fiber suspended on its own
//! stack keeps itself alive until its scheduler unwinds it.
//!
//! Blocking is always "suspend, and something else later makes the fiber
//! ready": the record only offers [`resume`](FiberRecord::resume) and
//! [`suspend`](FiberRecord::suspend) as switch primitives.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::stack::{DefaultStackAllocator, Stack, StackAllocator};
use crate::context::switch::{ExecutionContext, Switch};
use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::parker::Parker;
use crate::runtime::{self, Algorithm, WaitGuard};
use crate::tracing_compat::{debug, trace};
use crate::types::state::AtomicFlags;
use crate::types::{FiberFlags, FiberId, FiberState};
use crate::waitable::{same_waitable, Defer, Waitable};

/// A fiber body.
pub type FiberBody = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Unwind payload used to tear down a fiber's stack.
///
/// Private so that user code cannot name it; the trampoline recognises it
/// and records an ordinary termination.
pub(crate) struct ForcedUnwind;

/// Returns true if a caught panic payload is a forced unwind.
pub(crate) fn is_forced_unwind(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.is::<ForcedUnwind>()
}

/// Options used to create a [`FiberRecord`].
#[derive(Clone)]
pub struct FiberOptions {
    /// Fiber name.
    pub name: Option<String>,
    /// Usable stack size in bytes.
    pub stack_size: usize,
    /// Preserve floating-point state on switches.
    pub preserve_fpu: bool,
    /// Initial scheduling priority.
    pub priority: i32,
    /// Where the stack comes from.
    pub allocator: Arc<dyn StackAllocator>,
}

impl FiberOptions {
    /// Options derived from a runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig, allocator: Arc<dyn StackAllocator>) -> Self {
        Self {
            name: None,
            stack_size: config.stack_size,
            preserve_fpu: config.preserve_fpu,
            priority: 0,
            allocator,
        }
    }
}

impl Default for FiberOptions {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default(), Arc::new(DefaultStackAllocator::new()))
    }
}

impl fmt::Debug for FiberOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberOptions")
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .field("preserve_fpu", &self.preserve_fpu)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub(crate) struct JoinList {
    released: bool,
    waiters: Vec<Arc<dyn Waitable>>,
}

/// Control block of a single fiber.
pub struct FiberRecord {
    id: FiberId,
    name: Option<String>,
    state: Mutex<FiberState>,
    flags: AtomicFlags,
    priority: AtomicI32,
    detached: AtomicBool,
    /// Set while a scheduler holds the fiber on one of its queues.
    claimed: AtomicBool,
    /// Failure captured by the last run, taken by `resume`.
    exception: Mutex<Option<Error>>,
    /// Failure kept for joiners.
    outcome: Mutex<Option<Error>>,
    joining: spin::Mutex<JoinList>,
    owner: Mutex<Option<Parker>>,
    context: ExecutionContext<Arc<FiberRecord>>,
    stack: Mutex<Option<Stack>>,
    allocator: Arc<dyn StackAllocator>,
}

impl FiberRecord {
    /// Creates a `Ready` fiber that will run `body` when first resumed.
    ///
    /// # Errors
    ///
    /// Fails if the stack cannot be allocated or the execution context
    /// cannot be created; no stack is leaked in either case.
    pub fn new(options: FiberOptions, body: FiberBody) -> Result<Arc<Self>> {
        let id = FiberId::next();
        let stack = options.allocator.allocate(options.stack_size)?;
        let entry = move |fiber: Arc<FiberRecord>| fiber.trampoline(body);
        let context = match ExecutionContext::new(&stack, entry) {
            Ok(context) => context,
            Err(err) => {
                options.allocator.deallocate(stack);
                return Err(err);
            }
        };
        let flags = if options.preserve_fpu {
            FiberFlags::PRESERVE_FPU
        } else {
            FiberFlags::empty()
        };
        debug!(fiber = %id, stack_size = options.stack_size, "fiber created");
        Ok(Arc::new(Self {
            id,
            name: options.name,
            state: Mutex::new(FiberState::Ready),
            flags: AtomicFlags::new(flags),
            priority: AtomicI32::new(options.priority),
            detached: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            exception: Mutex::new(None),
            outcome: Mutex::new(None),
            joining: spin::Mutex::new(JoinList::default()),
            owner: Mutex::new(None),
            context,
            stack: Mutex::new(Some(stack)),
            allocator: options.allocator,
        }))
    }

    /// Returns the fiber id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Returns the fiber name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FiberState {
        *self.state.lock()
    }

    /// Returns true once the body has finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns the current flag bits.
    #[must_use]
    pub fn flags(&self) -> FiberFlags {
        self.flags.load()
    }

    /// Returns true if switches preserve floating-point state.
    #[must_use]
    pub fn preserve_fpu(&self) -> bool {
        self.flags.contains(FiberFlags::PRESERVE_FPU)
    }

    /// Returns the scheduling priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    /// Stores a new scheduling priority. Schedulers call this from
    /// [`Algorithm::priority`].
    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    /// Marks the fiber as the one its scheduler is about to resume.
    ///
    /// # Panics
    ///
    /// Panics if the fiber has terminated.
    pub fn set_running(&self) {
        let mut state = self.state.lock();
        assert!(
            !state.is_terminal(),
            "{} scheduled to run after termination",
            self.id
        );
        *state = FiberState::Running;
    }

    /// Marks the running fiber as blocked. Must precede the release of the
    /// lock protecting whatever will later call [`Waitable::set_ready`].
    pub fn set_waiting(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, FiberState::Running, "{} blocked while not running", self.id);
        *state = FiberState::Waiting;
    }

    /// Marks the fiber runnable (spawn, yield, migration).
    pub fn mark_ready(&self) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = FiberState::Ready;
        }
    }

    fn set_terminated(&self) {
        *self.state.lock() = FiberState::Terminated;
    }

    /// Records the parker of the scheduler that owns this fiber.
    pub fn set_owner(&self, parker: Parker) {
        *self.owner.lock() = Some(parker);
    }

    /// Switches into the fiber on the calling thread, on behalf of
    /// `algorithm`. Returns once the fiber suspends or its body finishes,
    /// then re-raises a failure captured during that run.
    ///
    /// # Errors
    ///
    /// Returns the error the body returned, or a [`Panicked`] error if it
    /// panicked. A forced unwind is not an error.
    ///
    /// # Panics
    ///
    /// Panics if the fiber is not marked running or has already finished.
    ///
    /// [`Panicked`]: crate::error::ErrorKind::Panicked
    pub fn resume(self: &Arc<Self>, algorithm: Weak<dyn Algorithm>) -> Result<()> {
        let state = self.state();
        assert!(
            state == FiberState::Running,
            "resume of {} in state {state:?}",
            self.id
        );
        let previous = runtime::enter_fiber(algorithm, Arc::clone(self));
        let _restore = Defer::new(move || runtime::leave_fiber(previous));
        if self.context.resume(Arc::clone(self), self.preserve_fpu()) == Switch::Finished {
            trace!(fiber = %self.id, "fiber finished");
        }
        match self.exception.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Switches back to whoever resumed this fiber. Must be called from the
    /// fiber's own body.
    ///
    /// If an unwind was requested while the fiber was suspended, unwinds the
    /// fiber's stack instead of returning normally.
    pub fn suspend(&self) {
        trace!(fiber = %self.id, "suspend");
        drop(self.context.suspend(self.preserve_fpu()));
        if self.flags.contains(FiberFlags::UNWIND_REQUESTED) && !std::thread::panicking() {
            panic::resume_unwind(Box::new(ForcedUnwind));
        }
    }

    /// Blocks the running fiber: marks it waiting, releases `guard`, and
    /// suspends. A pending interruption or unwind request leaves the fiber
    /// ready so the switch returns at once.
    ///
    /// Only the fiber record is touched, so a suspended fiber does not keep
    /// its scheduler alive.
    pub fn block(&self, guard: Box<dyn WaitGuard + '_>) {
        self.set_waiting();
        if self.wake_pending() {
            self.mark_ready();
        }
        guard.release();
        self.suspend();
    }

    fn trampoline(self: &Arc<Self>, body: FiberBody) {
        let failure = if self.flags.contains(FiberFlags::UNWIND_REQUESTED) {
            debug!(fiber = %self.id, "fiber unwound before start");
            None
        } else {
            match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) if is_forced_unwind(payload.as_ref()) => {
                    debug!(fiber = %self.id, "fiber unwound");
                    None
                }
                Err(payload) => Some(Error::panicked(payload.as_ref()).with_fiber(self.id)),
            }
        };
        if let Some(err) = failure {
            debug!(fiber = %self.id, error = %err, "fiber failed");
            *self.outcome.lock() = Some(err.clone());
            *self.exception.lock() = Some(err);
        }
        self.set_terminated();
        self.release();
    }

    /// Wakes every joiner. Called exactly once, when the body has finished.
    ///
    /// # Panics
    ///
    /// Panics on a second call.
    pub fn release(&self) {
        let waiters = {
            let mut joining = self.joining.lock();
            assert!(!joining.released, "join waiters of {} released twice", self.id);
            joining.released = true;
            std::mem::take(&mut joining.waiters)
        };
        for waiter in waiters {
            waiter.set_ready();
        }
    }

    /// Registers `waiter` to be woken when this fiber terminates.
    ///
    /// Returns false, registering nothing, if the fiber already terminated.
    pub fn join(&self, waiter: Arc<dyn Waitable>) -> bool {
        self.join_locked(waiter).is_some()
    }

    /// Like [`join`](Self::join), but returns the join-list lock so the
    /// caller can suspend before any release becomes visible.
    pub(crate) fn join_locked(
        &self,
        waiter: Arc<dyn Waitable>,
    ) -> Option<spin::MutexGuard<'_, JoinList>> {
        let mut joining = self.joining.lock();
        if joining.released {
            return None;
        }
        joining.waiters.push(waiter);
        Some(joining)
    }

    /// Removes a registration made by [`join`](Self::join).
    pub fn unjoin(&self, waiter: &Arc<dyn Waitable>) {
        self.joining
            .lock()
            .waiters
            .retain(|w| !same_waitable(w, waiter));
    }

    /// Returns the failure the body finished with, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<Error> {
        self.outcome.lock().clone()
    }

    /// Requests cooperative interruption and wakes the fiber if it is blocked.
    pub fn request_interruption(&self) {
        self.flags.set(FiberFlags::INTERRUPTION_REQUESTED, true);
        self.set_ready();
    }

    /// Returns true if an interruption is pending.
    #[must_use]
    pub fn interruption_requested(&self) -> bool {
        self.flags.contains(FiberFlags::INTERRUPTION_REQUESTED)
    }

    /// Returns true unless interruption is disabled.
    #[must_use]
    pub fn interruption_enabled(&self) -> bool {
        !self.flags.contains(FiberFlags::INTERRUPTION_BLOCKED)
    }

    /// Enables or disables interruption, returning the previous setting.
    pub fn set_interruption_enabled(&self, enabled: bool) -> bool {
        !self.flags.set(FiberFlags::INTERRUPTION_BLOCKED, !enabled)
    }

    /// Consumes a pending interruption if interruption is enabled.
    pub fn take_interruption(&self) -> bool {
        self.interruption_enabled() && self.flags.set(FiberFlags::INTERRUPTION_REQUESTED, false)
    }

    /// Requests a forced unwind at the fiber's next suspension point and
    /// wakes it if it is blocked. A fiber that never started skips its body.
    pub fn request_unwind(&self) {
        if !self.flags.set(FiberFlags::UNWIND_REQUESTED, true) {
            debug!(fiber = %self.id, "unwind requested");
        }
        self.set_ready();
    }

    /// Returns true if a forced unwind was requested.
    #[must_use]
    pub fn unwind_requested(&self) -> bool {
        self.flags.contains(FiberFlags::UNWIND_REQUESTED)
    }

    /// Returns true if a pending request should cut the next wait short.
    #[must_use]
    pub fn wake_pending(&self) -> bool {
        self.unwind_requested() || (self.interruption_enabled() && self.interruption_requested())
    }

    /// Marks the fiber detached.
    pub fn set_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Returns true if no handle will join the fiber.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Claims the fiber for a scheduler's queues. Returns false, claiming
    /// nothing, if another scheduler already holds it.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives up a claim taken with [`claim`](Self::claim), once the fiber has
    /// left every queue of its scheduler.
    pub fn disown(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// Returns true while some scheduler holds the fiber.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Returns the stack to its allocator. Idempotent.
    pub fn release_stack(&self) {
        if let Some(stack) = self.stack.lock().take() {
            self.allocator.deallocate(stack);
        }
    }
}

impl Waitable for FiberRecord {
    fn is_ready(&self) -> bool {
        self.state() == FiberState::Ready
    }

    fn set_ready(&self) {
        let woke = {
            let mut state = self.state.lock();
            if *state == FiberState::Waiting {
                *state = FiberState::Ready;
                true
            } else {
                false
            }
        };
        if woke {
            trace!(fiber = %self.id, "woken");
            if let Some(parker) = self.owner.lock().as_ref() {
                parker.unpark();
            }
        }
    }
}

impl fmt::Debug for FiberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

impl Drop for FiberRecord {
    fn drop(&mut self) {
        self.release_stack();
    }
}
