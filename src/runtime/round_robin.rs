//! Round-robin scheduler, the default [`Algorithm`].
//!
//! The ready queue is FIFO with priority as the primary key: the next fiber
//! to run is the earliest-queued among those with the highest priority.
//! Fibers blocked on a waitable sit on a separate wait queue; once some other
//! fiber or thread marks one ready, the owning scheduler moves it back to the
//! ready queue on its next step. Fibers migrated in from other threads arrive
//! through a lock-free injector.
//!
//! A fiber is put on a queue only after it has switched back to the
//! scheduler, so a queued fiber is never still running. Fibers are resumed
//! on the scheduler's own thread, one at a time. A queued fiber carries its
//! scheduler's claim; migration is refused until the claim is given up by
//! [`steal_from`](Algorithm::steal_from).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::context::stack::{DefaultStackAllocator, StackAllocator};
use crate::error::{Error, ErrorKind, Result};
use crate::record::{FiberOptions, FiberRecord};
use crate::runtime::algorithm::{Algorithm, WaitGuard};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::parker::Parker;
use crate::runtime;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::FiberState;
use crate::waitable::{MainNotifier, Waitable};

/// Idle work run by [`RoundRobin::run`] when no fiber is ready. Returns
/// whether it did anything.
pub type IdleHook = Box<dyn Fn() -> bool + Send + Sync>;

/// Queue occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Fibers waiting for their turn, including migrated-in fibers.
    pub ready: usize,
    /// Fibers blocked on a waitable.
    pub waiting: usize,
    /// Whether a fiber is currently running.
    pub active: bool,
}

impl SchedulerStats {
    /// Total number of fibers owned by the scheduler.
    #[must_use]
    pub fn total(&self) -> usize {
        self.ready + self.waiting + usize::from(self.active)
    }
}

#[derive(Debug, Default)]
struct ReadyQueue {
    fibers: VecDeque<Arc<FiberRecord>>,
}

impl ReadyQueue {
    fn push(&mut self, fiber: Arc<FiberRecord>) {
        self.fibers.push_back(fiber);
    }

    /// Removes the earliest fiber among those with the highest priority.
    fn pop(&mut self) -> Option<Arc<FiberRecord>> {
        let mut best: Option<(usize, i32)> = None;
        for (index, fiber) in self.fibers.iter().enumerate() {
            let priority = fiber.priority();
            if best.map_or(true, |(_, top)| priority > top) {
                best = Some((index, priority));
            }
        }
        best.and_then(|(index, _)| self.fibers.remove(index))
    }

    fn len(&self) -> usize {
        self.fibers.len()
    }
}

/// The default scheduling algorithm.
pub struct RoundRobin {
    me: Weak<RoundRobin>,
    config: RuntimeConfig,
    allocator: Arc<dyn StackAllocator>,
    idle: Option<IdleHook>,
    active: Mutex<Option<Arc<FiberRecord>>>,
    rqueue: Mutex<ReadyQueue>,
    wqueue: spin::Mutex<VecDeque<Arc<FiberRecord>>>,
    injector: SegQueue<Arc<FiberRecord>>,
    parker: Parker,
    main: Arc<MainNotifier>,
}

impl RoundRobin {
    /// Creates a scheduler with the default stack allocator.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Self::with_parts(config, Arc::new(DefaultStackAllocator::new()), None)
    }

    pub(crate) fn with_parts(
        mut config: RuntimeConfig,
        allocator: Arc<dyn StackAllocator>,
        idle: Option<IdleHook>,
    ) -> Arc<Self> {
        config.normalize();
        let parker = Parker::new();
        let main = Arc::new(MainNotifier::new(parker.clone()));
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            allocator,
            idle,
            active: Mutex::new(None),
            rqueue: Mutex::new(ReadyQueue::default()),
            wqueue: spin::Mutex::new(VecDeque::new()),
            injector: SegQueue::new(),
            parker,
            main,
        })
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the stack allocator used for new fibers.
    #[must_use]
    pub fn stack_allocator(&self) -> &Arc<dyn StackAllocator> {
        &self.allocator
    }

    /// Returns a snapshot of queue occupancy.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ready: self.rqueue.lock().len() + self.injector.len(),
            waiting: self.wqueue.lock().len(),
            active: self.active.lock().is_some(),
        }
    }

    /// Runs until no fiber is ready or blocked. Intended for the thread's
    /// main context.
    pub fn run_until_idle(&self) {
        loop {
            if self.run() {
                continue;
            }
            let stats = self.stats();
            if stats.ready == 0 && stats.waiting == 0 {
                return;
            }
            self.park(self.config.idle_park);
        }
    }

    fn drain_injector(&self) {
        if self.injector.is_empty() {
            return;
        }
        let mut rqueue = self.rqueue.lock();
        while let Some(fiber) = self.injector.pop() {
            trace!(fiber = %fiber.id(), "adopted migrated fiber");
            rqueue.push(fiber);
        }
    }

    fn promote_woken(&self) {
        let mut woken = Vec::new();
        self.wqueue.lock().retain(|fiber| {
            if fiber.state() == FiberState::Ready {
                woken.push(Arc::clone(fiber));
                false
            } else {
                true
            }
        });
        if !woken.is_empty() {
            let mut rqueue = self.rqueue.lock();
            for fiber in woken {
                rqueue.push(fiber);
            }
        }
    }

    fn requeue(&self, fiber: Arc<FiberRecord>, result: Result<()>) {
        match fiber.state() {
            FiberState::Running => panic!(
                "{} switched back to the scheduler without blocking, yielding or terminating",
                fiber.id()
            ),
            FiberState::Ready => self.rqueue.lock().push(fiber),
            FiberState::Waiting => self.wqueue.lock().push_back(fiber),
            FiberState::Terminated => self.retire(&fiber, result),
        }
    }

    fn retire(&self, fiber: &Arc<FiberRecord>, result: Result<()>) {
        fiber.disown();
        fiber.release_stack();
        match result {
            Err(err) if fiber.is_detached() => {
                warn!(fiber = %fiber.id(), error = %err, "detached fiber failed");
            }
            Err(err) => {
                debug!(fiber = %fiber.id(), error = %err, "fiber failed");
            }
            Ok(()) => {
                debug!(fiber = %fiber.id(), "fiber terminated");
            }
        }
    }

    /// Unwinds every fiber the scheduler still owns and returns their
    /// stacks. Runs on drop; call it explicitly to tear fibers down before
    /// the owning thread starts exiting. Does nothing from inside a fiber.
    pub fn shutdown(&self) {
        if self.active.lock().is_some() {
            warn!("scheduler shutdown requested from inside a fiber");
            return;
        }
        loop {
            let mut pending = Vec::new();
            while let Some(fiber) = self.injector.pop() {
                pending.push(fiber);
            }
            pending.extend(self.rqueue.lock().fibers.drain(..));
            pending.extend(self.wqueue.lock().drain(..));
            if pending.is_empty() {
                return;
            }
            debug!(fibers = pending.len(), "unwinding pending fibers");
            for fiber in pending {
                fiber.disown();
                if fiber.is_terminated() {
                    continue;
                }
                fiber.request_unwind();
                while !fiber.is_terminated() {
                    fiber.set_running();
                    *self.active.lock() = Some(Arc::clone(&fiber));
                    let _ = fiber.resume(self.me.clone());
                    *self.active.lock() = None;
                }
                fiber.release_stack();
            }
        }
    }

    /// Blocks the main context until its notifier fires, running fibers in
    /// the meantime.
    fn block_main(&self) {
        while !self.main.take() {
            if !self.run() {
                self.park(self.config.idle_park);
            }
        }
    }
}

impl Algorithm for RoundRobin {
    fn spawn(&self, fiber: Arc<FiberRecord>) {
        debug!(fiber = %fiber.id(), priority = fiber.priority(), "fiber spawned");
        let fresh = fiber.claim();
        assert!(fresh, "{} spawned while owned by a scheduler", fiber.id());
        fiber.set_owner(self.parker.clone());
        fiber.mark_ready();
        self.rqueue.lock().push(fiber);
        self.parker.unpark();
    }

    fn priority(&self, fiber: &Arc<FiberRecord>, priority: i32) {
        fiber.set_priority(priority);
    }

    fn join(&self, fiber: &Arc<FiberRecord>) -> Result<()> {
        if self
            .active()
            .is_some_and(|active| Arc::ptr_eq(&active, fiber))
        {
            return Err(Error::new(ErrorKind::DeadlockWouldOccur)
                .with_message("a fiber cannot join itself")
                .with_fiber(fiber.id()));
        }
        runtime::join_with(fiber, self.notifier(), &|guard| self.wait(guard))
    }

    fn active(&self) -> Option<Arc<FiberRecord>> {
        self.active.lock().clone()
    }

    fn run(&self) -> bool {
        if self.active.lock().is_some() {
            // Called from inside a fiber: only the main context drives.
            return false;
        }
        self.drain_injector();
        self.promote_woken();
        let next = self.rqueue.lock().pop();
        let Some(fiber) = next else {
            return self.idle.as_ref().is_some_and(|idle| idle());
        };
        fiber.set_running();
        *self.active.lock() = Some(Arc::clone(&fiber));
        let result = fiber.resume(self.me.clone());
        *self.active.lock() = None;
        self.requeue(fiber, result);
        true
    }

    fn wait(&self, guard: Box<dyn WaitGuard + '_>) {
        match self.active() {
            Some(fiber) => fiber.block(guard),
            None => {
                guard.release();
                self.block_main();
            }
        }
    }

    fn yield_now(&self) {
        match self.active() {
            Some(fiber) => {
                fiber.mark_ready();
                fiber.suspend();
            }
            None => {
                self.run();
            }
        }
    }

    fn notifier(&self) -> Arc<dyn Waitable> {
        match self.active() {
            Some(fiber) => fiber as Arc<dyn Waitable>,
            None => {
                self.main.arm();
                Arc::clone(&self.main) as Arc<dyn Waitable>
            }
        }
    }

    fn migrate_to(&self, fiber: Arc<FiberRecord>) -> Result<()> {
        let state = fiber.state();
        if state != FiberState::Ready {
            return Err(Error::new(ErrorKind::InvalidMigration)
                .with_message(format!("cannot migrate a fiber in state {state:?}"))
                .with_fiber(fiber.id()));
        }
        if !fiber.claim() {
            return Err(Error::new(ErrorKind::InvalidMigration)
                .with_message("fiber is still owned by another scheduler")
                .with_fiber(fiber.id()));
        }
        debug!(fiber = %fiber.id(), "fiber migrated in");
        fiber.set_owner(self.parker.clone());
        self.injector.push(fiber);
        self.parker.unpark();
        Ok(())
    }

    fn steal_from(&self) -> Option<Arc<FiberRecord>> {
        let fiber = self.rqueue.lock().fibers.pop_back()?;
        fiber.disown();
        debug!(fiber = %fiber.id(), "fiber stolen");
        Some(fiber)
    }

    fn park(&self, timeout: Duration) {
        self.parker.park_timeout(timeout);
    }

    fn fiber_options(&self) -> FiberOptions {
        FiberOptions::from_config(&self.config, Arc::clone(&self.allocator))
    }
}

impl fmt::Debug for RoundRobin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobin")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for RoundRobin {
    fn drop(&mut self) {
        self.shutdown();
    }
}
