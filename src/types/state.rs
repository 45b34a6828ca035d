//! Fiber lifecycle state and flag bits.

use std::sync::atomic::{AtomicU8, Ordering};

/// The state of a fiber in its lifecycle.
///
/// ```text
/// Ready ──resume──▶ Running ──suspend(wait)──▶ Waiting
///   ▲                 │  │                        │
///   └──── yield ──────┘  └──body returns──▶ Terminated
///   └───────────── set_ready ◀────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Runnable; sits on a ready queue (or in transit between schedulers).
    Ready,
    /// The single fiber currently executing on its scheduler.
    Running,
    /// Blocked on a waitable; sits on a wait queue.
    Waiting,
    /// Body finished, normally or by unwinding.
    Terminated,
}

impl FiberState {
    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Per-fiber flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FiberFlags(u8);

impl FiberFlags {
    /// Preserve floating-point state when switching into/out of this fiber.
    pub const PRESERVE_FPU: Self = Self(0b0001);
    /// Interruption is disabled (interruption points do not fire).
    pub const INTERRUPTION_BLOCKED: Self = Self(0b0010);
    /// Interruption was requested and not yet observed.
    pub const INTERRUPTION_REQUESTED: Self = Self(0b0100);
    /// Forced unwind was requested.
    pub const UNWIND_REQUESTED: Self = Self(0b1000);

    /// The empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every bit in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::fmt::Debug for FiberFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (Self::PRESERVE_FPU, "PRESERVE_FPU"),
            (Self::INTERRUPTION_BLOCKED, "INTERRUPTION_BLOCKED"),
            (Self::INTERRUPTION_REQUESTED, "INTERRUPTION_REQUESTED"),
            (Self::UNWIND_REQUESTED, "UNWIND_REQUESTED"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// Atomically updated [`FiberFlags`].
#[derive(Debug, Default)]
pub(crate) struct AtomicFlags(AtomicU8);

impl AtomicFlags {
    pub(crate) const fn new(initial: FiberFlags) -> Self {
        Self(AtomicU8::new(initial.0))
    }

    pub(crate) fn load(&self) -> FiberFlags {
        FiberFlags(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn contains(&self, flag: FiberFlags) -> bool {
        self.load().contains(flag)
    }

    /// Sets or clears `flag`, returning whether it was previously set.
    pub(crate) fn set(&self, flag: FiberFlags, on: bool) -> bool {
        let prev = if on {
            self.0.fetch_or(flag.0, Ordering::AcqRel)
        } else {
            self.0.fetch_and(!flag.0, Ordering::AcqRel)
        };
        prev & flag.0 == flag.0
    }
}
