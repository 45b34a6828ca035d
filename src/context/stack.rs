//! Stack provisioning for fiber execution contexts.
//!
//! A [`Stack`] is an opaque handle with a fixed usable size. It is obtained
//! from a [`StackAllocator`] before a fiber starts and handed back after the
//! fiber terminates. The default [`DefaultStackAllocator`] validates sizes and
//! counts live stacks; the coroutine behind the execution context maps the
//! memory, with a guard page below it, when the context is created.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};

/// Default usable stack size for a fiber (256 KiB).
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
/// Smallest stack the default allocator hands out (16 KiB).
pub const MIN_STACK_SIZE: usize = 16 * 1024;
/// Largest stack the default allocator hands out (1 GiB).
pub const MAX_STACK_SIZE: usize = 1024 * 1024 * 1024;

/// Handle to a block of stack memory.
#[derive(Debug, PartialEq, Eq)]
pub struct Stack {
    size: usize,
}

impl Stack {
    /// Creates a handle describing `size` usable bytes.
    ///
    /// Custom allocators use this after reserving the memory.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self { size }
    }

    /// Returns the usable size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Source of fiber stacks.
pub trait StackAllocator: Send + Sync + std::fmt::Debug {
    /// Obtains a stack with at least `size` usable bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::StackAllocation`] when the request cannot be met.
    fn allocate(&self, size: usize) -> Result<Stack>;

    /// Returns a stack obtained from [`allocate`](Self::allocate).
    fn deallocate(&self, stack: Stack);
}

/// Default allocator: validates the size and tracks live stacks.
#[derive(Debug)]
pub struct DefaultStackAllocator {
    min: usize,
    max: usize,
    in_use: AtomicUsize,
}

impl DefaultStackAllocator {
    /// Creates an allocator with the default bounds.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_bounds(MIN_STACK_SIZE, MAX_STACK_SIZE)
    }

    /// Creates an allocator accepting sizes in `min..=max`.
    #[must_use]
    pub const fn with_bounds(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Returns the number of stacks handed out and not yet returned.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl Default for DefaultStackAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StackAllocator for DefaultStackAllocator {
    fn allocate(&self, size: usize) -> Result<Stack> {
        if size < self.min || size > self.max {
            return Err(Error::new(ErrorKind::StackAllocation).with_message(format!(
                "stack size {size} outside of [{}, {}]",
                self.min, self.max
            )));
        }
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(Stack::new(size))
    }

    fn deallocate(&self, stack: Stack) {
        let prev = self.in_use.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "deallocate of {stack:?} without a live allocation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_within_bounds() {
        let alloc = DefaultStackAllocator::new();
        let stack = alloc.allocate(DEFAULT_STACK_SIZE).expect("allocate");
        assert_eq!(stack.size(), DEFAULT_STACK_SIZE);
        assert_eq!(alloc.in_use(), 1);
        alloc.deallocate(stack);
        assert_eq!(alloc.in_use(), 0);
    }

    #[test]
    fn allocate_out_of_bounds_is_resource_error() {
        let alloc = DefaultStackAllocator::with_bounds(4096, 8192);
        let err = alloc.allocate(1024).expect_err("too small");
        assert_eq!(err.kind(), ErrorKind::StackAllocation);
        let err = alloc.allocate(16 * 1024).expect_err("too large");
        assert_eq!(err.kind(), ErrorKind::StackAllocation);
        assert_eq!(alloc.in_use(), 0);
    }
}
