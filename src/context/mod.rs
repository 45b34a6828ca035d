//! Execution contexts and fiber stacks.
//!
//! - [`stack`]: stack sizing and the [`StackAllocator`] seam
//! - [`switch`]: [`ExecutionContext`], the resume/suspend primitive fibers
//!   run on

pub mod stack;
pub mod switch;

pub use stack::{
    DefaultStackAllocator, Stack, StackAllocator, DEFAULT_STACK_SIZE, MAX_STACK_SIZE,
    MIN_STACK_SIZE,
};
pub use switch::{ExecutionContext, Switch};
