//! Internal records for runtime entities.
//!
//! A [`FiberRecord`] is the control block shared between a fiber's handle,
//! its scheduler and its joiners. Schedulers and synchronization primitives
//! drive fibers through it; user code normally goes through
//! [`Fiber`](crate::Fiber) instead.

pub mod fiber;

pub use fiber::{FiberBody, FiberOptions, FiberRecord};
