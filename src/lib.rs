//! Filament: cooperative stackful fibers for Rust.
//!
//! # Overview
//!
//! A fiber is a user-level thread of execution with its own stack that only
//! gives up control at well-defined suspension points: an explicit yield, a
//! contended mutex, a condition wait, a join, or waiting on a future. Every
//! OS thread that runs fibers owns one scheduling [`Algorithm`]; the default
//! is [`RoundRobin`], a priority-ordered FIFO. Its fibers all run on that
//! thread, each on a stack of its own, one at a time.
//!
//! Code that runs on the thread outside any fiber is the *main context*.
//! Blocking calls made there drive the scheduler until the awaited event
//! happens, so a program can spawn fibers and simply join them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use filament::{Mutex, RuntimeBuilder};
//!
//! RuntimeBuilder::new().install()?;
//! let counter = Arc::new(Mutex::new(0));
//! let fibers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counter = Arc::clone(&counter);
//!         filament::spawn(move || {
//!             *counter.lock()? += 1;
//!             filament::this_fiber::yield_now()
//!         })
//!     })
//!     .collect::<filament::Result<_>>()?;
//! for fiber in fibers {
//!     fiber.join()?;
//! }
//! assert_eq!(*counter.lock()?, 4);
//! ```
//!
//! # Module Structure
//!
//! - [`fiber`]: spawning and the [`Fiber`] handle
//! - [`this_fiber`]: operations on the calling fiber
//! - [`runtime`]: the [`Algorithm`] interface, [`RoundRobin`], configuration
//! - [`sync`]: [`Mutex`] and [`Condvar`]
//! - [`future`]: [`Promise`], [`PackagedTask`], [`Future`], [`SharedFuture`]
//!   and the `waitfor_any` / `waitfor_all` combinators
//! - [`waitable`]: the wake-up protocol shared by every blocking primitive
//! - [`record`]: the fiber control block
//! - [`context`]: stacks and execution contexts
//! - [`types`]: identifiers, states and flags
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod context;
pub mod error;
pub mod fiber;
pub mod future;
pub mod record;
pub mod runtime;
pub mod sync;
pub mod this_fiber;
pub mod tracing_compat;
pub mod types;
pub mod waitable;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use fiber::{spawn, Builder, Fiber};
pub use future::{
    waitfor_all, waitfor_any, Awaitable, Future, PackagedTask, Promise, SharedFuture,
};
pub use runtime::{Algorithm, RoundRobin, RuntimeBuilder, RuntimeConfig};
pub use sync::{Condvar, Mutex, MutexGuard};
pub use types::{FiberId, FiberState};
pub use waitable::Waitable;
