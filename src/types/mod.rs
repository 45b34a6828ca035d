//! Core types for the filament runtime.
//!
//! - [`id`]: Identifier types (`FiberId`)
//! - [`state`]: Fiber lifecycle state and per-fiber flag bits

pub mod id;
pub mod state;

pub use id::FiberId;
pub use state::{FiberFlags, FiberState};
