//! Fiber synchronization primitives.
//!
//! Both primitives block by suspending the calling fiber through the
//! thread's scheduler, never the OS thread. Called from the main context of
//! a thread with an installed scheduler, they drive that scheduler until the
//! wait is over.
//!
//! - [`Mutex`]: FIFO mutual exclusion with direct handoff
//! - [`Condvar`]: condition variable usable with any [`Mutex`]

mod condvar;
mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
