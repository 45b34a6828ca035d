//! Promises, packaged tasks and the futures they complete.
//!
//! Every producer ([`Promise`], [`PackagedTask`]) shares one write-once
//! state with its [`Future`]. Waiting on a future suspends the calling
//! fiber, or drives the scheduler when called from the main context, until
//! the producer stores a value or an error. A producer dropped without
//! storing anything leaves a `BrokenPromise` error behind.
//!
//! - [`Future`]: unique handle, `get` moves the result out
//! - [`SharedFuture`]: cloneable handle, `get` clones the result
//! - [`waitfor_any`] / [`waitfor_all`]: wait on several [`Awaitable`]s

mod future;
mod packaged_task;
mod promise;
mod shared_state;
mod wait;

pub use future::{Awaitable, Future, SharedFuture};
pub use packaged_task::{PackagedTask, TaskInvoker};
pub use promise::{Completer, Promise};
pub use wait::{waitfor_any, waitfor_all};
