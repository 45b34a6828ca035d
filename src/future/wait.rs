//! Waiting on several futures at once.

use std::cell::Cell;
use std::sync::Arc;

use crate::error::Result;
use crate::future::future::Awaitable;
use crate::runtime;
use crate::tracing_compat::trace;
use crate::waitable::{AnyWaiter, Defer, Waitable};

/// Blocks until at least one of `futures` is ready and returns its
/// position. When several are ready the lowest position wins. An empty
/// slice returns its end position, `0`, at once.
///
/// Works on homogeneous slices (`&[Future<T>]`) as well as on mixed ones
/// (`&[&dyn Awaitable]`).
///
/// # Errors
///
/// `FutureUninitialized` if `futures` holds an invalid handle,
/// `Interrupted` if the calling fiber is interrupted while blocked.
pub fn waitfor_any<A: Awaitable>(futures: &[A]) -> Result<usize> {
    if futures.is_empty() {
        return Ok(futures.len());
    }
    loop {
        if let Some(index) = first_ready(futures) {
            return Ok(index);
        }
        runtime::check_interruption()?;

        let any = Arc::new(AnyWaiter::new(runtime::notifier()?));
        let waiter: Arc<dyn Waitable> = any.clone();
        let attached = Cell::new(0);
        let _registered = Defer::new(|| {
            for future in &futures[..attached.get()] {
                future.detach(&waiter);
            }
        });
        let mut all_pending = true;
        for future in futures {
            let registered = future.attach(&waiter)?;
            attached.set(attached.get() + 1);
            if !registered {
                all_pending = false;
                break;
            }
        }
        if !all_pending {
            continue;
        }

        let fired = any.lock();
        if !*fired {
            trace!(futures = futures.len(), "waitfor_any blocking");
            runtime::wait(Box::new(fired))?;
        }
    }
}

/// Blocks until every one of `futures` is ready.
///
/// # Errors
///
/// As [`waitfor_any`].
pub fn waitfor_all<A: Awaitable>(futures: &[A]) -> Result<()> {
    for future in futures {
        future.wait()?;
    }
    Ok(())
}

fn first_ready<A: Awaitable>(futures: &[A]) -> Option<usize> {
    futures.iter().position(|future| future.is_ready())
}
