//! Parking for idle scheduler threads.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A mechanism for parking and unparking a scheduler thread.
///
/// Notifications are sticky: an `unpark` that arrives before `park` makes the
/// next `park` return immediately.
#[derive(Debug, Clone)]
pub struct Parker {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Parker {
    /// Creates a new parker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Parks the current thread until notified.
    pub fn park(&self) {
        let (lock, cvar) = &*self.inner;
        let mut notified = lock.lock();
        while !*notified {
            cvar.wait(&mut notified);
        }
        *notified = false;
    }

    /// Parks the current thread until notified or `duration` elapses.
    ///
    /// Returns true if a notification was consumed.
    pub fn park_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut notified = lock.lock();
        if !*notified {
            let _ = cvar.wait_for(&mut notified, duration);
        }
        std::mem::replace(&mut *notified, false)
    }

    /// Unparks a parked thread.
    pub fn unpark(&self) {
        let (lock, cvar) = &*self.inner;
        {
            let mut notified = lock.lock();
            *notified = true;
        }
        cvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new();
        parker.unpark();
        parker.park();
    }

    #[test]
    fn park_timeout_expires() {
        let parker = Parker::new();
        assert!(!parker.park_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn unpark_from_other_thread_wakes() {
        let parker = Parker::new();
        let remote = parker.clone();
        let handle = std::thread::spawn(move || remote.unpark());
        parker.park();
        handle.join().expect("unparker");
    }
}
