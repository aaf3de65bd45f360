use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

////////////////////////////////////////////////////////////////////////////////////////////////////
// WaitStatus
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The outcome of [`Queue::wait_for`][crate::Queue::wait_for].
#[derive(Copy, Clone, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
#[must_use]
pub enum WaitStatus {
    /// An element became (or already was) available.
    Woken,
    /// The timeout elapsed without an element becoming available.
    TimedOut,
}

/********** impl inherent *************************************************************************/

impl WaitStatus {
    /// Returns `true` if the wait timed out.
    #[inline]
    pub fn timed_out(self) -> bool {
        self == WaitStatus::TimedOut
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Waiters
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The set of consumers blocked in a timed wait.
///
/// Notifiers only touch the mutex while at least one sleeper is registered.
/// The sleeper count is published and read with `SeqCst` fences on both sides,
/// so either the notifier observes the sleeper or the sleeper observes the
/// notifier's element.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    lock: Mutex<()>,
    cond: Condvar,
    sleepers: AtomicUsize,
}

/********** impl inherent *************************************************************************/

impl Waiters {
    /// Wakes one sleeper, if there is any.
    #[inline]
    pub fn notify_one(&self) {
        if self.has_sleepers() {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cond.notify_one();
        }
    }

    /// Wakes all sleepers.
    #[inline]
    pub fn notify_all(&self) {
        if self.has_sleepers() {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cond.notify_all();
        }
    }

    /// Blocks until `ready` returns `true` or `timeout` has elapsed.
    pub fn wait_for(&self, timeout: Duration, ready: impl Fn() -> bool) -> WaitStatus {
        if ready() {
            return WaitStatus::Woken;
        }

        // an unrepresentable deadline waits indefinitely
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        // (WAI:1) this `SeqCst` fence synchronizes-with the `SeqCst` fence in (WAI:2)
        self.sleepers.fetch_add(1, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);

        let status = loop {
            if ready() {
                break WaitStatus::Woken;
            }

            guard = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitStatus::TimedOut;
                    }

                    match self.cond.wait_timeout(guard, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };

            trace!("waiter woke up, re-checking queue");
        };

        self.sleepers.fetch_sub(1, Ordering::Relaxed);
        drop(guard);

        status
    }

    #[inline]
    fn has_sleepers(&self) -> bool {
        // (WAI:2) this `SeqCst` fence synchronizes-with the `SeqCst` fence in (WAI:1)
        atomic::fence(Ordering::SeqCst);
        self.sleepers.load(Ordering::Relaxed) > 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn ready_returns_immediately() {
        let waiters = Waiters::default();
        assert_eq!(waiters.wait_for(Duration::from_secs(3600), || true), WaitStatus::Woken);
    }

    #[test]
    fn timeout() {
        let waiters = Waiters::default();
        let start = Instant::now();
        let status = waiters.wait_for(Duration::from_millis(50), || false);
        assert!(status.timed_out());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(waiters.sleepers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn notified() {
        let waiters = Arc::new(Waiters::default());
        let flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let waiters = Arc::clone(&waiters);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                waiters.wait_for(Duration::from_secs(60), || flag.load(Ordering::Relaxed))
            })
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Relaxed);
        waiters.notify_one();

        assert_eq!(handle.join().unwrap(), WaitStatus::Woken);
    }
}
