//! Blocking synchronization primitives shared by providers and streamers.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// A cooperative cancellation flag.
///
/// Worker loops check it at their poll points, and `sleep` returns early as
/// soon as the token is cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if *cancelled {
            return false;
        }
        *cancelled = true;
        self.inner.signal.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleeps for `duration` unless cancelled first.
    /// Returns `true` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }

    pub fn sleep_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .signal
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

/// How a `WaitHandle` behaves after releasing a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays signaled until `reset` is called, releasing every waiter.
    Manual,
    /// Releases exactly one waiter per `set`, then resets itself.
    Auto,
}

struct WaitInner {
    signaled: Mutex<bool>,
    signal: Condvar,
    mode: ResetMode,
}

/// An event wait handle used to pace or gate stage providers from outside.
#[derive(Clone)]
pub struct WaitHandle {
    inner: Arc<WaitInner>,
}

impl WaitHandle {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            inner: Arc::new(WaitInner {
                signaled: Mutex::new(false),
                signal: Condvar::new(),
                mode,
            }),
        }
    }

    pub fn manual() -> Self {
        Self::new(ResetMode::Manual)
    }

    pub fn auto() -> Self {
        Self::new(ResetMode::Auto)
    }

    pub fn set(&self) {
        let mut signaled = self.inner.signaled.lock();
        *signaled = true;
        match self.inner.mode {
            ResetMode::Manual => {
                self.inner.signal.notify_all();
            }
            ResetMode::Auto => {
                self.inner.signal.notify_one();
            }
        }
    }

    pub fn reset(&self) {
        *self.inner.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.signaled.lock()
    }

    /// Blocks until signaled.
    pub fn wait(&self) {
        let mut signaled = self.inner.signaled.lock();
        while !*signaled {
            self.inner.signal.wait(&mut signaled);
        }
        if self.inner.mode == ResetMode::Auto {
            *signaled = false;
        }
    }

    /// Blocks until signaled or `timeout` elapses. Returns `true` if signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.inner.signaled.lock();
        while !*signaled {
            if self
                .inner
                .signal
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                break;
            }
        }
        let released = *signaled;
        if released && self.inner.mode == ResetMode::Auto {
            *signaled = false;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancelled_token_interrupts_sleep() {
        let token = CancellationToken::new();
        let sleeper = {
            let token = token.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let cancelled = token.sleep(Duration::from_secs(10));
                (cancelled, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(token.cancel());
        assert!(!token.cancel());
        let (cancelled, elapsed) = sleeper.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let token = CancellationToken::new();
        assert!(!token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn auto_reset_releases_one_wait_per_set() {
        let handle = WaitHandle::auto();
        handle.set();
        assert!(handle.wait_timeout(Duration::from_millis(10)));
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn manual_reset_stays_signaled() {
        let handle = WaitHandle::manual();
        assert!(!handle.wait_timeout(Duration::from_millis(5)));
        handle.set();
        handle.wait();
        assert!(handle.wait_timeout(Duration::from_millis(5)));
        handle.reset();
        assert!(!handle.is_set());
    }
}
