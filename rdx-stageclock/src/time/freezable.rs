//! A pausable clock whose elapsed time excludes every frozen interval.

use super::clock::{Clock, SharedClock, TimeUnit};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct FreezeState {
    /// Base time at which the current freeze began.
    frozen_at: Option<i64>,
    /// Total base time spent frozen in completed freezes.
    frozen_total: i64,
}

/// Wraps a base clock and can be frozen and unfrozen.
///
/// While frozen, `time()` stands still; after unfreezing it continues from the
/// same value, so it never jumps and never goes backwards.
pub struct FreezableClock {
    base: SharedClock,
    state: Mutex<FreezeState>,
    unfrozen: Condvar,
    frozen_tx: watch::Sender<bool>,
}

impl FreezableClock {
    pub fn new(base: SharedClock) -> Self {
        let (frozen_tx, _) = watch::channel(false);
        Self {
            base,
            state: Mutex::new(FreezeState::default()),
            unfrozen: Condvar::new(),
            frozen_tx,
        }
    }

    /// Freezes the clock. Returns `false` if it was already frozen.
    pub fn freeze(&self) -> bool {
        let mut state = self.state.lock();
        if state.frozen_at.is_some() {
            return false;
        }
        state.frozen_at = Some(self.base.time());
        self.frozen_tx.send_replace(true);
        true
    }

    /// Unfreezes the clock. Returns `false` if it was not frozen.
    pub fn unfreeze(&self) -> bool {
        let mut state = self.state.lock();
        let Some(frozen_at) = state.frozen_at.take() else {
            return false;
        };
        state.frozen_total += self.base.time() - frozen_at;
        self.unfrozen.notify_all();
        self.frozen_tx.send_replace(false);
        true
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen_at.is_some()
    }

    /// Blocks until the clock is unfrozen or `timeout` elapses.
    ///
    /// Returns `true` if the clock is running when the call returns.
    pub fn wait_unfrozen(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while state.frozen_at.is_some() {
            match deadline {
                Some(deadline) => {
                    if self.unfrozen.wait_until(&mut state, deadline).timed_out() {
                        return state.frozen_at.is_none();
                    }
                }
                None => self.unfrozen.wait(&mut state),
            }
        }
        true
    }

    /// A receiver observing the frozen flag, for asynchronous observers.
    pub fn subscribe_frozen(&self) -> watch::Receiver<bool> {
        self.frozen_tx.subscribe()
    }

    pub fn base(&self) -> &SharedClock {
        &self.base
    }
}

impl Clock for FreezableClock {
    fn time(&self) -> i64 {
        let state = self.state.lock();
        let reference = state.frozen_at.unwrap_or_else(|| self.base.time());
        reference - state.frozen_total
    }

    fn unit(&self) -> TimeUnit {
        self.base.unit()
    }
}
