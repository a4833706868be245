use super::provider::{SharedProvider, StageProvider};
use super::stage::Stage;
use crate::error::StagingError;
use crate::sync::WaitHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a plain wait re-checks for an abort.
const ABORT_POLL: Duration = Duration::from_millis(50);

/// A barrier: `next()` blocks until the handle is signaled, then ends.
///
/// The provider is only breakable when a check period is given. A plain wait
/// still ends when the provider is aborted by a stopping program.
pub struct EventWaitingStageProvider {
    handle: WaitHandle,
    check_period: Option<Duration>,
    broken: AtomicBool,
    aborted: AtomicBool,
}

impl EventWaitingStageProvider {
    pub fn new(handle: WaitHandle) -> Self {
        Self {
            handle,
            check_period: None,
            broken: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    /// Re-checks for a break every `period` while waiting.
    pub fn breakable(handle: WaitHandle, period: Duration) -> Self {
        Self {
            check_period: Some(period),
            ..Self::new(handle)
        }
    }

    pub fn handle(&self) -> &WaitHandle {
        &self.handle
    }

    fn released(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.is_broken()
    }
}

impl StageProvider for EventWaitingStageProvider {
    fn is_preloadable(&self) -> bool {
        false
    }

    fn is_breakable(&self) -> bool {
        self.check_period.is_some()
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        Err(StagingError::NotPreloadable)
    }

    fn break_off(&self) -> Result<(), StagingError> {
        if !self.is_breakable() {
            return Err(StagingError::NotBreakable);
        }
        self.broken.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        let period = self.check_period.unwrap_or(ABORT_POLL);
        while !self.released() && !self.handle.wait_timeout(period) {}
        Ok(None)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
