use super::provider::{SharedProvider, StageList, StageProvider};
use super::stage::Stage;
use crate::error::StagingError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::vec;

/// Supplies the batches of a `SegmentedStageProvider`.
pub trait SegmentSource: Send {
    /// The next batch, or `None` once there are no more segments.
    fn following(&mut self) -> anyhow::Result<Option<Vec<Stage>>>;
}

impl<F> SegmentSource for F
where
    F: FnMut() -> anyhow::Result<Option<Vec<Stage>>> + Send,
{
    fn following(&mut self) -> anyhow::Result<Option<Vec<Stage>>> {
        self()
    }
}

struct SegmentState {
    source: Box<dyn SegmentSource>,
    current: vec::IntoIter<Stage>,
    finished: bool,
}

/// Pulls stages batch by batch, asking for the next segment only when the
/// current one is used up.
pub struct SegmentedStageProvider {
    state: Mutex<SegmentState>,
    preloadable: bool,
    broken: AtomicBool,
}

impl SegmentedStageProvider {
    pub fn new(source: impl SegmentSource + 'static) -> Self {
        Self {
            state: Mutex::new(SegmentState {
                source: Box::new(source),
                current: Vec::new().into_iter(),
                finished: false,
            }),
            preloadable: false,
            broken: AtomicBool::new(false),
        }
    }

    /// Declares that the segment source is finite and may be drained up front.
    pub fn preloadable(mut self) -> Self {
        self.preloadable = true;
        self
    }
}

impl StageProvider for SegmentedStageProvider {
    fn is_preloadable(&self) -> bool {
        self.preloadable
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        if !self.preloadable {
            return Err(StagingError::NotPreloadable);
        }
        Ok(Arc::new(StageList::preload(self.as_ref())?))
    }

    fn break_off(&self) -> Result<(), StagingError> {
        self.broken.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        let mut state = self.state.lock();
        loop {
            if self.is_broken() || state.finished {
                return Ok(None);
            }
            if let Some(stage) = state.current.next() {
                return Ok(Some(stage));
            }
            match state.source.following()? {
                Some(batch) => state.current = batch.into_iter(),
                None => state.finished = true,
            }
        }
    }
}
