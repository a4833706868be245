use super::provider::{SharedProvider, StageProvider};
use super::stage::Stage;
use crate::config::PipelineConfig;
use crate::error::StagingError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

type PollHook = Box<dyn Fn(&Stage) + Send + Sync>;

#[derive(Default)]
struct Buffer {
    stages: VecDeque<Stage>,
    broken: bool,
}

/// A provider fed from outside through a bounded buffer.
///
/// `next()` blocks until a stage is offered or the provider is broken off and
/// drained; stages offered before the break are still delivered.
pub struct PipelinedStageProvider {
    buffer: Mutex<Buffer>,
    available: Condvar,
    capacity: usize,
    poll_interval: Duration,
    on_polled: Option<PollHook>,
}

impl PipelinedStageProvider {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            available: Condvar::new(),
            capacity,
            poll_interval,
            on_polled: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.buffer_capacity, config.poll_interval())
    }

    /// Registers a hook invoked with every stage handed out by `next()`.
    pub fn on_polled(mut self, hook: impl Fn(&Stage) + Send + Sync + 'static) -> Self {
        self.on_polled = Some(Box::new(hook));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stages waiting to be polled.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().stages.len()
    }

    /// Appends `stages` to the buffer. All or nothing: on error no stage is added.
    pub fn offer(&self, stages: impl IntoIterator<Item = Stage>) -> Result<(), StagingError> {
        let stages: Vec<Stage> = stages.into_iter().collect();
        if stages.is_empty() {
            return Err(StagingError::EmptyOffer);
        }
        let mut buffer = self.buffer.lock();
        if buffer.broken {
            return Err(StagingError::Broken);
        }
        if buffer.stages.len() + stages.len() > self.capacity {
            return Err(StagingError::BufferOverflow {
                capacity: self.capacity,
            });
        }
        trace!(count = stages.len(), "Stages offered to pipeline.");
        buffer.stages.extend(stages);
        self.available.notify_all();
        Ok(())
    }
}

impl StageProvider for PipelinedStageProvider {
    fn is_preloadable(&self) -> bool {
        false
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        self.buffer.lock().broken
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        Err(StagingError::NotPreloadable)
    }

    fn break_off(&self) -> Result<(), StagingError> {
        let mut buffer = self.buffer.lock();
        if !buffer.broken {
            buffer.broken = true;
            self.available.notify_all();
        }
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        let mut buffer = self.buffer.lock();
        loop {
            if let Some(stage) = buffer.stages.pop_front() {
                drop(buffer);
                if let Some(hook) = &self.on_polled {
                    hook(&stage);
                }
                return Ok(Some(stage));
            }
            if buffer.broken {
                return Ok(None);
            }
            self.available.wait_for(&mut buffer, self.poll_interval);
        }
    }

    /// Breaks the pipeline and discards whatever is still buffered.
    fn abort(&self) {
        let mut buffer = self.buffer.lock();
        buffer.broken = true;
        buffer.stages.clear();
        self.available.notify_all();
    }
}
