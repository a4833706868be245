use super::program::{StageChangedEvent, StageListener, StageProgram};
use super::stage::Stage;
use crate::common::ListenerId;
use crate::error::StagingError;
use parking_lot::Mutex;
use std::sync::Arc;

struct RecordingListener {
    stages: Arc<Mutex<Vec<Stage>>>,
}

impl StageListener for RecordingListener {
    fn on_stage_changed(&self, _program: &StageProgram, event: &mut StageChangedEvent) {
        if let Some(stage) = event.stage() {
            self.stages.lock().push(stage.clone());
        }
    }
}

/// Archives every stage pulled by the program it is attached to.
#[derive(Default)]
pub struct StageRecorder {
    stages: Arc<Mutex<Vec<Stage>>>,
    attached: Mutex<Option<(StageProgram, ListenerId)>>,
}

impl StageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, program: &StageProgram) -> Result<(), StagingError> {
        let mut attached = self.attached.lock();
        if attached.is_some() {
            return Err(StagingError::AlreadyAttached);
        }
        let id = program.add_listener(Arc::new(RecordingListener {
            stages: self.stages.clone(),
        }));
        *attached = Some((program.clone(), id));
        Ok(())
    }

    pub fn detach(&self) -> Result<(), StagingError> {
        let (program, id) = self.attached.lock().take().ok_or(StagingError::NotAttached)?;
        program.remove_listener(id);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.lock().is_some()
    }

    /// A copy of the stages recorded so far.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().clone()
    }

    pub fn reset(&self) {
        self.stages.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{SystemClock, TimeUnit};

    #[test]
    fn records_every_non_end_stage() {
        let program = StageProgram::from_stages(
            SystemClock::shared(TimeUnit::Millisecond),
            [Stage::new(0).with_identifier("a"), Stage::new(0).with_identifier("b")],
        );
        let recorder = StageRecorder::new();
        recorder.attach(&program).unwrap();
        assert!(matches!(
            recorder.attach(&program),
            Err(StagingError::AlreadyAttached)
        ));
        program.start().unwrap();
        program.join().unwrap();

        let ids: Vec<_> = recorder
            .stages()
            .iter()
            .filter_map(|s| s.identifier.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        recorder.detach().unwrap();
        assert!(matches!(recorder.detach(), Err(StagingError::NotAttached)));
        recorder.reset();
        assert!(recorder.stages().is_empty());
    }
}
