use super::provider::{SharedProvider, StageList, StageProvider};
use super::stage::Stage;
use crate::error::StagingError;
use crate::sync::WaitHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::vec;

/// How often a gated provider re-checks whether it was broken off.
const GATE_POLL: Duration = Duration::from_millis(50);

/// Number of repetitions of a `RepeatingStageProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Unlimited,
    Times(u32),
}

type Generator = Box<dyn Fn(u32) -> Vec<Stage> + Send + Sync>;

enum Repetition {
    Simple(Vec<Stage>),
    Advanced(Generator),
}

struct RepeatState {
    current: vec::IntoIter<Stage>,
    next_index: u32,
}

/// Repeats a block of stages, either a fixed set or one generated per
/// repetition index.
pub struct RepeatingStageProvider {
    repetition: Repetition,
    count: RepeatCount,
    gate: Option<WaitHandle>,
    state: Mutex<RepeatState>,
    broken: AtomicBool,
}

impl RepeatingStageProvider {
    fn with_repetition(repetition: Repetition, count: RepeatCount) -> Self {
        Self {
            repetition,
            count,
            gate: None,
            state: Mutex::new(RepeatState {
                current: Vec::new().into_iter(),
                next_index: 0,
            }),
            broken: AtomicBool::new(false),
        }
    }

    pub fn simple(stages: impl IntoIterator<Item = Stage>, count: RepeatCount) -> Self {
        Self::with_repetition(Repetition::Simple(stages.into_iter().collect()), count)
    }

    pub fn unlimited(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self::simple(stages, RepeatCount::Unlimited)
    }

    /// Calls `generator` with the zero-based repetition index to produce each block.
    pub fn advanced<F>(generator: F, count: RepeatCount) -> Self
    where
        F: Fn(u32) -> Vec<Stage> + Send + Sync + 'static,
    {
        Self::with_repetition(Repetition::Advanced(Box::new(generator)), count)
    }

    /// Waits on `gate` before starting every repetition.
    pub fn with_gate(mut self, gate: WaitHandle) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn count(&self) -> RepeatCount {
        self.count
    }

    pub fn is_unlimited(&self) -> bool {
        self.count == RepeatCount::Unlimited
    }

    /// A dynamic provider cannot know its stages in advance.
    pub fn is_dynamic(&self) -> bool {
        self.is_unlimited() || matches!(self.repetition, Repetition::Advanced(_))
    }

    fn exhausted(&self, next_index: u32) -> bool {
        match self.count {
            RepeatCount::Unlimited => false,
            RepeatCount::Times(n) => next_index >= n,
        }
    }

    /// Returns `false` if the provider was broken while waiting.
    fn pass_gate(&self) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };
        while !self.is_broken() {
            if gate.wait_timeout(GATE_POLL) {
                return true;
            }
        }
        false
    }

    fn block(&self, index: u32) -> Vec<Stage> {
        match &self.repetition {
            Repetition::Simple(stages) => stages.clone(),
            Repetition::Advanced(generator) => generator(index),
        }
    }
}

impl StageProvider for RepeatingStageProvider {
    fn is_preloadable(&self) -> bool {
        !self.is_dynamic() && self.gate.is_none()
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        if !self.is_preloadable() {
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
        while !self.is_broken() {
            if let Some(stage) = state.current.next() {
                return Ok(Some(stage));
            }
            if self.exhausted(state.next_index) {
                return Ok(None);
            }
            if !self.pass_gate() {
                break;
            }
            let index = state.next_index;
            state.current = self.block(index).into_iter();
            state.next_index = index.saturating_add(1);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::provider::{drain_stages, try_preload};
    use std::thread;

    #[test]
    fn simple_repeats_fixed_block() {
        let provider =
            RepeatingStageProvider::simple([Stage::new(1), Stage::new(2)], RepeatCount::Times(3));
        let stages = drain_stages(&provider).unwrap();
        assert_eq!(
            stages.iter().map(|s| s.duration).collect::<Vec<_>>(),
            vec![1, 2, 1, 2, 1, 2]
        );
        assert!(provider.next().unwrap().is_none());
    }

    #[test]
    fn advanced_generates_by_index() {
        let provider =
            RepeatingStageProvider::advanced(|i| vec![Stage::new(i as u64 * 10)], RepeatCount::Times(3));
        assert!(provider.is_dynamic());
        assert!(!provider.is_preloadable());
        let stages = drain_stages(&provider).unwrap();
        assert_eq!(
            stages.iter().map(|s| s.duration).collect::<Vec<_>>(),
            vec![0, 10, 20]
        );
    }

    #[test]
    fn empty_repetitions_do_not_spin_forever() {
        let provider = RepeatingStageProvider::simple(Vec::new(), RepeatCount::Times(4));
        assert!(provider.next().unwrap().is_none());
    }

    #[test]
    fn preloadability_follows_count() {
        let limited: SharedProvider = Arc::new(RepeatingStageProvider::simple(
            [Stage::new(5)],
            RepeatCount::Times(2),
        ));
        let preloaded = try_preload(limited).unwrap();
        assert_eq!(drain_stages(preloaded.as_ref()).unwrap().len(), 2);

        let unlimited = Arc::new(RepeatingStageProvider::unlimited([Stage::new(5)]));
        assert!(!unlimited.is_preloadable());
        assert!(matches!(
            unlimited.preloaded(),
            Err(StagingError::NotPreloadable)
        ));
    }

    #[test]
    fn unlimited_stops_when_broken() {
        let provider = RepeatingStageProvider::unlimited([Stage::new(1)]);
        for _ in 0..10 {
            assert!(provider.next().unwrap().is_some());
        }
        provider.break_off().unwrap();
        assert!(provider.next().unwrap().is_none());
    }

    #[test]
    fn gate_holds_each_repetition() {
        let gate = WaitHandle::auto();
        let provider = Arc::new(
            RepeatingStageProvider::simple([Stage::new(1)], RepeatCount::Times(2))
                .with_gate(gate.clone()),
        );
        gate.set();
        assert!(provider.next().unwrap().is_some());

        let breaker = {
            let provider = provider.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                provider.break_off().unwrap();
            })
        };
        assert!(provider.next().unwrap().is_none());
        breaker.join().unwrap();
    }
}
