//! The stage program: a worker-thread scheduler that walks a provider's
//! stages against a freezable millisecond clock.

use super::provider::{try_preload, CompositeStageProvider, SharedProvider, StageList};
use super::stage::Stage;
use crate::common::ListenerId;
use crate::config::ProgramConfig;
use crate::error::StagingError;
use crate::events::ProgramEvent;
use crate::time::{with_unit, Clock, FreezableClock, SharedClock, TimeUnit};
use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Longest time the worker stays parked on a frozen clock before re-checking
/// for a stop request.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the program does with a freshly pulled stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageAction {
    /// Make the stage current and wait out its duration.
    #[default]
    Accept,
    /// Discard the stage and pull the next one immediately.
    Skip,
    /// Make the stage current but freeze the program at its start.
    Pause,
    /// Stop the whole program.
    Terminate,
}

/// Passed to listeners each time the program pulls a stage.
#[derive(Debug, Clone)]
pub struct StageChangedEvent {
    program_time: u64,
    stage: Option<Stage>,
    action: StageAction,
}

impl StageChangedEvent {
    fn new(program_time: u64, stage: Option<Stage>) -> Self {
        Self {
            program_time,
            stage,
            action: StageAction::Accept,
        }
    }

    /// Program time (ms since start, excluding pauses) at which the stage was pulled.
    pub fn program_time(&self) -> u64 {
        self.program_time
    }

    pub fn stage(&self) -> Option<&Stage> {
        self.stage.as_ref()
    }

    /// `true` when the provider is exhausted. The program terminates
    /// regardless of the action chosen.
    pub fn is_end_reached(&self) -> bool {
        self.stage.is_none()
    }

    pub fn action(&self) -> StageAction {
        self.action
    }

    pub fn set_action(&mut self, action: StageAction) {
        self.action = action;
    }
}

/// Synchronous observer of a `StageProgram`.
///
/// Every callback runs on the program's worker thread, so a slow listener
/// delays the timeline.
pub trait StageListener: Send + Sync {
    fn on_started(&self, _program: &StageProgram) {}

    fn on_stage_changed(&self, _program: &StageProgram, _event: &mut StageChangedEvent) {}

    fn on_stopped(&self, _program: &StageProgram) {}

    /// Returns `true` to mark the error handled, letting the program go on.
    fn on_unhandled_error(&self, _program: &StageProgram, _error: &StagingError) -> bool {
        false
    }
}

struct StageChangedFn<F>(F);

impl<F> StageListener for StageChangedFn<F>
where
    F: Fn(&mut StageChangedEvent) + Send + Sync,
{
    fn on_stage_changed(&self, _program: &StageProgram, event: &mut StageChangedEvent) {
        (self.0)(event)
    }
}

struct ErrorHandlerFn<F>(F);

impl<F> StageListener for ErrorHandlerFn<F>
where
    F: Fn(&StagingError) -> bool + Send + Sync,
{
    fn on_unhandled_error(&self, _program: &StageProgram, error: &StagingError) -> bool {
        (self.0)(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    NotStarted,
    Running,
    Stopped,
}

enum Flow {
    Continue,
    Stop,
}

struct ProgramInner {
    original_clock: SharedClock,
    clock: FreezableClock,
    provider: SharedProvider,
    sleep_wait_period_ms: AtomicU64,
    run_state: Mutex<RunState>,
    stop_requested: AtomicBool,
    skip_requested: AtomicBool,
    start_time: AtomicI64,
    next_update_time: AtomicU64,
    current_stage: Mutex<Option<Stage>>,
    listeners: RwLock<SlotMap<ListenerId, Arc<dyn StageListener>>>,
    event_sender: broadcast::Sender<ProgramEvent>,
    worker: Mutex<Option<JoinHandle<Result<(), StagingError>>>>,
}

/// A timeline defined by the stages of a provider.
///
/// The program is a cheap, cloneable handle: every clone controls the same
/// worker. It can be started once; after it stops it stays stopped.
#[derive(Clone)]
pub struct StageProgram {
    inner: Arc<ProgramInner>,
}

impl StageProgram {
    /// Creates a program with the default `ProgramConfig`.
    pub fn new(clock: SharedClock, provider: SharedProvider) -> Result<Self, StagingError> {
        Self::with_config(clock, provider, &ProgramConfig::default())
    }

    pub fn with_config(
        clock: SharedClock,
        provider: SharedProvider,
        config: &ProgramConfig,
    ) -> Result<Self, StagingError> {
        let provider = if config.prefer_preloaded {
            try_preload(provider)?
        } else {
            provider
        };
        Ok(Self::build(clock, provider, config.sleep_wait_period_ms))
    }

    /// A program over a fixed list of stages.
    pub fn from_stages(clock: SharedClock, stages: impl IntoIterator<Item = Stage>) -> Self {
        Self::build(
            clock,
            StageList::shared(stages),
            ProgramConfig::default().sleep_wait_period_ms,
        )
    }

    /// A program running `providers` one after another.
    pub fn from_providers(
        clock: SharedClock,
        providers: impl IntoIterator<Item = SharedProvider>,
    ) -> Result<Self, StagingError> {
        Self::new(clock, CompositeStageProvider::shared(providers))
    }

    fn build(original_clock: SharedClock, provider: SharedProvider, sleep_wait_period_ms: u64) -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let clock = FreezableClock::new(with_unit(original_clock.clone(), TimeUnit::Millisecond));
        Self {
            inner: Arc::new(ProgramInner {
                original_clock,
                clock,
                provider,
                sleep_wait_period_ms: AtomicU64::new(sleep_wait_period_ms),
                run_state: Mutex::new(RunState::NotStarted),
                stop_requested: AtomicBool::new(false),
                skip_requested: AtomicBool::new(false),
                start_time: AtomicI64::new(0),
                next_update_time: AtomicU64::new(0),
                current_stage: Mutex::new(None),
                listeners: RwLock::new(SlotMap::with_key()),
                event_sender,
                worker: Mutex::new(None),
            }),
        }
    }

    /// The clock passed in at construction.
    pub fn original_clock(&self) -> &SharedClock {
        &self.inner.original_clock
    }

    /// The pausable millisecond clock the program actually runs on.
    pub fn clock(&self) -> &FreezableClock {
        &self.inner.clock
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.inner.provider
    }

    /// Current time of the program clock, in ms.
    pub fn time(&self) -> i64 {
        self.inner.clock.time()
    }

    /// Absolute program clock time at which the program was started.
    pub fn start_time(&self) -> i64 {
        self.inner.start_time.load(Ordering::SeqCst)
    }

    /// Milliseconds since start, excluding every paused interval.
    pub fn program_time(&self) -> u64 {
        (self.time() - self.start_time()).max(0) as u64
    }

    pub fn is_started(&self) -> bool {
        *self.inner.run_state.lock() == RunState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.is_started() && self.inner.clock.is_frozen()
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.inner.current_stage.lock().clone()
    }

    pub fn sleep_wait_period(&self) -> Duration {
        Duration::from_millis(self.inner.sleep_wait_period_ms.load(Ordering::Relaxed))
    }

    /// Sets how coarsely the worker sleeps before switching to busy waiting.
    /// Zero disables sleeping entirely.
    pub fn set_sleep_wait_period(&self, period: Duration) {
        self.inner
            .sleep_wait_period_ms
            .store(period.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn add_listener(&self, listener: Arc<dyn StageListener>) -> ListenerId {
        let id = self.inner.listeners.write().insert(listener);
        trace!(?id, "Stage listener added.");
        id
    }

    /// Registers a closure called for every stage change.
    pub fn on_stage_changed<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&mut StageChangedEvent) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(StageChangedFn(f)))
    }

    /// Registers a closure deciding whether a provider error is handled.
    pub fn on_unhandled_error<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&StagingError) -> bool + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(ErrorHandlerFn(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.write().remove(id).is_some()
    }

    /// Subscribes to the broadcast mirror of the program's events.
    pub fn subscribe_program_events(&self) -> broadcast::Receiver<ProgramEvent> {
        self.inner.event_sender.subscribe()
    }

    /// Starts the worker thread. Returns `Ok(false)` if the program was
    /// already started, or has already run.
    pub fn start(&self) -> Result<bool, StagingError> {
        let mut state = self.inner.run_state.lock();
        if *state != RunState::NotStarted {
            return Ok(false);
        }
        *self.inner.current_stage.lock() = None;
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.skip_requested.store(false, Ordering::SeqCst);
        self.inner.next_update_time.store(0, Ordering::SeqCst);
        self.inner
            .start_time
            .store(self.inner.clock.time(), Ordering::SeqCst);

        let program = self.clone();
        let handle = thread::Builder::new()
            .name("stage-program".to_string())
            .spawn(move || program.run_worker())
            .map_err(StagingError::Spawn)?;
        *state = RunState::Running;
        *self.inner.worker.lock() = Some(handle);
        info!("StageProgram started.");
        Ok(true)
    }

    /// Requests the worker to stop and aborts the provider, releasing a worker
    /// blocked on it. Does not wait for the worker; use `join` for that.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.run_state.lock();
        if *state != RunState::Running {
            return false;
        }
        *state = RunState::Stopped;
        drop(state);
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        *self.inner.current_stage.lock() = None;
        self.inner.clock.unfreeze();
        // The worker may be parked inside the provider waiting for a stage.
        self.inner.provider.abort();
        info!("StageProgram stop requested.");
        true
    }

    /// Freezes the program clock. The current stage's remaining time is kept.
    pub fn pause(&self) -> bool {
        if !self.is_started() || !self.inner.clock.freeze() {
            return false;
        }
        let program_time = self.program_time();
        debug!(program_time, "StageProgram paused.");
        self.inner
            .event_sender
            .send(ProgramEvent::Paused { program_time })
            .ok();
        true
    }

    pub fn resume(&self) -> bool {
        if !self.is_started() || !self.inner.clock.unfreeze() {
            return false;
        }
        let program_time = self.program_time();
        debug!(program_time, "StageProgram resumed.");
        self.inner
            .event_sender
            .send(ProgramEvent::Resumed { program_time })
            .ok();
        true
    }

    /// Ends the current stage early. Returns `false` if a skip is already pending.
    pub fn skip(&self) -> bool {
        self.is_started() && !self.inner.skip_requested.swap(true, Ordering::SeqCst)
    }

    /// Waits for the worker thread to exit and returns its outcome.
    ///
    /// Returns immediately when the program never started or was already
    /// joined, or when called from the worker thread itself.
    pub fn join(&self) -> Result<(), StagingError> {
        let mut worker = self.inner.worker.lock();
        let Some(handle) = worker.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            *worker = Some(handle);
            return Ok(());
        }
        drop(worker);
        handle.join().map_err(|_| StagingError::WorkerPanicked)?
    }

    fn listeners(&self) -> Vec<Arc<dyn StageListener>> {
        self.inner.listeners.read().values().cloned().collect()
    }

    fn stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    fn skip_requested(&self) -> bool {
        self.inner.skip_requested.load(Ordering::SeqCst)
    }

    fn run_worker(self) -> Result<(), StagingError> {
        for listener in self.listeners() {
            listener.on_started(&self);
        }
        self.inner
            .event_sender
            .send(ProgramEvent::Started {
                start_time: self.start_time(),
            })
            .ok();

        let result = loop {
            if self.stop_requested() {
                break Ok(());
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        *self.inner.run_state.lock() = RunState::Stopped;
        *self.inner.current_stage.lock() = None;
        self.inner.clock.unfreeze();
        for listener in self.listeners() {
            listener.on_stopped(&self);
        }
        match &result {
            Ok(()) => {
                info!("StageProgram stopped.");
                self.inner.event_sender.send(ProgramEvent::Stopped).ok();
            }
            Err(e) => {
                error!(error = %e, "StageProgram stopped by an unhandled error.");
                self.inner
                    .event_sender
                    .send(ProgramEvent::Faulted {
                        message: e.to_string(),
                    })
                    .ok();
            }
        }
        result
    }

    /// One pass of the scheduling loop: wait for the current deadline, then
    /// pull the next stage.
    fn step(&self) -> Result<Flow, StagingError> {
        if self.inner.clock.is_frozen() {
            self.inner.clock.wait_unfrozen(Some(PAUSE_SLICE));
            return Ok(Flow::Continue);
        }

        let next_update = self.inner.next_update_time.load(Ordering::SeqCst);
        let mut now = self.program_time();

        let sleep_period = self.inner.sleep_wait_period_ms.load(Ordering::Relaxed);
        if sleep_period > 0 {
            while !self.skip_requested() && next_update.saturating_sub(now) > sleep_period * 2 {
                thread::sleep(Duration::from_millis(sleep_period));
                if self.inner.clock.is_frozen() || self.stop_requested() {
                    return Ok(Flow::Continue);
                }
                now = self.program_time();
            }
        }

        while now < next_update && !self.skip_requested() {
            if self.inner.clock.is_frozen() || self.stop_requested() {
                return Ok(Flow::Continue);
            }
            std::hint::spin_loop();
            now = self.program_time();
        }

        self.advance()
    }

    fn advance(&self) -> Result<Flow, StagingError> {
        self.inner.skip_requested.store(false, Ordering::SeqCst);
        loop {
            if self.stop_requested() {
                return Ok(Flow::Stop);
            }
            let stage = match self.inner.provider.next() {
                Ok(_) if self.stop_requested() => return Ok(Flow::Stop),
                Ok(stage) => stage,
                Err(_) if self.stop_requested() => return Ok(Flow::Stop),
                Err(e) => {
                    if self.report_error(&e) {
                        warn!(error = %e, "Stage provider error handled by a listener.");
                        return Ok(Flow::Continue);
                    }
                    return Err(e);
                }
            };

            let now = self.program_time();
            let mut event = StageChangedEvent::new(now, stage);
            for listener in self.listeners() {
                listener.on_stage_changed(self, &mut event);
            }
            if event.is_end_reached() {
                event.action = StageAction::Terminate;
            }
            let StageChangedEvent { stage, action, .. } = event;
            debug!(
                program_time = now,
                stage = ?stage.as_ref().and_then(|s| s.identifier.as_deref()),
                ?action,
                "Stage changed."
            );
            self.inner
                .event_sender
                .send(ProgramEvent::StageChanged {
                    program_time: now,
                    stage: stage.clone(),
                    action,
                })
                .ok();

            match action {
                StageAction::Terminate => {
                    self.stop();
                    return Ok(Flow::Stop);
                }
                StageAction::Skip => continue,
                StageAction::Pause | StageAction::Accept => {
                    let duration = stage.as_ref().map_or(0, |s| s.duration);
                    *self.inner.current_stage.lock() = stage;
                    self.inner
                        .next_update_time
                        .store(now + duration, Ordering::SeqCst);
                    if action == StageAction::Pause {
                        self.pause();
                    }
                    return Ok(Flow::Continue);
                }
            }
        }
    }

    fn report_error(&self, error: &StagingError) -> bool {
        let mut handled = false;
        for listener in self.listeners() {
            handled |= listener.on_unhandled_error(self, error);
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::provider::StageProvider;
    use crate::time::SystemClock;
    use std::sync::atomic::AtomicUsize;

    struct FailingProvider {
        calls: AtomicUsize,
    }

    impl StageProvider for FailingProvider {
        fn is_preloadable(&self) -> bool {
            false
        }
        fn is_breakable(&self) -> bool {
            false
        }
        fn is_broken(&self) -> bool {
            false
        }
        fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
            Err(StagingError::NotPreloadable)
        }
        fn break_off(&self) -> Result<(), StagingError> {
            Err(StagingError::NotBreakable)
        }
        fn next(&self) -> Result<Option<Stage>, StagingError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(anyhow::anyhow!("transient").into()),
                1 => Ok(Some(Stage::new(0))),
                _ => Ok(None),
            }
        }
    }

    fn clock() -> SharedClock {
        SystemClock::shared(TimeUnit::Nanosecond)
    }

    #[test]
    fn end_event_forces_terminate() {
        let event = StageChangedEvent::new(10, None);
        assert!(event.is_end_reached());
        assert_eq!(event.action(), StageAction::Accept);
    }

    #[test]
    fn program_runs_once() {
        let program = StageProgram::from_stages(clock(), [Stage::new(0), Stage::new(0)]);
        assert!(program.start().unwrap());
        assert!(!program.start().unwrap());
        program.join().unwrap();
        assert!(!program.is_started());
        assert!(!program.start().unwrap());
        assert!(!program.stop());
    }

    #[test]
    fn control_calls_are_rejected_before_start() {
        let program = StageProgram::from_stages(clock(), [Stage::new(10)]);
        assert!(!program.pause());
        assert!(!program.resume());
        assert!(!program.skip());
        assert!(!program.stop());
        program.join().unwrap();
    }

    #[test]
    fn unhandled_provider_error_faults_the_program() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let program = StageProgram::new(clock(), provider).unwrap();
        let mut events = program.subscribe_program_events();
        program.start().unwrap();
        assert!(matches!(program.join(), Err(StagingError::Provider(_))));

        let mut faulted = false;
        while let Ok(event) = events.try_recv() {
            faulted |= matches!(event, ProgramEvent::Faulted { .. });
        }
        assert!(faulted);
    }

    #[test]
    fn handled_provider_error_lets_the_program_continue() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let program = StageProgram::new(clock(), provider.clone()).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = errors.clone();
            program.on_unhandled_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
                true
            });
        }
        program.start().unwrap();
        program.join().unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let program = StageProgram::from_stages(clock(), [Stage::new(0)]);
        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = calls.clone();
            program.on_stage_changed(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(program.remove_listener(id));
        assert!(!program.remove_listener(id));
        program.start().unwrap();
        program.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
