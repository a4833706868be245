//! The engine that runs one experiment session end to end.

use crate::common::ListenerId;
use crate::config::StageclockConfig;
use crate::error::{StagingError, StreamError};
use crate::events::ProgramEvent;
use crate::io::{Markable, StreamerCollection};
use crate::session::{Session, SessionSlot};
use crate::staging::{markers, SharedProvider, StageChangedEvent, StageListener, StageProgram};
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Forwards the marker of every accepted stage to a markable streamer.
struct MarkerForwarder {
    markable: Arc<dyn Markable>,
}

impl StageListener for MarkerForwarder {
    fn on_stage_changed(&self, _program: &StageProgram, event: &mut StageChangedEvent) {
        let Some(stage) = event.stage() else {
            return;
        };
        let Some(code) = stage.marker else {
            return;
        };
        if let Err(e) = self.markable.mark(stage.identifier.as_deref(), code) {
            warn!(code, error = %e, "Failed to forward stage marker.");
        }
    }
}

/// A cloneable handle controlling a running experiment from other threads.
#[derive(Clone)]
pub struct EngineHandle {
    program: StageProgram,
    streamers: Arc<StreamerCollection>,
    interrupted: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn pause(&self) -> bool {
        self.program.pause()
    }

    pub fn resume(&self) -> bool {
        self.program.resume()
    }

    pub fn skip(&self) -> bool {
        self.program.skip()
    }

    pub fn stop(&self) -> bool {
        self.program.stop()
    }

    /// Stops the program on behalf of the user. The session is finished as
    /// user-interrupted and a `USER_EXIT` mark is recorded.
    pub fn interrupt(&self) -> bool {
        if !self.program.is_started() {
            return false;
        }
        self.interrupted.store(true, Ordering::SeqCst);
        self.mark(Some("UserExit"), markers::USER_EXIT).ok();
        self.program.stop()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Marks an event on the first markable streamer.
    ///
    /// Returns `Ok(None)` when no markable streamer is registered.
    pub fn mark(&self, label: Option<&str>, code: i32) -> Result<Option<i64>, StreamError> {
        match self.streamers.find_markable() {
            Some(markable) => markable.mark(label, code).map(Some),
            None => Ok(None),
        }
    }

    pub fn program(&self) -> &StageProgram {
        &self.program
    }
}

/// Runs a session's stage program against its streamers.
///
/// `run` starts the streamer collection, forwards stage markers to the first
/// markable streamer, runs the program to its end, then stops the streamers
/// and finishes the session. An engine runs once.
#[derive(Clone)]
pub struct ExperimentEngine {
    session: Arc<Session>,
    slot: SessionSlot,
    streamers: Arc<StreamerCollection>,
    handle: EngineHandle,
}

// Core implementation block.
impl ExperimentEngine {
    /// Creates the engine. The stage program runs on the session clock.
    pub fn new(
        session: Arc<Session>,
        slot: SessionSlot,
        config: &StageclockConfig,
        streamers: Arc<StreamerCollection>,
        provider: SharedProvider,
    ) -> Result<Self, StagingError> {
        let program = StageProgram::with_config(session.clock(), provider, &config.program)?;
        let handle = EngineHandle {
            program,
            streamers: streamers.clone(),
            interrupted: Arc::new(AtomicBool::new(false)),
        };
        Ok(Self {
            session,
            slot,
            streamers,
            handle,
        })
    }

    /// Runs the experiment to completion, blocking the calling thread.
    pub fn run(&self) -> anyhow::Result<()> {
        self.session
            .start(&self.slot)
            .context("failed to start the session")?;
        info!(session = %self.session.full_name(), "Experiment starting.");

        let outcome = self.run_program();

        if let Err(e) = self.streamers.stop() {
            error!(error = %e, "Failed to stop every streamer.");
        }
        self.session
            .finish(self.handle.is_interrupted())
            .context("failed to finish the session")?;
        info!(
            session = %self.session.full_name(),
            interrupted = self.handle.is_interrupted(),
            "Experiment finished."
        );
        outcome
    }

    /// Runs the experiment on tokio's blocking pool.
    pub async fn run_async(&self) -> anyhow::Result<()> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.run()).await?
    }

    #[doc(hidden)]
    fn run_program(&self) -> anyhow::Result<()> {
        self.streamers
            .start()
            .context("failed to start the streamers")?;
        let forwarder = self.attach_marker_forwarder();
        self.mark_boundary("SessionStart", markers::SESSION_START);

        let program = &self.handle.program;
        let result = match program.start() {
            Ok(true) => program.join().context("stage program failed"),
            Ok(false) => Err(anyhow::anyhow!("the stage program has already run")),
            Err(e) => Err(e).context("failed to start the stage program"),
        };

        if let Some(id) = forwarder {
            program.remove_listener(id);
        }
        self.mark_boundary("SessionEnd", markers::SESSION_END);
        result
    }

    #[doc(hidden)]
    fn mark_boundary(&self, label: &str, code: i32) {
        if let Err(e) = self.handle.mark(Some(label), code) {
            warn!(code, error = %e, "Failed to mark session boundary.");
        }
    }

    #[doc(hidden)]
    fn attach_marker_forwarder(&self) -> Option<ListenerId> {
        let Some(markable) = self.streamers.find_markable() else {
            debug!("No markable streamer registered; stage markers are not recorded.");
            return None;
        };
        Some(
            self.handle
                .program
                .add_listener(Arc::new(MarkerForwarder { markable })),
        )
    }
}

// Public API implementation block.
impl ExperimentEngine {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn streamers(&self) -> &Arc<StreamerCollection> {
        &self.streamers
    }

    pub fn program(&self) -> &StageProgram {
        &self.handle.program
    }

    /// Stops the program on behalf of the user. See `EngineHandle::interrupt`.
    pub fn interrupt(&self) -> bool {
        self.handle.interrupt()
    }

    /// Subscribes to the program's `ProgramEvent` stream.
    pub fn subscribe_program_events(&self) -> broadcast::Receiver<ProgramEvent> {
        self.handle.program.subscribe_program_events()
    }
}
