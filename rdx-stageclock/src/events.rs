//! Defines the public event types broadcast by stage programs and streamers.
//!
//! These are the asynchronous mirror of the synchronous listener callbacks:
//! anyone can subscribe to them, but they are informational only. A receiver
//! that lags behind simply misses events; it can never stall a program's
//! worker thread or a streamer's consumer thread.

use crate::staging::{Stage, StageAction};

/// Lifecycle and timeline events of a `StageProgram`.
#[derive(Debug, Clone)]
pub enum ProgramEvent {
    /// The worker thread started; `start_time` is the absolute clock time in ms.
    Started { start_time: i64 },
    /// A stage was pulled from the provider (`stage` is `None` at the end).
    ///
    /// `action` is the final decision made by the synchronous listeners.
    StageChanged {
        program_time: u64,
        stage: Option<Stage>,
        action: StageAction,
    },
    /// The program clock was frozen.
    Paused { program_time: u64 },
    /// The program clock was unfrozen.
    Resumed { program_time: u64 },
    /// The worker thread exited normally.
    Stopped,
    /// The worker thread exited because of an unhandled provider error.
    Faulted { message: String },
}

/// Lifecycle events of an `AsyncStreamer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamerEvent {
    Started { stream_id: String },
    Stopping { stream_id: String },
    Stopped { stream_id: String },
}

impl StreamerEvent {
    pub fn stream_id(&self) -> &str {
        match self {
            StreamerEvent::Started { stream_id }
            | StreamerEvent::Stopping { stream_id }
            | StreamerEvent::Stopped { stream_id } => stream_id,
        }
    }
}
