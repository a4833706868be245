//! Error types for the staging and streaming halves of the crate.

use crate::io::StreamerState;
use thiserror::Error;

/// Errors raised by stage providers and the stage program.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("stage provider is not breakable")]
    NotBreakable,
    #[error("stage provider is not preloadable")]
    NotPreloadable,
    #[error("stage provider is already broken")]
    Broken,
    #[error("cannot offer an empty set of stages")]
    EmptyOffer,
    #[error("stage buffer is full (capacity {capacity})")]
    BufferOverflow { capacity: usize },
    #[error("recorder is already attached to a program")]
    AlreadyAttached,
    #[error("recorder is not attached to any program")]
    NotAttached,
    #[error("failed to spawn the stage program worker")]
    Spawn(#[source] std::io::Error),
    #[error("stage program worker panicked")]
    WorkerPanicked,
    #[error("stage provider failed: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Errors raised by streamers and streamer collections.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream '{stream_id}' is in illegal state {state:?}")]
    IllegalState {
        stream_id: String,
        state: StreamerState,
    },
    #[error("the given component is already attached to stream '{stream_id}'")]
    DuplicateAttach { stream_id: String },
    #[error("type mismatch on stream '{stream_id}': value type {expected}, component accepts {actual}")]
    TypeMismatch {
        stream_id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("the streamer collection can only be modified before it is started")]
    CollectionSealed,
    #[error("failed to open the source of stream '{stream_id}'")]
    SourceOpen {
        stream_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to spawn a thread for stream '{stream_id}'")]
    Spawn {
        stream_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a failed `Source::read`.
///
/// `EndOfSource` is the normal way for a source to finish; it is not a fault.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("end of source reached")]
    EndOfSource,
    #[error("acquisition interrupted")]
    Interrupted,
    #[error("device failure: {0}")]
    Device(#[from] anyhow::Error),
}

/// Errors raised by sessions and the session guard.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("'{0}' cannot be blank")]
    BlankField(&'static str),
    #[error("session '{active}' is already running")]
    SessionActive { active: String },
    #[error("session is already started")]
    AlreadyStarted,
    #[error("session is not started")]
    NotStarted,
    #[error("session is already finished")]
    AlreadyFinished,
}
