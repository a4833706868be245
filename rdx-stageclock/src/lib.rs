//! # Stageclock
//!
//! A real-time stage scheduler with freezable timing and threaded streaming
//! pipelines, built for timed experiment presentations that must stay in step
//! with continuous data streams.
//!
//! ## Core Concepts
//!
//! - **StageProgram**: A worker-thread scheduler that pulls timed `Stage`s from a
//!   `StageProvider` and walks them against a `FreezableClock`. It can be paused,
//!   resumed, skipped and stopped from any thread with millisecond precision.
//! - **Stage Providers**: Lazy, composable stage sequences: fixed lists,
//!   composites, repetitions, externally fed pipelines and event barriers.
//! - **Streaming Pipelines**: A `Streamer` dispatches values through a
//!   priority-ordered filter chain to its consumers. An `AsyncStreamer` reads a
//!   `Source` on its own producer thread and dispatches on a consumer thread.
//! - **Event-Driven**: Synchronous `StageListener` callbacks can steer a program;
//!   every program and streamer event is also mirrored on a
//!   `tokio::sync::broadcast` channel for asynchronous observers.
//! - **Configuration-Driven**: Scheduler timing, queue sizes and backpressure are
//!   defined by a `StageclockConfig`, usually loaded from a TOML file.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use stageclock::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // 1. A fixed timeline on the system clock.
//!     let program = StageProgram::from_stages(
//!         SystemClock::shared(TimeUnit::Millisecond),
//!         [
//!             Stage::new(500).with_cue("Ready"),
//!             Stage::new(1000).with_cue("Go").with_marker(markers::TRIAL_START),
//!         ],
//!     );
//!
//!     // 2. Observe it synchronously.
//!     program.on_stage_changed(|event| println!("{:?}", event.stage()));
//!
//!     // 3. Run it to the end.
//!     program.start()?;
//!     program.join()?;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Stage Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod io;
pub mod session;
pub mod staging;
pub mod sync;
pub mod time;

/// A prelude module for easy importing of the most common Stageclock types.
pub mod prelude {
    pub use crate::common::{Capability, ListenerId, Mark, Priority, Timestamped};
    pub use crate::config::{BackpressurePolicy, StageclockConfig};
    pub use crate::engine::{EngineHandle, ExperimentEngine};
    pub use crate::error::{AcquireError, SessionError, StagingError, StreamError};
    pub use crate::events::{ProgramEvent, StreamerEvent};
    pub use crate::io::{
        AsyncStreamer, CollectionState, Consumer, Filter, Markable, MarkerStreamer, Source,
        Stream, Streamer, StreamerCollection, StreamerState, TimestampedStreamer,
    };
    pub use crate::session::{Session, SessionSlot, SessionState};
    pub use crate::staging::{
        markers, SharedProvider, Stage, StageAction, StageListener, StageProgram,
        StageProvider,
    };
    pub use crate::sync::{CancellationToken, WaitHandle};
    pub use crate::time::{Clock, FreezableClock, SharedClock, SystemClock, TimeUnit};
}
