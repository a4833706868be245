//! Streaming pipelines: priority-ordered filters and consumers, asynchronous
//! producer/consumer streamers and the collection that starts them together.

pub mod async_streamer;
pub mod collection;
pub mod component;
pub mod markable;
pub mod source;
pub mod streamer;
pub mod timestamped;

pub use async_streamer::AsyncStreamer;
pub use collection::{CollectionState, StreamerCollection};
pub use component::{
    CachedConsumer, Consumer, ConsumerExt, DelegatedConsumer, DelegatedFilter, ErasedConsumer,
    ErasedFilter, Filter, LogWriter, MappedConsumer, RecordingConsumer,
};
pub use markable::{HeartbeatSource, Markable, MarkerStreamer};
pub use source::{source_fn, FnSource, IterSource, NoSource, Source};
pub use streamer::Streamer;
pub use timestamped::TimestampedStreamer;

use crate::error::StreamError;

/// Lifecycle state of a streamer. Streamers are not restartable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    Initialized,
    Started,
    /// Stop requested; the producer has not exited yet.
    Stopping,
    Stopped,
}

/// Type-erased view of a streamer, used by `StreamerCollection`.
pub trait Stream: Send + Sync {
    fn stream_id(&self) -> &str;

    /// Name of the value type flowing through the stream.
    fn value_type(&self) -> &'static str;

    fn state(&self) -> StreamerState;

    fn start(&self) -> Result<(), StreamError>;

    fn stop(&self) -> Result<(), StreamError>;

    fn consumer_count(&self) -> usize;
}
