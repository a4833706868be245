use super::async_streamer::AsyncStreamer;
use super::source::Source;
use super::{Stream, StreamerState};
use crate::common::Timestamped;
use crate::config::StreamingConfig;
use crate::error::{AcquireError, StreamError};
use crate::sync::CancellationToken;
use crate::time::{Clock, SharedClock};
use std::ops::Deref;

/// Stamps every value read from the inner source with the clock time.
struct StampingSource<S> {
    inner: S,
    clock: SharedClock,
}

impl<T, S> Source<Timestamped<T>> for StampingSource<S>
where
    T: 'static,
    S: Source<T>,
{
    fn open(&mut self) -> anyhow::Result<()> {
        self.inner.open()
    }

    fn read(&mut self, cancel: &CancellationToken) -> Result<Timestamped<T>, AcquireError> {
        let value = self.inner.read(cancel)?;
        Ok(Timestamped::new(self.clock.time(), value))
    }

    fn shutdown(&mut self) {
        self.inner.shutdown()
    }
}

/// An `AsyncStreamer` whose values carry the time they were acquired,
/// read from a clock independent of any stage program.
pub struct TimestampedStreamer<T: Send + 'static> {
    inner: AsyncStreamer<Timestamped<T>>,
    clock: SharedClock,
}

impl<T: Send + 'static> TimestampedStreamer<T> {
    pub fn new(
        stream_id: impl Into<String>,
        clock: SharedClock,
        source: impl Source<T>,
        config: &StreamingConfig,
    ) -> Self {
        let source = StampingSource {
            inner: source,
            clock: clock.clone(),
        };
        Self {
            inner: AsyncStreamer::new(stream_id, source, config),
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn with_timestamp(&self, value: T) -> Timestamped<T> {
        Timestamped::new(self.clock.time(), value)
    }

    /// Stamps and injects a value. Returns the timestamp it was given.
    pub fn enqueue_value(&self, value: T) -> Result<i64, StreamError> {
        let stamped = self.with_timestamp(value);
        let timestamp = stamped.timestamp;
        self.inner.enqueue(stamped)?;
        Ok(timestamp)
    }

    pub fn try_enqueue_value(&self, value: T) -> Option<i64> {
        self.enqueue_value(value).ok()
    }
}

impl<T: Send + 'static> Deref for TimestampedStreamer<T> {
    type Target = AsyncStreamer<Timestamped<T>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Send + 'static> Stream for TimestampedStreamer<T> {
    fn stream_id(&self) -> &str {
        Stream::stream_id(&self.inner)
    }

    fn value_type(&self) -> &'static str {
        Stream::value_type(&self.inner)
    }

    fn state(&self) -> StreamerState {
        self.inner.state()
    }

    fn start(&self) -> Result<(), StreamError> {
        self.inner.start()
    }

    fn stop(&self) -> Result<(), StreamError> {
        self.inner.stop()
    }

    fn consumer_count(&self) -> usize {
        Stream::consumer_count(&self.inner)
    }
}
