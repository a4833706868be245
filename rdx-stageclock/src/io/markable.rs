//! Manual event marking: the `Markable` protocol, the marker streamer and a
//! periodic heartbeat mark source.

use super::source::{NoSource, Source};
use super::timestamped::TimestampedStreamer;
use super::{Stream, StreamerState};
use crate::common::Mark;
use crate::config::StreamingConfig;
use crate::error::{AcquireError, StreamError};
use crate::staging::markers;
use crate::sync::CancellationToken;
use crate::time::SharedClock;
use std::ops::Deref;
use std::time::{Duration, Instant};

/// A stream that accepts manual event marks.
pub trait Markable: Send + Sync {
    /// Records a mark and returns the timestamp it was given.
    fn mark(&self, label: Option<&str>, code: i32) -> Result<i64, StreamError>;
}

/// Streams timestamped marks, either injected through `Markable::mark` or
/// read from an optional mark source.
pub struct MarkerStreamer {
    inner: TimestampedStreamer<Mark>,
}

impl MarkerStreamer {
    pub const DEFAULT_STREAM_ID: &'static str = "markers";

    pub fn new(clock: SharedClock, config: &StreamingConfig) -> Self {
        Self::with_source(Self::DEFAULT_STREAM_ID, clock, NoSource::new(), config)
    }

    pub fn with_source(
        stream_id: impl Into<String>,
        clock: SharedClock,
        source: impl Source<Mark>,
        config: &StreamingConfig,
    ) -> Self {
        Self {
            inner: TimestampedStreamer::new(stream_id, clock, source, config),
        }
    }
}

impl Markable for MarkerStreamer {
    fn mark(&self, label: Option<&str>, code: i32) -> Result<i64, StreamError> {
        let mark = Mark {
            label: label.map(str::to_string),
            code,
        };
        self.inner.enqueue_value(mark)
    }
}

impl Deref for MarkerStreamer {
    type Target = TimestampedStreamer<Mark>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Stream for MarkerStreamer {
    fn stream_id(&self) -> &str {
        Stream::stream_id(&self.inner)
    }

    fn value_type(&self) -> &'static str {
        Stream::value_type(&self.inner)
    }

    fn state(&self) -> StreamerState {
        Stream::state(&self.inner)
    }

    fn start(&self) -> Result<(), StreamError> {
        Stream::start(&self.inner)
    }

    fn stop(&self) -> Result<(), StreamError> {
        Stream::stop(&self.inner)
    }

    fn consumer_count(&self) -> usize {
        Stream::consumer_count(&self.inner)
    }
}

/// Emits the same mark at a fixed minimum interval.
pub struct HeartbeatSource {
    mark: Mark,
    interval: Duration,
    next_beat: Option<Instant>,
}

impl HeartbeatSource {
    pub fn new(interval: Duration) -> Self {
        Self::with_mark(Mark::labeled("Heartbeat", markers::HEARTBEAT), interval)
    }

    pub fn with_mark(mark: Mark, interval: Duration) -> Self {
        Self {
            mark,
            interval,
            next_beat: None,
        }
    }
}

impl Source<Mark> for HeartbeatSource {
    fn open(&mut self) -> anyhow::Result<()> {
        self.next_beat = Some(Instant::now() + self.interval);
        Ok(())
    }

    fn read(&mut self, cancel: &CancellationToken) -> Result<Mark, AcquireError> {
        let deadline = self
            .next_beat
            .unwrap_or_else(|| Instant::now() + self.interval);
        if cancel.sleep_until(deadline) {
            return Err(AcquireError::Interrupted);
        }
        let next = deadline + self.interval;
        let now = Instant::now();
        // Never burst to catch up after a stall.
        self.next_beat = Some(if next < now { now + self.interval } else { next });
        Ok(self.mark.clone())
    }

    fn shutdown(&mut self) {
        self.next_beat = None;
    }
}
