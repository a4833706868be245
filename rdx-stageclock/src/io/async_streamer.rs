//! A streamer running its own producer and consumer threads.

use super::source::Source;
use super::streamer::Streamer;
use super::{Stream, StreamerState};
use crate::config::{BackpressurePolicy, StreamingConfig};
use crate::error::{AcquireError, StreamError};
use crate::events::StreamerEvent;
use crate::sync::CancellationToken;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Dropped values are logged on the first drop and then every this many.
const DROP_LOG_EVERY: u64 = 1024;

struct Lifecycle {
    state: StreamerState,
    producer_alive: bool,
}

struct Shared<T> {
    streamer: Streamer<T>,
    lifecycle: Mutex<Lifecycle>,
    tx: Sender<T>,
    rx: Receiver<T>,
    policy: BackpressurePolicy,
    poll_interval: Duration,
    dropped: AtomicU64,
    cancel: CancellationToken,
    event_sender: broadcast::Sender<StreamerEvent>,
}

impl<T: Send + 'static> Shared<T> {
    fn state(&self) -> StreamerState {
        self.lifecycle.lock().state
    }

    fn emit(&self, event: StreamerEvent) {
        self.event_sender.send(event).ok();
    }

    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
            warn!(stream = %self.streamer.stream_id(), dropped, "Streamer queue full, values dropped.");
        }
    }

    /// Queues a value according to the backpressure policy.
    /// Returns `false` if the value was dropped.
    fn push(&self, value: T) -> bool {
        match self.policy {
            BackpressurePolicy::Block => {
                let mut value = value;
                loop {
                    match self.tx.send_timeout(value, self.poll_interval) {
                        Ok(()) => return true,
                        Err(SendTimeoutError::Timeout(v)) => {
                            if self.cancel.is_cancelled() {
                                self.record_drop();
                                return false;
                            }
                            value = v;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return false,
                    }
                }
            }
            BackpressurePolicy::DropNewest => match self.tx.try_send(value) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.record_drop();
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            BackpressurePolicy::DropOldest => {
                let mut value = value;
                loop {
                    match self.tx.try_send(value) {
                        Ok(()) => return true,
                        Err(TrySendError::Full(v)) => {
                            if self.rx.try_recv().is_ok() {
                                self.record_drop();
                            }
                            value = v;
                        }
                        Err(TrySendError::Disconnected(_)) => return false,
                    }
                }
            }
        }
    }

    fn produce(&self, mut source: Box<dyn Source<T>>) {
        let stream_id = self.streamer.stream_id();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match source.read(&self.cancel) {
                Ok(value) => {
                    if self.streamer.accept(&value) {
                        self.push(value);
                    }
                }
                Err(AcquireError::EndOfSource) => {
                    debug!(stream = %stream_id, "End of source reached.");
                    break;
                }
                Err(AcquireError::Interrupted) => {
                    if !self.cancel.is_cancelled() {
                        warn!(stream = %stream_id, "Acquisition interrupted outside of a stop.");
                    }
                    break;
                }
                Err(AcquireError::Device(e)) => {
                    error!(stream = %stream_id, error = %e, "Source failed; producer exiting.");
                    break;
                }
            }
        }
        source.shutdown();

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.producer_alive = false;
        if lifecycle.state == StreamerState::Stopping {
            lifecycle.state = StreamerState::Stopped;
        }
        trace!(stream = %stream_id, "Producer exited.");
    }

    fn consume(&self) {
        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(value) => self.streamer.dispatch(&value),
                Err(RecvTimeoutError::Timeout) => {
                    if self.state() == StreamerState::Stopped {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        while let Ok(value) = self.rx.try_recv() {
            self.streamer.dispatch(&value);
        }
        let stream_id = self.streamer.stream_id().to_string();
        info!(stream = %stream_id, "Streamer stopped.");
        self.emit(StreamerEvent::Stopped { stream_id });
    }
}

/// A `Streamer` with a producer thread reading from a `Source` and a
/// consumer thread dispatching to the attached consumers, joined by a
/// bounded queue.
///
/// Lifecycle: `Initialized -> Started -> Stopping -> Stopped`. A stopped
/// streamer cannot be restarted.
pub struct AsyncStreamer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    source: Mutex<Option<Box<dyn Source<T>>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> AsyncStreamer<T> {
    pub fn new(
        stream_id: impl Into<String>,
        source: impl Source<T>,
        config: &StreamingConfig,
    ) -> Self {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let source: Box<dyn Source<T>> = Box::new(source);
        Self {
            shared: Arc::new(Shared {
                streamer: Streamer::new(stream_id),
                lifecycle: Mutex::new(Lifecycle {
                    state: StreamerState::Initialized,
                    producer_alive: false,
                }),
                tx,
                rx,
                policy: config.backpressure,
                poll_interval: config.poll_interval(),
                dropped: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                event_sender,
            }),
            source: Mutex::new(Some(source)),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn streamer(&self) -> &Streamer<T> {
        &self.shared.streamer
    }

    pub fn state(&self) -> StreamerState {
        self.shared.state()
    }

    /// Values discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamerEvent> {
        self.shared.event_sender.subscribe()
    }

    fn illegal_state(&self, state: StreamerState) -> StreamError {
        StreamError::IllegalState {
            stream_id: self.shared.streamer.stream_id().to_string(),
            state,
        }
    }

    /// Opens the source and spawns the producer and consumer threads.
    pub fn start(&self) -> Result<(), StreamError> {
        let stream_id = self.shared.streamer.stream_id().to_string();
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state != StreamerState::Initialized {
            return Err(self.illegal_state(lifecycle.state));
        }
        let mut source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| self.illegal_state(lifecycle.state))?;
        if let Err(e) = source.open() {
            *self.source.lock() = Some(source);
            return Err(StreamError::SourceOpen {
                stream_id,
                source: e,
            });
        }

        lifecycle.state = StreamerState::Started;
        lifecycle.producer_alive = true;
        self.shared.emit(StreamerEvent::Started {
            stream_id: stream_id.clone(),
        });

        let mut threads = self.threads.lock();
        let shared = self.shared.clone();
        let consumer = thread::Builder::new()
            .name(format!("stream '{}' consumer", stream_id))
            .spawn(move || shared.consume());
        match consumer {
            Ok(handle) => threads.push(handle),
            Err(source) => {
                lifecycle.state = StreamerState::Stopped;
                lifecycle.producer_alive = false;
                self.shared.cancel.cancel();
                return Err(StreamError::Spawn { stream_id, source });
            }
        }

        let shared = self.shared.clone();
        let producer = thread::Builder::new()
            .name(format!("stream '{}' producer", stream_id))
            .spawn(move || shared.produce(source));
        match producer {
            Ok(handle) => threads.push(handle),
            Err(source) => {
                lifecycle.state = StreamerState::Stopped;
                lifecycle.producer_alive = false;
                self.shared.cancel.cancel();
                return Err(StreamError::Spawn { stream_id, source });
            }
        }
        info!(stream = %stream_id, value_type = self.shared.streamer.value_type(), "Streamer started.");
        Ok(())
    }

    /// Cancels the producer. The consumer finishes the queue and exits within
    /// one poll interval of the producer.
    pub fn stop(&self) -> Result<(), StreamError> {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state != StreamerState::Started {
            return Err(self.illegal_state(lifecycle.state));
        }
        let stream_id = self.shared.streamer.stream_id().to_string();
        self.shared.emit(StreamerEvent::Stopping {
            stream_id: stream_id.clone(),
        });
        self.shared.cancel.cancel();
        lifecycle.state = if lifecycle.producer_alive {
            StreamerState::Stopping
        } else {
            StreamerState::Stopped
        };
        debug!(stream = %stream_id, state = ?lifecycle.state, "Streamer stop requested.");
        Ok(())
    }

    /// Injects a value, running it through the filter chain.
    /// Fails unless the streamer is started.
    pub fn enqueue(&self, value: T) -> Result<(), StreamError> {
        let state = self.state();
        if state != StreamerState::Started {
            return Err(self.illegal_state(state));
        }
        if self.shared.streamer.accept(&value) {
            self.shared.push(value);
        }
        Ok(())
    }

    /// Like `enqueue`, but returns `false` instead of failing when not started.
    pub fn try_enqueue(&self, value: T) -> bool {
        self.enqueue(value).is_ok()
    }

    /// Waits for both threads to exit. Call after `stop`.
    pub fn join(&self) {
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                error!(stream = %self.shared.streamer.stream_id(), "Streamer thread panicked.");
            }
        }
    }
}

impl<T: Send + 'static> Deref for AsyncStreamer<T> {
    type Target = Streamer<T>;

    fn deref(&self) -> &Streamer<T> {
        &self.shared.streamer
    }
}

impl<T: Send + 'static> Drop for AsyncStreamer<T> {
    fn drop(&mut self) {
        if self.state() == StreamerState::Started {
            self.stop().ok();
        }
    }
}

impl<T: Send + 'static> Stream for AsyncStreamer<T> {
    fn stream_id(&self) -> &str {
        self.shared.streamer.stream_id()
    }

    fn value_type(&self) -> &'static str {
        self.shared.streamer.value_type()
    }

    fn state(&self) -> StreamerState {
        AsyncStreamer::state(self)
    }

    fn start(&self) -> Result<(), StreamError> {
        AsyncStreamer::start(self)
    }

    fn stop(&self) -> Result<(), StreamError> {
        AsyncStreamer::stop(self)
    }

    fn consumer_count(&self) -> usize {
        self.shared.streamer.consumer_count()
    }
}
