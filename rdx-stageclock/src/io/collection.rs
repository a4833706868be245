use super::markable::Markable;
use super::{Stream, StreamerState};
use crate::error::StreamError;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

const UNSTARTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Global state of a `StreamerCollection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Unstarted,
    Started,
    Stopped,
}

struct Registered {
    stream: Arc<dyn Stream>,
    concrete: Arc<dyn Any + Send + Sync>,
    markable: Option<Arc<dyn Markable>>,
}

/// A fixed set of streamers started and stopped together.
///
/// Members can only be added before the first `start`. `start` and `stop`
/// each take effect once; later calls are no-ops returning `Ok(false)`.
#[derive(Default)]
pub struct StreamerCollection {
    streams: RwLock<Vec<Registered>>,
    state: AtomicU8,
}

impl StreamerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, entry: Registered) -> Result<(), StreamError> {
        let mut streams = self.streams.write();
        if self.state.load(Ordering::SeqCst) != UNSTARTED {
            return Err(StreamError::CollectionSealed);
        }
        debug!(stream = %entry.stream.stream_id(), "Streamer added to collection.");
        streams.push(entry);
        Ok(())
    }

    pub fn add<S>(&self, streamer: Arc<S>) -> Result<(), StreamError>
    where
        S: Stream + Any,
    {
        self.register(Registered {
            stream: streamer.clone(),
            concrete: streamer,
            markable: None,
        })
    }

    /// Adds a streamer that also accepts manual marks.
    pub fn add_markable<S>(&self, streamer: Arc<S>) -> Result<(), StreamError>
    where
        S: Stream + Markable + Any,
    {
        self.register(Registered {
            stream: streamer.clone(),
            concrete: streamer.clone(),
            markable: Some(streamer),
        })
    }

    pub fn state(&self) -> CollectionState {
        match self.state.load(Ordering::SeqCst) {
            UNSTARTED => CollectionState::Unstarted,
            STARTED => CollectionState::Started,
            _ => CollectionState::Stopped,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.streams
            .read()
            .iter()
            .map(|r| r.stream.stream_id().to_string())
            .collect()
    }

    pub fn streams(&self) -> Vec<Arc<dyn Stream>> {
        self.streams.read().iter().map(|r| r.stream.clone()).collect()
    }

    /// Starts every member in registration order.
    ///
    /// A member that fails to start does not prevent the others from
    /// starting; the first failure is returned.
    pub fn start(&self) -> Result<bool, StreamError> {
        if self
            .state
            .compare_exchange(UNSTARTED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        info!(count = self.len(), "Starting streamer collection.");
        self.for_each_member(|stream| stream.start())?;
        Ok(true)
    }

    pub fn stop(&self) -> Result<bool, StreamError> {
        if self
            .state
            .compare_exchange(STARTED, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        info!("Stopping streamer collection.");
        self.for_each_member(|stream| {
            if stream.state() == StreamerState::Started {
                stream.stop()
            } else {
                Ok(())
            }
        })?;
        Ok(true)
    }

    fn for_each_member(
        &self,
        mut f: impl FnMut(&dyn Stream) -> Result<(), StreamError>,
    ) -> Result<(), StreamError> {
        let mut first_error = None;
        for stream in self.streams() {
            if let Err(e) = f(stream.as_ref()) {
                error!(stream = %stream.stream_id(), error = %e, "Streamer transition failed.");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The first member of concrete type `S`.
    pub fn find_first<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        self.find_first_by(|_: &S| true)
    }

    pub fn find_first_by<S: Any + Send + Sync>(&self, predicate: impl Fn(&S) -> bool) -> Option<Arc<S>> {
        self.streams
            .read()
            .iter()
            .filter_map(|r| r.concrete.clone().downcast::<S>().ok())
            .find(|s| predicate(s.as_ref()))
    }

    pub fn find_all<S: Any + Send + Sync>(&self) -> Vec<Arc<S>> {
        self.find_all_by(|_: &S| true)
    }

    pub fn find_all_by<S: Any + Send + Sync>(&self, predicate: impl Fn(&S) -> bool) -> Vec<Arc<S>> {
        self.streams
            .read()
            .iter()
            .filter_map(|r| r.concrete.clone().downcast::<S>().ok())
            .filter(|s| predicate(s.as_ref()))
            .collect()
    }

    /// The first member registered as markable.
    pub fn find_markable(&self) -> Option<Arc<dyn Markable>> {
        self.streams.read().iter().find_map(|r| r.markable.clone())
    }

    pub fn markables(&self) -> Vec<Arc<dyn Markable>> {
        self.streams
            .read()
            .iter()
            .filter_map(|r| r.markable.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingConfig;
    use crate::io::{AsyncStreamer, IterSource, MarkerStreamer};
    use crate::time::{SystemClock, TimeUnit};

    fn config() -> StreamingConfig {
        StreamingConfig {
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn lookups_by_concrete_type_and_capability() {
        let collection = StreamerCollection::new();
        let numbers = Arc::new(AsyncStreamer::new("numbers", IterSource::new(0..3), &config()));
        let markers = Arc::new(MarkerStreamer::new(
            SystemClock::shared(TimeUnit::Millisecond),
            &config(),
        ));
        collection.add(numbers).unwrap();
        collection.add_markable(markers).unwrap();

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.stream_ids(), vec!["numbers", "markers"]);
        assert!(collection.find_first::<MarkerStreamer>().is_some());
        assert!(collection.find_first::<AsyncStreamer<i32>>().is_some());
        assert!(collection.find_first::<AsyncStreamer<u8>>().is_none());
        assert_eq!(
            collection
                .find_all_by(|s: &AsyncStreamer<i32>| s.stream_id() == "other")
                .len(),
            0
        );
        assert_eq!(collection.markables().len(), 1);
        assert!(collection.find_markable().is_some());
    }

    #[test]
    fn transitions_happen_once_and_seal_the_collection() {
        let collection = StreamerCollection::new();
        let numbers = Arc::new(AsyncStreamer::new("numbers", IterSource::new(0..3), &config()));
        collection.add(numbers.clone()).unwrap();

        assert!(!collection.stop().unwrap());
        assert!(collection.start().unwrap());
        assert!(!collection.start().unwrap());
        assert_eq!(collection.state(), CollectionState::Started);
        assert!(matches!(
            collection.add(Arc::new(AsyncStreamer::new("late", IterSource::new(0..1), &config()))),
            Err(StreamError::CollectionSealed)
        ));

        assert!(collection.stop().unwrap());
        assert!(!collection.stop().unwrap());
        assert_eq!(collection.state(), CollectionState::Stopped);
        numbers.join();
        assert_eq!(numbers.state(), StreamerState::Stopped);
    }
}
