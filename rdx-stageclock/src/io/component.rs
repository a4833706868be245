//! Filters and consumers attached to streamers, plus the stock implementations.

use crate::common::{Capability, Priority};
use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Receives every value dispatched by a streamer.
pub trait Consumer<T>: Send + Sync {
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Capabilities this consumer is indexed under when attached.
    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    fn accept(&self, value: &T);
}

/// Decides whether an acquired value enters a streamer's queue.
pub trait Filter<T>: Send + Sync {
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    /// Returns `false` to drop the value.
    fn accept(&self, value: &T) -> bool;
}

/// A consumer built from a closure.
pub struct DelegatedConsumer<F> {
    f: F,
    priority: Priority,
    capabilities: Vec<Capability>,
}

impl<F> DelegatedConsumer<F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            priority: Priority::Normal,
            capabilities: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }
}

impl<T, F> Consumer<T> for DelegatedConsumer<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn priority(&self) -> Priority {
        self.priority
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn accept(&self, value: &T) {
        (self.f)(value)
    }
}

/// A filter built from a predicate.
pub struct DelegatedFilter<F> {
    f: F,
    priority: Priority,
    capabilities: Vec<Capability>,
}

impl<F> DelegatedFilter<F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            priority: Priority::Normal,
            capabilities: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }
}

impl<T, F> Filter<T> for DelegatedFilter<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn priority(&self) -> Priority {
        self.priority
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn accept(&self, value: &T) -> bool {
        (self.f)(value)
    }
}

/// Keeps the most recently received value.
pub struct CachedConsumer<T> {
    latest: Mutex<Option<T>>,
    priority: Priority,
}

impl<T: Clone> CachedConsumer<T> {
    pub fn new() -> Self {
        Self::with_priority(Priority::Normal)
    }

    pub fn with_priority(priority: Priority) -> Self {
        Self {
            latest: Mutex::new(None),
            priority,
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.lock().clone()
    }
}

impl<T: Clone> Default for CachedConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> Consumer<T> for CachedConsumer<T> {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Caching]
    }

    fn accept(&self, value: &T) {
        *self.latest.lock() = Some(value.clone());
    }
}

/// Keeps a history of received values, optionally bounded to the newest `limit`.
pub struct RecordingConsumer<T> {
    history: Mutex<VecDeque<T>>,
    limit: Option<usize>,
    priority: Priority,
}

impl<T: Clone> RecordingConsumer<T> {
    pub fn unbounded() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            limit: None,
            priority: Priority::Normal,
        }
    }

    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::unbounded()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn values(&self) -> Vec<T> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl<T: Clone + Send> Consumer<T> for RecordingConsumer<T> {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Recording]
    }

    fn accept(&self, value: &T) {
        let mut history = self.history.lock();
        if let Some(limit) = self.limit {
            if limit == 0 {
                return;
            }
            while history.len() >= limit {
                history.pop_front();
            }
        }
        history.push_back(value.clone());
    }
}

/// Writes every value to the log. Runs last so it sees what everyone else saw.
pub struct LogWriter {
    label: String,
}

impl LogWriter {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl<T: Debug> Consumer<T> for LogWriter {
    fn priority(&self) -> Priority {
        Priority::Lowest
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Logging]
    }

    fn accept(&self, value: &T) {
        debug!(stream = %self.label, ?value, "Value received.");
    }
}

/// Adapts a consumer of `U` into a consumer of `T` through a mapping function.
pub struct MappedConsumer<C, F, U> {
    inner: C,
    f: F,
    _value: PhantomData<fn() -> U>,
}

impl<T, U, C, F> Consumer<T> for MappedConsumer<C, F, U>
where
    C: Consumer<U>,
    F: Fn(&T) -> U + Send + Sync,
{
    fn priority(&self) -> Priority {
        self.inner.priority()
    }

    fn capabilities(&self) -> &[Capability] {
        self.inner.capabilities()
    }

    fn accept(&self, value: &T) {
        self.inner.accept(&(self.f)(value))
    }
}

pub trait ConsumerExt<U>: Consumer<U> + Sized {
    /// Feeds this consumer with values of another type, converted by `f`.
    fn map<T, F>(self, f: F) -> MappedConsumer<Self, F, U>
    where
        F: Fn(&T) -> U + Send + Sync,
    {
        MappedConsumer {
            inner: self,
            f,
            _value: PhantomData,
        }
    }
}

impl<U, C: Consumer<U>> ConsumerExt<U> for C {}

/// A consumer whose value type is only known at runtime.
///
/// Streamers check the hidden type when the consumer is attached and report a
/// mismatch instead of failing later.
pub struct ErasedConsumer {
    inner: Box<dyn Any + Send + Sync>,
    accept_type: &'static str,
}

impl ErasedConsumer {
    pub fn new<T: 'static>(consumer: Arc<dyn Consumer<T>>) -> Self {
        Self {
            inner: Box::new(consumer),
            accept_type: type_name::<T>(),
        }
    }

    pub fn accept_type(&self) -> &'static str {
        self.accept_type
    }

    pub(crate) fn downcast<T: 'static>(self) -> Result<Arc<dyn Consumer<T>>, Self> {
        let accept_type = self.accept_type;
        self.inner
            .downcast::<Arc<dyn Consumer<T>>>()
            .map(|consumer| *consumer)
            .map_err(|inner| Self { inner, accept_type })
    }
}

/// A filter whose value type is only known at runtime.
pub struct ErasedFilter {
    inner: Box<dyn Any + Send + Sync>,
    accept_type: &'static str,
}

impl ErasedFilter {
    pub fn new<T: 'static>(filter: Arc<dyn Filter<T>>) -> Self {
        Self {
            inner: Box::new(filter),
            accept_type: type_name::<T>(),
        }
    }

    pub fn accept_type(&self) -> &'static str {
        self.accept_type
    }

    pub(crate) fn downcast<T: 'static>(self) -> Result<Arc<dyn Filter<T>>, Self> {
        let accept_type = self.accept_type;
        self.inner
            .downcast::<Arc<dyn Filter<T>>>()
            .map(|filter| *filter)
            .map_err(|inner| Self { inner, accept_type })
    }
}
