use super::component::{Consumer, ErasedConsumer, ErasedFilter, Filter};
use crate::common::{Capability, Priority};
use crate::error::StreamError;
use parking_lot::RwLock;
use std::any::type_name;
use std::sync::Arc;
use tracing::trace;

struct Entry<C: ?Sized> {
    component: Arc<C>,
    priority: Priority,
    capabilities: Vec<Capability>,
}

impl<C: ?Sized> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            priority: self.priority,
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Snapshot list: readers clone the `Arc` and iterate without holding the lock.
type EntryList<C> = RwLock<Arc<Vec<Entry<C>>>>;

fn same_instance<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

fn insert<C: ?Sized>(list: &EntryList<C>, entry: Entry<C>, stream_id: &str) -> Result<(), StreamError> {
    let mut guard = list.write();
    if guard
        .iter()
        .any(|e| same_instance(&e.component, &entry.component))
    {
        return Err(StreamError::DuplicateAttach {
            stream_id: stream_id.to_string(),
        });
    }
    let mut entries = Vec::with_capacity(guard.len() + 1);
    entries.extend(guard.iter().cloned());
    let position = entries
        .iter()
        .position(|e| e.priority > entry.priority)
        .unwrap_or(entries.len());
    entries.insert(position, entry);
    *guard = Arc::new(entries);
    Ok(())
}

fn remove<C: ?Sized, D: ?Sized>(list: &EntryList<C>, component: &Arc<D>) -> bool {
    let mut guard = list.write();
    let Some(position) = guard
        .iter()
        .position(|e| same_instance(&e.component, component))
    else {
        return false;
    };
    let mut entries: Vec<_> = guard.iter().cloned().collect();
    entries.remove(position);
    *guard = Arc::new(entries);
    true
}

fn query<C: ?Sized>(list: &EntryList<C>, capability: Capability) -> Vec<Arc<C>> {
    list.read()
        .iter()
        .filter(|e| e.capabilities.contains(&capability))
        .map(|e| e.component.clone())
        .collect()
}

/// A pipeline node: a filter chain followed by a consumer list, both kept in
/// ascending priority order.
///
/// Traversal works on an immutable snapshot, so `accept` and `dispatch` never
/// block `attach`/`detach` and never observe a half-updated list.
pub struct Streamer<T> {
    stream_id: String,
    filters: EntryList<dyn Filter<T>>,
    consumers: EntryList<dyn Consumer<T>>,
}

impl<T: 'static> Streamer<T> {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            filters: RwLock::new(Arc::new(Vec::new())),
            consumers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    /// Attaches `filter` after every filter of the same or higher priority.
    pub fn attach_filter(&self, filter: Arc<dyn Filter<T>>) -> Result<(), StreamError> {
        let entry = Entry {
            priority: filter.priority(),
            capabilities: filter.capabilities().to_vec(),
            component: filter,
        };
        insert(&self.filters, entry, &self.stream_id)?;
        trace!(stream = %self.stream_id, "Filter attached.");
        Ok(())
    }

    pub fn attach_consumer(&self, consumer: Arc<dyn Consumer<T>>) -> Result<(), StreamError> {
        let entry = Entry {
            priority: consumer.priority(),
            capabilities: consumer.capabilities().to_vec(),
            component: consumer,
        };
        insert(&self.consumers, entry, &self.stream_id)?;
        trace!(stream = %self.stream_id, "Consumer attached.");
        Ok(())
    }

    /// Attaches a filter whose value type is checked at runtime.
    pub fn attach_erased_filter(&self, filter: ErasedFilter) -> Result<(), StreamError> {
        let filter = filter.downcast::<T>().map_err(|f| self.mismatch(f.accept_type()))?;
        self.attach_filter(filter)
    }

    pub fn attach_erased_consumer(&self, consumer: ErasedConsumer) -> Result<(), StreamError> {
        let consumer = consumer
            .downcast::<T>()
            .map_err(|c| self.mismatch(c.accept_type()))?;
        self.attach_consumer(consumer)
    }

    fn mismatch(&self, actual: &'static str) -> StreamError {
        StreamError::TypeMismatch {
            stream_id: self.stream_id.clone(),
            expected: self.value_type(),
            actual,
        }
    }

    /// Detaches the given filter instance. Returns `false` if it was not attached.
    pub fn detach_filter<C: ?Sized>(&self, filter: &Arc<C>) -> bool {
        remove(&self.filters, filter)
    }

    pub fn detach_consumer<C: ?Sized>(&self, consumer: &Arc<C>) -> bool {
        remove(&self.consumers, consumer)
    }

    pub fn filters(&self) -> Vec<Arc<dyn Filter<T>>> {
        self.filters.read().iter().map(|e| e.component.clone()).collect()
    }

    pub fn consumers(&self) -> Vec<Arc<dyn Consumer<T>>> {
        self.consumers
            .read()
            .iter()
            .map(|e| e.component.clone())
            .collect()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.read().len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// Filters that advertised `capability` when attached.
    pub fn query_filters(&self, capability: Capability) -> Vec<Arc<dyn Filter<T>>> {
        query(&self.filters, capability)
    }

    pub fn query_consumers(&self, capability: Capability) -> Vec<Arc<dyn Consumer<T>>> {
        query(&self.consumers, capability)
    }

    /// Runs the filter chain; the first rejection drops the value.
    pub fn accept(&self, value: &T) -> bool {
        let filters = self.filters.read().clone();
        filters.iter().all(|e| e.component.accept(value))
    }

    /// Hands the value to every consumer in priority order.
    pub fn dispatch(&self, value: &T) {
        let consumers = self.consumers.read().clone();
        for entry in consumers.iter() {
            entry.component.accept(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::component::{DelegatedConsumer, DelegatedFilter, RecordingConsumer};
    use parking_lot::Mutex;

    fn tracer(order: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, priority: Priority) -> Arc<dyn Consumer<i32>> {
        let order = order.clone();
        Arc::new(
            DelegatedConsumer::new(move |_: &i32| order.lock().push(name)).with_priority(priority),
        )
    }

    #[test]
    fn dispatch_follows_priority_then_attach_order() {
        let streamer = Streamer::<i32>::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        streamer.attach_consumer(tracer(&order, "low", Priority::Low)).unwrap();
        streamer.attach_consumer(tracer(&order, "highest", Priority::Highest)).unwrap();
        streamer.attach_consumer(tracer(&order, "normal", Priority::Normal)).unwrap();
        streamer.attach_consumer(tracer(&order, "normal2", Priority::Normal)).unwrap();
        streamer.attach_consumer(tracer(&order, "monitor", Priority::Monitor)).unwrap();
        streamer.dispatch(&1);
        assert_eq!(
            *order.lock(),
            vec!["monitor", "highest", "normal", "normal2", "low"]
        );
    }

    #[test]
    fn duplicate_attach_is_rejected() {
        let streamer = Streamer::<i32>::new("test");
        let consumer = Arc::new(RecordingConsumer::<i32>::unbounded());
        streamer.attach_consumer(consumer.clone()).unwrap();
        assert!(matches!(
            streamer.attach_consumer(consumer.clone()),
            Err(StreamError::DuplicateAttach { .. })
        ));
        assert_eq!(streamer.consumer_count(), 1);

        assert!(streamer.detach_consumer(&consumer));
        assert!(!streamer.detach_consumer(&consumer));
        assert_eq!(streamer.consumer_count(), 0);
    }

    #[test]
    fn incompatible_filter_is_rejected() {
        let streamer = Streamer::<i32>::new("ints");
        let filter: Arc<dyn Filter<String>> = Arc::new(DelegatedFilter::new(|_: &String| true));
        let result = streamer.attach_erased_filter(ErasedFilter::new(filter));
        assert!(matches!(result, Err(StreamError::TypeMismatch { .. })));
        assert_eq!(streamer.filter_count(), 0);

        let filter: Arc<dyn Filter<i32>> = Arc::new(DelegatedFilter::new(|v: &i32| *v > 0));
        streamer.attach_erased_filter(ErasedFilter::new(filter)).unwrap();
        assert!(streamer.accept(&3));
        assert!(!streamer.accept(&-3));
    }

    #[test]
    fn first_rejection_short_circuits() {
        let streamer = Streamer::<i32>::new("test");
        let later_calls = Arc::new(Mutex::new(0));
        let reject: Arc<dyn Filter<i32>> =
            Arc::new(DelegatedFilter::new(|_: &i32| false).with_priority(Priority::High));
        let count: Arc<dyn Filter<i32>> = Arc::new(DelegatedFilter::new({
            let later_calls = later_calls.clone();
            move |_: &i32| {
                *later_calls.lock() += 1;
                true
            }
        }));
        streamer.attach_filter(count).unwrap();
        streamer.attach_filter(reject).unwrap();
        assert!(!streamer.accept(&1));
        assert_eq!(*later_calls.lock(), 0);
    }

    #[test]
    fn capabilities_are_queryable() {
        let streamer = Streamer::<i32>::new("test");
        streamer
            .attach_consumer(Arc::new(RecordingConsumer::<i32>::unbounded()))
            .unwrap();
        streamer
            .attach_consumer(Arc::new(DelegatedConsumer::new(|_: &i32| {})))
            .unwrap();
        assert_eq!(streamer.query_consumers(Capability::Recording).len(), 1);
        assert!(streamer.query_consumers(Capability::Display).is_empty());
    }
}
