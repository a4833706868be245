//! The `StageProvider` contract and its basic implementations.
//!
//! A provider is a lazy, pull-based sequence of stages. Once `next()` has
//! returned `Ok(None)` (the end marker) it keeps returning `Ok(None)`; a
//! provider never resurrects after its end or after being broken off.

use super::stage::{self, Stage};
use crate::error::StagingError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to any stage provider.
pub type SharedProvider = Arc<dyn StageProvider>;

/// A lazy source of stages consumed by a `StageProgram`.
pub trait StageProvider: Send + Sync {
    /// Whether the whole sequence can be materialized ahead of time.
    fn is_preloadable(&self) -> bool;

    /// Whether `break_off` is supported.
    fn is_breakable(&self) -> bool;

    fn is_broken(&self) -> bool;

    /// Returns an equivalent provider whose stages are materialized up front.
    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError>;

    /// Stops the provider early; subsequent `next()` calls return the end marker.
    fn break_off(&self) -> Result<(), StagingError>;

    /// The next stage, or `None` at the end of the sequence.
    fn next(&self) -> Result<Option<Stage>, StagingError>;

    /// Ends the sequence for good and releases a caller blocked in `next()`.
    ///
    /// Unlike `break_off` this never fails, and wrappers forward it to every
    /// provider they hold. A stopping `StageProgram` calls it.
    fn abort(&self) {
        if self.is_breakable() {
            self.break_off().ok();
        }
    }
}

/// Pulls every remaining stage out of `provider`.
pub fn drain_stages(provider: &dyn StageProvider) -> Result<Vec<Stage>, StagingError> {
    let mut stages = Vec::new();
    while let Some(stage) = provider.next()? {
        stages.push(stage);
    }
    Ok(stages)
}

/// Preloads `provider` if it supports it, otherwise hands it back unchanged.
pub fn try_preload(provider: SharedProvider) -> Result<SharedProvider, StagingError> {
    if provider.is_preloadable() {
        provider.preloaded()
    } else {
        Ok(provider)
    }
}

/// A provider that is empty from the start.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStageProvider;

impl EmptyStageProvider {
    pub fn shared() -> SharedProvider {
        Arc::new(Self)
    }
}

impl StageProvider for EmptyStageProvider {
    fn is_preloadable(&self) -> bool {
        true
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        false
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        Ok(self)
    }

    fn break_off(&self) -> Result<(), StagingError> {
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        Ok(None)
    }
}

/// A collection-backed provider iterating a fixed stage sequence once.
pub struct StageList {
    stages: Vec<Stage>,
    cursor: Mutex<usize>,
    broken: AtomicBool,
}

impl StageList {
    pub fn new(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            cursor: Mutex::new(0),
            broken: AtomicBool::new(false),
        }
    }

    pub fn shared(stages: impl IntoIterator<Item = Stage>) -> SharedProvider {
        Arc::new(Self::new(stages))
    }

    /// Materializes every stage of `provider` into a list.
    pub fn preload(provider: &dyn StageProvider) -> Result<Self, StagingError> {
        Ok(Self::new(drain_stages(provider)?))
    }

    /// Number of stages in the whole list, consumed or not.
    pub fn count(&self) -> usize {
        self.stages.len()
    }

    pub fn total_duration(&self) -> Duration {
        stage::total_duration(&self.stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl StageProvider for StageList {
    fn is_preloadable(&self) -> bool {
        true
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        Ok(self)
    }

    fn break_off(&self) -> Result<(), StagingError> {
        self.broken.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        if self.is_broken() {
            return Ok(None);
        }
        let mut cursor = self.cursor.lock();
        let stage = self.stages.get(*cursor).cloned();
        if stage.is_some() {
            *cursor += 1;
        }
        Ok(stage)
    }
}

/// Forwards to an optional inner provider but can be broken independently.
pub struct DelegatedStageProvider {
    inner: Option<SharedProvider>,
    broken: AtomicBool,
}

impl DelegatedStageProvider {
    pub fn new(inner: Option<SharedProvider>) -> Self {
        Self {
            inner,
            broken: AtomicBool::new(false),
        }
    }

    pub fn wrap(inner: SharedProvider) -> Self {
        Self::new(Some(inner))
    }

    /// Yields `if_true` when `condition` holds, otherwise nothing.
    pub fn conditional(condition: bool, if_true: SharedProvider) -> Self {
        Self::new(condition.then_some(if_true))
    }

    pub fn either(condition: bool, if_true: SharedProvider, if_false: SharedProvider) -> Self {
        Self::new(Some(if condition { if_true } else { if_false }))
    }

    pub fn inner(&self) -> Option<&SharedProvider> {
        self.inner.as_ref()
    }
}

impl StageProvider for DelegatedStageProvider {
    fn is_preloadable(&self) -> bool {
        self.inner.as_ref().map_or(true, |p| p.is_preloadable())
    }

    fn is_breakable(&self) -> bool {
        true
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        match &self.inner {
            Some(inner) => try_preload(inner.clone()),
            None => Ok(EmptyStageProvider::shared()),
        }
    }

    fn break_off(&self) -> Result<(), StagingError> {
        self.broken.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        if self.is_broken() {
            return Ok(None);
        }
        match &self.inner {
            Some(inner) => inner.next(),
            None => Ok(None),
        }
    }

    fn abort(&self) {
        self.broken.store(true, Ordering::SeqCst);
        if let Some(inner) = &self.inner {
            inner.abort();
        }
    }
}

/// Concatenates child providers, moving to the next child whenever the
/// current one reaches its end.
///
/// No lock is held while a child's `next()` runs, so children stay reachable
/// through `provider(i)` while the composite is blocked on one of them.
pub struct CompositeStageProvider {
    providers: RwLock<Vec<SharedProvider>>,
    index: AtomicUsize,
}

impl CompositeStageProvider {
    pub fn new(providers: impl IntoIterator<Item = SharedProvider>) -> Self {
        Self {
            providers: RwLock::new(providers.into_iter().collect()),
            index: AtomicUsize::new(0),
        }
    }

    pub fn shared(providers: impl IntoIterator<Item = SharedProvider>) -> SharedProvider {
        Arc::new(Self::new(providers))
    }

    pub fn providers(&self) -> Vec<SharedProvider> {
        self.providers.read().clone()
    }

    pub fn provider(&self, index: usize) -> Option<SharedProvider> {
        self.providers.read().get(index).cloned()
    }

    /// Index of the child currently being pulled from.
    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Replaces every preloadable child with its preloaded form.
    pub fn preload_children(&self) -> Result<(), StagingError> {
        let children = self.providers();
        let mut preloaded = Vec::with_capacity(children.len());
        for child in children {
            preloaded.push(try_preload(child)?);
        }
        *self.providers.write() = preloaded;
        Ok(())
    }
}

impl StageProvider for CompositeStageProvider {
    fn is_preloadable(&self) -> bool {
        self.providers.read().iter().all(|p| p.is_preloadable())
    }

    fn is_breakable(&self) -> bool {
        false
    }

    fn is_broken(&self) -> bool {
        false
    }

    fn preloaded(self: Arc<Self>) -> Result<SharedProvider, StagingError> {
        if self.is_preloadable() {
            return Ok(Arc::new(StageList::preload(self.as_ref())?));
        }
        self.preload_children()?;
        Ok(self)
    }

    fn break_off(&self) -> Result<(), StagingError> {
        Err(StagingError::NotBreakable)
    }

    fn next(&self) -> Result<Option<Stage>, StagingError> {
        loop {
            let index = self.index.load(Ordering::SeqCst);
            let Some(child) = self.provider(index) else {
                return Ok(None);
            };
            if let Some(stage) = child.next()? {
                return Ok(Some(stage));
            }
            self.index
                .compare_exchange(index, index + 1, Ordering::SeqCst, Ordering::SeqCst)
                .ok();
        }
    }

    fn abort(&self) {
        for child in self.providers() {
            child.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::pipelined::PipelinedStageProvider;
    use std::sync::mpsc;
    use std::thread;

    fn list(durations: &[u64]) -> SharedProvider {
        StageList::shared(durations.iter().map(|d| Stage::new(*d)))
    }

    fn durations(provider: &dyn StageProvider) -> Vec<u64> {
        drain_stages(provider)
            .unwrap()
            .into_iter()
            .map(|s| s.duration)
            .collect()
    }

    #[test]
    fn stage_list_ends_for_good() {
        let provider = list(&[1, 2]);
        assert_eq!(durations(provider.as_ref()), vec![1, 2]);
        assert!(provider.next().unwrap().is_none());
        assert!(provider.next().unwrap().is_none());
    }

    #[test]
    fn breaking_a_stage_list_marks_it_broken() {
        let provider = StageList::new([Stage::new(1), Stage::new(2)]);
        assert_eq!(provider.count(), 2);
        assert_eq!(provider.total_duration(), Duration::from_millis(3));
        provider.next().unwrap();
        provider.break_off().unwrap();
        assert!(provider.is_broken());
        assert!(provider.next().unwrap().is_none());
    }

    #[test]
    fn conditional_provider_picks_branch() {
        let yes = DelegatedStageProvider::conditional(true, list(&[5]));
        let no = DelegatedStageProvider::conditional(false, list(&[5]));
        assert_eq!(durations(&yes), vec![5]);
        assert!(no.next().unwrap().is_none());

        let either = DelegatedStageProvider::either(false, list(&[1]), list(&[2]));
        assert_eq!(durations(&either), vec![2]);
    }

    #[test]
    fn delegated_break_stops_forwarding() {
        let delegated = DelegatedStageProvider::wrap(list(&[1, 2, 3]));
        assert_eq!(delegated.next().unwrap().map(|s| s.duration), Some(1));
        delegated.break_off().unwrap();
        assert!(delegated.next().unwrap().is_none());
    }

    #[test]
    fn composite_concatenates_children() {
        let composite = CompositeStageProvider::new([list(&[1, 2, 3]), list(&[4, 5, 6])]);
        assert_eq!(durations(&composite), vec![1, 2, 3, 4, 5, 6]);
        assert!(composite.next().unwrap().is_none());
    }

    #[test]
    fn composite_skips_broken_child() {
        let composite = CompositeStageProvider::new([list(&[1, 2, 3]), list(&[4, 5, 6])]);
        assert_eq!(composite.next().unwrap().map(|s| s.duration), Some(1));
        composite.provider(0).unwrap().break_off().unwrap();
        assert_eq!(composite.next().unwrap().map(|s| s.duration), Some(4));
    }

    #[test]
    fn composite_children_stay_reachable_while_one_blocks() {
        let pipeline = Arc::new(PipelinedStageProvider::new(4, Duration::from_millis(10)));
        let composite = Arc::new(CompositeStageProvider::new([
            pipeline.clone() as SharedProvider,
            list(&[5]),
        ]));
        let puller = {
            let composite = composite.clone();
            thread::spawn(move || composite.next().unwrap().map(|s| s.duration))
        };
        thread::sleep(Duration::from_millis(50));

        let (done, finished) = mpsc::channel();
        {
            let composite = composite.clone();
            thread::spawn(move || {
                let first = composite.provider(0).unwrap();
                first.break_off().unwrap();
                done.send(composite.providers().len()).ok();
            });
        }
        assert_eq!(finished.recv_timeout(Duration::from_secs(2)), Ok(2));
        assert_eq!(puller.join().unwrap(), Some(5));
        assert!(pipeline.is_broken());
        assert_eq!(composite.current_index(), 1);
    }

    #[test]
    fn abort_reaches_every_child() {
        let first = Arc::new(StageList::new([Stage::new(1)]));
        let inner = Arc::new(StageList::new([Stage::new(2)]));
        let composite = CompositeStageProvider::new([
            first.clone() as SharedProvider,
            Arc::new(DelegatedStageProvider::wrap(inner.clone())) as SharedProvider,
        ]);
        composite.abort();
        assert!(first.is_broken());
        assert!(inner.is_broken());
        assert!(composite.next().unwrap().is_none());
    }

    #[test]
    fn composite_is_not_breakable() {
        let composite = CompositeStageProvider::new([list(&[1])]);
        assert!(!composite.is_breakable());
        assert!(matches!(
            composite.break_off(),
            Err(StagingError::NotBreakable)
        ));
    }

    #[test]
    fn preloadable_composite_flattens() {
        let composite: SharedProvider =
            CompositeStageProvider::shared([list(&[1]), EmptyStageProvider::shared(), list(&[2])]);
        let preloaded = try_preload(composite).unwrap();
        assert!(preloaded.is_breakable());
        assert_eq!(durations(preloaded.as_ref()), vec![1, 2]);
    }
}
