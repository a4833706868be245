//! Value sources driven by an `AsyncStreamer`'s producer thread.

use crate::error::AcquireError;
use crate::sync::CancellationToken;
use std::marker::PhantomData;

/// A device or generator the producer thread reads from.
///
/// `read` may block, but should return `AcquireError::Interrupted` promptly
/// once `cancel` is cancelled.
pub trait Source<T>: Send + 'static {
    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(&mut self, cancel: &CancellationToken) -> Result<T, AcquireError>;

    /// Called on the producer thread after its last `read`.
    fn shutdown(&mut self) {}
}

impl<T: 'static> Source<T> for Box<dyn Source<T>> {
    fn open(&mut self) -> anyhow::Result<()> {
        (**self).open()
    }

    fn read(&mut self, cancel: &CancellationToken) -> Result<T, AcquireError> {
        (**self).read(cancel)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// A source that ends immediately; values are injected with `enqueue` instead.
pub struct NoSource<T>(PhantomData<fn() -> T>);

impl<T> NoSource<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for NoSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Source<T> for NoSource<T> {
    fn read(&mut self, _cancel: &CancellationToken) -> Result<T, AcquireError> {
        Err(AcquireError::EndOfSource)
    }
}

/// Yields the items of an iterator, then ends.
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I> Source<I::Item> for IterSource<I>
where
    I: Iterator + Send + 'static,
{
    fn read(&mut self, _cancel: &CancellationToken) -> Result<I::Item, AcquireError> {
        self.iter.next().ok_or(AcquireError::EndOfSource)
    }
}

/// A source reading through a closure.
pub struct FnSource<F> {
    f: F,
}

pub fn source_fn<T, F>(f: F) -> FnSource<F>
where
    F: FnMut(&CancellationToken) -> Result<T, AcquireError> + Send + 'static,
{
    FnSource { f }
}

impl<T, F> Source<T> for FnSource<F>
where
    F: FnMut(&CancellationToken) -> Result<T, AcquireError> + Send + 'static,
{
    fn read(&mut self, cancel: &CancellationToken) -> Result<T, AcquireError> {
        (self.f)(cancel)
    }
}
