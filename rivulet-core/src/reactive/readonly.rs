//! Read-only views of cells.
//!
//! A [`ReadonlyCell`] shares storage with the cell it was created from.
//! Reads behave exactly like reads of the original handle, tracking
//! included; writes are rejected. The original handle stays writable and
//! its writes are visible through every view.

use std::fmt;
use std::sync::Arc;

use super::cell::{Cell, CellId, CellInner, Readable, Source};
use super::error::{ReactiveError, Result};
use super::subscriber::Subscriber;

/// A read-only handle to a cell.
///
/// ```rust,ignore
/// let count = Cell::new(0);
/// let view = readonly(&count);
///
/// assert!(view.set(1).is_err());
/// count.set(1);
/// assert_eq!(view.get(), 1);
/// ```
pub struct ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<CellInner<T>>) -> Self {
        Self { inner }
    }

    /// ID of the underlying cell.
    pub fn id(&self) -> CellId {
        self.inner.id()
    }

    /// Get the current value, tracked like [`Cell::get`].
    pub fn get(&self) -> T {
        self.inner.read()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.read_untracked()
    }

    /// Borrow the current value, tracked like [`Cell::with`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    /// Always fails with [`ReactiveError::ReadonlyViolation`]; the value is
    /// left untouched.
    pub fn set(&self, _value: T) -> Result<()> {
        Err(ReactiveError::ReadonlyViolation { cell: self.id() })
    }

    /// Always fails with [`ReactiveError::ReadonlyViolation`] without
    /// calling `f`.
    pub fn update<F>(&self, _f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        Err(ReactiveError::ReadonlyViolation { cell: self.id() })
    }

    /// Observe changes. Subscribing is not a write, so views allow it.
    pub fn subscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.inner.attach(subscriber.id(), subscriber.callback())
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.inner.detach(subscriber.id())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    /// Whether this view reads from the storage of `cell`.
    pub fn views(&self, cell: &Cell<T>) -> bool {
        self.id() == cell.id()
    }
}

/// Create a read-only view of `cell`.
pub fn readonly<T>(cell: &Cell<T>) -> ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cell.readonly()
}

impl<T> Clone for ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> From<&Cell<T>> for ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn from(cell: &Cell<T>) -> Self {
        cell.readonly()
    }
}

impl<T> fmt::Debug for ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlyCell")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .finish()
    }
}

impl<T> Readable for ReadonlyCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn get(&self) -> T {
        ReadonlyCell::get(self)
    }

    fn get_untracked(&self) -> T {
        ReadonlyCell::get_untracked(self)
    }

    fn source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }
}
