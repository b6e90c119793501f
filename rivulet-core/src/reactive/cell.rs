//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and a list
//! of subscribers to notify when that value changes.
//!
//! # How Cells Work
//!
//! 1. Reading a cell with [`Cell::get`] inside a tracking frame (an effect
//!    run) records the cell as a dependency of that computation.
//!
//! 2. Writing a different value with [`Cell::set`] runs one notification
//!    pass: every subscriber present when the pass starts is invoked with
//!    `(new_value, old_value)`, synchronously, before `set` returns.
//!
//! 3. Writing an equal value does nothing at all.
//!
//! # Re-entrancy
//!
//! A subscriber may write back into the cell that is notifying it. The value
//! is stored immediately but no nested pass starts; the outer pass carries on
//! and later subscribers see the newest value.
//!
//! The notifying flag belongs to the cell, not to a thread. A write from
//! another thread while a pass is running is stored and coalesced the same
//! way, so it gets no notification of its own.
//!
//! # Failures
//!
//! Every subscriber call is isolated with `catch_unwind`. A panicking
//! subscriber does not stop the pass; the first panic is re-raised to the
//! writer once all subscribers have been attempted.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::context::ReactiveContext;
use super::error::{ReactiveError, Result};
use super::readonly::ReadonlyCell;
use super::subscriber::{Callback, Listener, Subscriber, SubscriberId};

pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// Clears the notifying flag even if the pass unwinds.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Unique identity of a cell's storage.
///
/// All handles to the same storage (clones, read-only views) share one ID;
/// dependency tracking keys off this, never off the handle used to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Type-erased view of a cell's subscriber list.
///
/// Effects and watchers depend on cells of many value types at once; they
/// attach untyped [`Listener`]s through this trait.
pub trait Source: Send + Sync {
    fn cell_id(&self) -> CellId;

    /// Attach a listener under `id`. Returns `false` if `id` was already attached.
    fn add_listener(&self, id: SubscriberId, listener: Listener) -> bool;

    /// Detach the listener under `id`. Returns `false` if nothing was attached.
    fn remove_listener(&self, id: SubscriberId) -> bool;

    fn subscriber_count(&self) -> usize;
}

/// Shared storage behind every handle to one cell.
pub(crate) struct CellInner<T> {
    id: CellId,
    value: RwLock<T>,
    subscribers: Mutex<IndexMap<SubscriberId, Callback<T>>>,
    /// Set for the duration of a notification pass.
    notifying: AtomicBool,
}

impl<T> CellInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn new(value: T) -> Self {
        Self {
            id: CellId::next(),
            value: RwLock::new(value),
            subscribers: Mutex::new(IndexMap::new()),
            notifying: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn read(self: &Arc<Self>) -> T {
        ReactiveContext::track(self);
        self.read_untracked()
    }

    pub(crate) fn read_untracked(&self) -> T {
        self.value.read().clone()
    }

    pub(crate) fn with<R>(self: &Arc<Self>, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track(self);
        f(&self.value.read())
    }

    pub(crate) fn attach(&self, id: SubscriberId, callback: Callback<T>) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, callback);
        true
    }

    pub(crate) fn detach(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().shift_remove(&id).is_some()
    }

    fn count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Store `value` and run a notification pass if it differs from the
    /// current one. Returns the first subscriber panic, if any.
    fn write(&self, value: T) -> Option<PanicPayload> {
        let old = {
            let mut current = self.value.write();
            if *current == value {
                return None;
            }
            std::mem::replace(&mut *current, value)
        };
        self.notify(&old)
    }

    fn notify(&self, old: &T) -> Option<PanicPayload> {
        if self.notifying.swap(true, Ordering::AcqRel) {
            trace!(cell = %self.id, "write during notification pass coalesced");
            return None;
        }
        let _pass = PassGuard(&self.notifying);

        // Subscribers attached or detached by a callback only affect later passes.
        let snapshot: SmallVec<[(SubscriberId, Callback<T>); 4]> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();
        trace!(cell = %self.id, subscribers = snapshot.len(), "notification pass");

        let mut first_panic = None;
        for (id, callback) in snapshot {
            let current = self.read_untracked();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&current, old)));
            if let Err(payload) = outcome {
                warn!(cell = %self.id, subscriber = %id, "subscriber panicked during notification");
                first_panic.get_or_insert(payload);
            }
        }

        first_panic
    }
}

impl<T> Source for CellInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn add_listener(&self, id: SubscriberId, listener: Listener) -> bool {
        self.attach(id, Arc::new(move |_: &T, _: &T| listener()))
    }

    fn remove_listener(&self, id: SubscriberId) -> bool {
        self.detach(id)
    }

    fn subscriber_count(&self) -> usize {
        self.count()
    }
}

/// An observable cell holding a value of type `T`.
///
/// Cloning a cell yields another handle to the same storage.
///
/// Handles are `Send + Sync`, but a notification pass is tracked per cell:
/// while one thread is notifying, writes from other threads update the value
/// without running a pass of their own. Subscribers that must see every
/// change should write from a single thread.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// // Read the value (tracked when inside an effect)
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value and no subscribers.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner::new(value)),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id()
    }

    /// Get the current value.
    ///
    /// If called while an effect is running, the cell becomes one of that
    /// effect's dependencies.
    pub fn get(&self) -> T {
        self.inner.read()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.read_untracked()
    }

    /// Borrow the current value, tracking it like [`get`](Self::get).
    ///
    /// The cell must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    /// Set a new value and notify subscribers.
    ///
    /// Equal values are ignored. If a subscriber panics, the remaining
    /// subscribers still run and the first panic is then resumed here.
    pub fn set(&self, value: T) {
        if let Some(payload) = self.inner.write(value) {
            panic::resume_unwind(payload);
        }
    }

    /// Like [`set`](Self::set), but reports a subscriber panic as an error.
    pub fn try_set(&self, value: T) -> Result<()> {
        match self.inner.write(value) {
            None => Ok(()),
            Some(payload) => Err(ReactiveError::from_panic(self.id(), &*payload)),
        }
    }

    /// Update the value using a function of the current value.
    ///
    /// The current value is read untracked. `f` must not write the cell.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.read());
        self.set(next);
    }

    /// Register a subscriber. Returns `false` if it was already registered.
    pub fn subscribe(&self, subscriber: &Subscriber<T>) -> bool {
        let added = self.inner.attach(subscriber.id(), subscriber.callback());
        trace!(cell = %self.id(), subscriber = %subscriber.id(), added, "subscribe");
        added
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.inner.detach(subscriber.id())
    }

    /// Get the number of subscribers, including effects and watchers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.count()
    }

    /// A read-only view of this cell sharing the same storage.
    pub fn readonly(&self) -> ReadonlyCell<T> {
        ReadonlyCell::new(Arc::clone(&self.inner))
    }

    /// Whether two handles point to the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }
}

impl<T> Default for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + Default + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Anything that can be read like a cell: [`Cell`] and [`ReadonlyCell`].
pub trait Readable: Send + Sync + 'static {
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Tracked read.
    fn get(&self) -> Self::Value;

    fn get_untracked(&self) -> Self::Value;

    /// The underlying storage, type-erased.
    fn source(&self) -> Arc<dyn Source>;
}

impl<T> Readable for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn get(&self) -> T {
        Cell::get(self)
    }

    fn get_untracked(&self) -> T {
        Cell::get_untracked(self)
    }

    fn source(&self) -> Arc<dyn Source> {
        Cell::source(self)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
