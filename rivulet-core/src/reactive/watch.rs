//! Explicit watchers.
//!
//! Unlike an [`Effect`](super::Effect), a watcher never discovers its
//! dependencies: it observes exactly the cells it was given. Its callback
//! receives the current values of those cells and runs in an untracked scope,
//! so reads inside the callback add no dependencies anywhere.
//!
//! A single handler is attached to each distinct source cell, so one write
//! fires the callback once, however many sources there are and even if a
//! cell is listed twice.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::cell::{Cell, CellId, Readable, Source};
use super::context::untracked;
use super::readonly::ReadonlyCell;
use super::subscriber::{Listener, SubscriberId};

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Invoke the callback once during setup, before any change.
    pub immediate: bool,
}

impl WatchOptions {
    /// Options with `immediate` set.
    pub fn immediate() -> Self {
        Self { immediate: true }
    }
}

/// A fixed set of cells a watcher can observe.
///
/// Implemented for single cells, read-only views, `Vec`s and arrays of
/// same-typed cells, tuples of up to four cells and `()` (nothing to watch).
pub trait WatchSources: Send + Sync + 'static {
    /// What the callback receives.
    type Values;

    fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]>;

    /// Current values, read without tracking.
    fn values(&self) -> Self::Values;
}

macro_rules! impl_watch_sources_for_handle {
    ($handle:ident) => {
        impl<T> WatchSources for $handle<T>
        where
            T: Clone + PartialEq + Send + Sync + 'static,
        {
            type Values = T;

            fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]> {
                smallvec![Readable::source(self)]
            }

            fn values(&self) -> T {
                Readable::get_untracked(self)
            }
        }
    };
}

impl_watch_sources_for_handle!(Cell);
impl_watch_sources_for_handle!(ReadonlyCell);

impl<R: Readable> WatchSources for Vec<R> {
    type Values = Vec<R::Value>;

    fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]> {
        self.iter().map(Readable::source).collect()
    }

    fn values(&self) -> Self::Values {
        self.iter().map(Readable::get_untracked).collect()
    }
}

impl<R: Readable, const N: usize> WatchSources for [R; N] {
    type Values = [R::Value; N];

    fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]> {
        self.iter().map(Readable::source).collect()
    }

    fn values(&self) -> Self::Values {
        std::array::from_fn(|i| self[i].get_untracked())
    }
}

impl WatchSources for () {
    type Values = ();

    fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]> {
        SmallVec::new()
    }

    fn values(&self) {}
}

macro_rules! impl_watch_sources_for_tuple {
    ($($name:ident : $index:tt),+) => {
        impl<$($name: Readable),+> WatchSources for ($($name,)+) {
            type Values = ($($name::Value,)+);

            fn sources(&self) -> SmallVec<[Arc<dyn Source>; 4]> {
                smallvec![$(self.$index.source()),+]
            }

            fn values(&self) -> Self::Values {
                ($(self.$index.get_untracked(),)+)
            }
        }
    };
}

impl_watch_sources_for_tuple!(A: 0);
impl_watch_sources_for_tuple!(A: 0, B: 1);
impl_watch_sources_for_tuple!(A: 0, B: 1, C: 2);
impl_watch_sources_for_tuple!(A: 0, B: 1, C: 2, D: 3);

struct WatchState {
    subscriber_id: SubscriberId,
    disposed: AtomicBool,
    /// Cells the handler is attached to.
    attached: Mutex<SmallVec<[Weak<dyn Source>; 4]>>,
    fire_count: AtomicUsize,
}

/// Handle to a watcher created by [`watch`].
///
/// Dropping the handle does not stop the watcher; call [`Watcher::stop`].
pub struct Watcher {
    state: Arc<WatchState>,
}

impl Watcher {
    pub fn id(&self) -> SubscriberId {
        self.state.subscriber_id
    }

    /// Detach from every source. The callback never fires again.
    pub fn stop(&self) {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let attached = std::mem::take(&mut *self.state.attached.lock());
        for source in attached {
            if let Some(source) = source.upgrade() {
                source.remove_listener(self.state.subscriber_id);
            }
        }
        debug!(watcher = %self.state.subscriber_id, "watcher stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    /// How many times the callback has been invoked, immediate call included.
    pub fn fire_count(&self) -> usize {
        self.state.fire_count.load(Ordering::Relaxed)
    }

    /// Number of distinct cells being observed.
    pub fn source_count(&self) -> usize {
        self.state.attached.lock().len()
    }
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("fire_count", &self.fire_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Call `callback` with the values of `sources` whenever one of them changes.
///
/// With [`WatchOptions::immediate`], the callback also fires once before
/// this function returns. An empty source list is valid: the callback then
/// fires only for `immediate`, and never again.
///
/// # Memory
///
/// Each source holds the handler strongly, and the handler owns `callback`
/// and `sources`. A watcher that is never stopped keeps its callback and its
/// cells alive after the [`Watcher`] is dropped; [`Watcher::stop`] releases
/// them.
///
/// ```rust,ignore
/// let a = Cell::new(5);
/// let b = Cell::new(3);
/// let sum = Cell::new(-1);
///
/// let target = sum.clone();
/// watch((a.clone(), b.clone()), move |(a, b)| target.set(a + b), WatchOptions::immediate());
/// assert_eq!(sum.get(), 8);
/// ```
pub fn watch<S, F>(sources: S, callback: F, options: WatchOptions) -> Watcher
where
    S: WatchSources,
    F: Fn(S::Values) + Send + Sync + 'static,
{
    let state = Arc::new(WatchState {
        subscriber_id: SubscriberId::new(),
        disposed: AtomicBool::new(false),
        attached: Mutex::new(SmallVec::new()),
        fire_count: AtomicUsize::new(0),
    });
    let id = state.subscriber_id;

    let mut unique: IndexMap<CellId, Arc<dyn Source>> = IndexMap::new();
    for source in sources.sources() {
        unique.entry(source.cell_id()).or_insert(source);
    }

    let handler: Listener = {
        let state = Arc::clone(&state);
        Arc::new(move || {
            if state.disposed.load(Ordering::Acquire) {
                return;
            }
            state.fire_count.fetch_add(1, Ordering::Relaxed);
            untracked(|| callback(sources.values()));
        })
    };

    debug!(
        watcher = %id,
        sources = unique.len(),
        immediate = options.immediate,
        "watcher created"
    );

    if options.immediate {
        handler();
    }

    let mut attached = state.attached.lock();
    for source in unique.into_values() {
        source.add_listener(id, Arc::clone(&handler));
        attached.push(Arc::downgrade(&source));
    }
    drop(attached);

    Watcher { state }
}
