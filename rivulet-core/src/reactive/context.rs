//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read,
//! it registers itself with the current computation's collector.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running an effect pushes a
//! tracking frame; the frame's collector fills up as cells are read and is
//! handed back when the frame is finished. Untracked scopes push a frame with
//! no collector, which masks any tracking frame beneath it.
//!
//! Computations run synchronously, so only the top frame ever collects. The
//! stack exists so that an effect triggered from inside another effect's run
//! restores the outer collector untouched when it completes.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::cell::{CellId, Source};
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The computation collecting reads, or `None` for an untracked scope.
    subscriber_id: Option<SubscriberId>,
    /// Cells read while this frame was on top, in first-read order.
    dependencies: IndexMap<CellId, Weak<dyn Source>>,
}

/// The set of cells touched while a tracking frame was active.
///
/// Cells are held weakly: collecting a dependency never keeps a cell alive.
#[derive(Default)]
pub struct Dependencies {
    cells: IndexMap<CellId, Weak<dyn Source>>,
}

impl Dependencies {
    /// Number of distinct cells read.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether the cell with the given ID was read.
    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    /// IDs of the cells read, in first-read order.
    pub fn ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (CellId, &Weak<dyn Source>)> + '_ {
        self.cells.iter().map(|(id, cell)| (*id, cell))
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.cells.keys()).finish()
    }
}

/// Guard that pops its frame when dropped.
///
/// This keeps the stack balanced even if the computation panics; the
/// collected dependencies of a panicking run are simply discarded.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new tracking frame for the given subscriber.
    ///
    /// While this frame is on top, every cell read is recorded. Call
    /// [`finish`](Self::finish) to retrieve the recorded set.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter a frame in which reads are not recorded by anyone.
    pub fn untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: IndexMap::new(),
            });
        });

        Self {
            subscriber_id,
            finished: false,
        }
    }

    /// Check if reads are currently being recorded.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the subscriber whose frame is on top, if it is a tracking frame.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Record a read of `cell` in the active frame.
    ///
    /// Every read path of every cell handle goes through here; it is a no-op
    /// when nothing is tracking.
    pub(crate) fn track<S: Source + 'static>(cell: &Arc<S>) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(entry) = stack.last_mut() else {
                return;
            };
            if entry.subscriber_id.is_none() {
                return;
            }
            entry
                .dependencies
                .entry(cell.cell_id())
                .or_insert_with(|| {
                    let weak: Weak<S> = Arc::downgrade(cell);
                    weak as Weak<dyn Source>
                });
        });
    }

    /// IDs of the cells recorded so far in the active frame.
    #[cfg(test)]
    pub(crate) fn dependency_ids() -> Vec<CellId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Leave the frame and return the cells it recorded.
    pub fn finish(mut self) -> Dependencies {
        self.finished = true;
        let cells = self
            .pop()
            .map(|entry| entry.dependencies)
            .unwrap_or_default();
        Dependencies { cells }
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Frames must be left in the reverse order they were entered.
            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` in a fresh tracking frame and return its result together with
/// every cell it read.
pub fn with_tracking<R>(f: impl FnOnce() -> R) -> (R, Dependencies) {
    let frame = ReactiveContext::enter(SubscriberId::new());
    let result = f();
    (result, frame.finish())
}

/// Run `f` without recording any of its reads, even inside an effect.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = ReactiveContext::untracked();
    f()
}
