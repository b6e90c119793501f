//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a cell
//! it read during its last run changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately. Dependencies can
//!    only be discovered by running, so a body that reads nothing never runs
//!    again.
//!
//! 2. Each run happens inside a fresh tracking frame. When the body returns,
//!    the recorded cells are diffed against the previous set: the effect
//!    unsubscribes from cells it no longer reads and subscribes to new ones.
//!
//! 3. A write to any tracked cell re-runs the effect synchronously, before
//!    the write returns.
//!
//! 4. [`Effect::stop`] detaches the effect from every cell and drops its
//!    body. Stopping is idempotent and may happen from inside the body.
//!
//! # Failures
//!
//! A panicking body propagates to whoever caused the run (the creator for
//! the first run, the writer afterwards). The dependencies recorded by the
//! failed run are discarded; the subscriptions of the last successful run
//! stay in place.
//!
//! # Re-entrancy
//!
//! A change to a tracked cell re-runs the effect even while it is already
//! running, for instance when another effect triggered mid-run writes to it.
//! A body that writes to a cell it reads does not loop: the cell is already
//! notifying, so the nested write is coalesced.
//!
//! # Ownership
//!
//! Cells keep the effects subscribed to them alive; the effect only holds
//! its cells weakly. Dropping an [`Effect`] handle therefore does not stop
//! it. An effect that is never stopped also keeps alive everything its body
//! captured, including the cells it reads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cell::CellId;
use super::context::{Dependencies, ReactiveContext};
use super::subscriber::{Listener, SubscriberId};

type Body = Arc<dyn Fn() + Send + Sync>;

struct EffectInner {
    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The effect body, dropped on stop.
    body: Mutex<Option<Body>>,

    /// Cells read during the last successful run.
    dependencies: Mutex<Dependencies>,

    disposed: AtomicBool,

    /// Number of runs that completed without panicking.
    run_count: AtomicUsize,
}

impl EffectInner {
    fn run(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let Some(body) = self.body.lock().clone() else {
            return;
        };

        let frame = ReactiveContext::enter(self.subscriber_id);
        body();
        let fresh = frame.finish();

        self.run_count.fetch_add(1, Ordering::Relaxed);

        // Stopped from inside its own body.
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.commit(fresh);
    }

    fn commit(self: &Arc<Self>, fresh: Dependencies) {
        let mut current = self.dependencies.lock();
        let mut dropped = 0usize;
        let mut added = 0usize;

        for (id, cell) in current.iter() {
            if fresh.contains(id) {
                continue;
            }
            if let Some(cell) = cell.upgrade() {
                cell.remove_listener(self.subscriber_id);
                dropped += 1;
            }
        }

        for (id, cell) in fresh.iter() {
            if current.contains(id) {
                continue;
            }
            if let Some(cell) = cell.upgrade() {
                cell.add_listener(self.subscriber_id, self.listener());
                added += 1;
            }
        }

        trace!(
            effect = %self.subscriber_id,
            dependencies = fresh.len(),
            added,
            dropped,
            "dependencies updated"
        );
        *current = fresh;
    }

    fn listener(self: &Arc<Self>) -> Listener {
        let effect = Arc::clone(self);
        Arc::new(move || effect.run())
    }

    fn stop(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for (_, cell) in dependencies.iter() {
            if let Some(cell) = cell.upgrade() {
                cell.remove_listener(self.subscriber_id);
            }
        }

        // Releases whatever the body captured, cells included.
        self.body.lock().take();

        debug!(effect = %self.subscriber_id, "effect stopped");
    }
}

/// A computation that re-runs whenever the cells it reads change.
///
/// Cloning an `Effect` yields another handle to the same effect.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// effect.stop();
/// count.set(6);  // Prints nothing
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect and run it once to discover its dependencies.
    ///
    /// # Panics
    ///
    /// Propagates a panic from the first run of `body`.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            subscriber_id: SubscriberId::new(),
            body: Mutex::new(Some(Arc::new(body))),
            dependencies: Mutex::new(Dependencies::default()),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        debug!(effect = %inner.subscriber_id, "effect created");

        inner.run();

        Self { inner }
    }

    /// Get the subscriber ID this effect is registered under.
    pub fn id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Detach from every tracked cell. The effect never runs again.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Get the number of runs that completed without panicking.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of cells read during the last successful run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Whether the last successful run read the given cell.
    pub fn depends_on(&self, cell: CellId) -> bool {
        self.inner.dependencies.lock().contains(cell)
    }
}

/// Run `body` now and again whenever a cell it reads changes.
///
/// # Memory
///
/// The cells the effect subscribes to hold it strongly, and the body usually
/// captures those cells. An effect that is never stopped therefore keeps
/// itself, its body and its cells alive after every handle is dropped.
/// [`Effect::stop`] detaches it and drops the body.
pub fn run_effect<F>(body: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(body)
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let cell = Cell::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let effect = {
            let cell = cell.clone();
            let observed = observed.clone();
            Effect::new(move || observed.store(cell.get(), Ordering::SeqCst))
        };
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert!(effect.depends_on(cell.id()));

        cell.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);

        // Equal write: no run.
        cell.set(42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let use_left = Cell::new(true);
        let left = Cell::new(0);
        let right = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let effect = {
            let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
            let runs = runs.clone();
            Effect::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if use_left.get() {
                    left.get();
                } else {
                    right.get();
                }
            })
        };
        assert!(effect.depends_on(left.id()));
        assert!(!effect.depends_on(right.id()));

        use_left.set(false);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!effect.depends_on(left.id()));
        assert!(effect.depends_on(right.id()));
        assert_eq!(left.subscriber_count(), 0);

        left.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        right.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_is_terminal_and_idempotent() {
        let cell = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let effect = {
            let cell = cell.clone();
            let runs = runs.clone();
            Effect::new(move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        effect.stop();
        effect.stop();
        assert!(effect.is_stopped());
        assert_eq!(cell.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);

        cell.set(1);
        cell.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_can_stop_itself() {
        let cell = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let slot: Arc<Mutex<Option<Effect>>> = Arc::new(Mutex::new(None));

        let effect = {
            let cell = cell.clone();
            let runs = runs.clone();
            let slot = slot.clone();
            Effect::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if cell.get() >= 2 {
                    if let Some(effect) = slot.lock().as_ref() {
                        effect.stop();
                    }
                }
            })
        };
        *slot.lock() = Some(effect.clone());

        cell.set(1);
        cell.set(2);
        assert!(effect.is_stopped());
        assert_eq!(cell.subscriber_count(), 0);

        cell.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        // Break the handle cycle held by the test.
        slot.lock().take();
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect_alive() {
        let cell = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        {
            let cell = cell.clone();
            let runs = runs.clone();
            run_effect(move || {
                cell.get();
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        cell.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn change_made_by_another_effect_mid_run_reruns() {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let c = Cell::new(0);
        let out = Cell::new(-1);

        let summing = {
            let (a, b, c, out) = (a.clone(), b.clone(), c.clone(), out.clone());
            Effect::new(move || {
                out.set(a.get() + c.get());
                b.set(a.get());
            })
        };
        let scaling = {
            let (b, c) = (b.clone(), c.clone());
            Effect::new(move || c.set(b.get() * 10))
        };
        assert_eq!(out.get(), 0);

        a.set(1);

        assert_eq!(c.get(), 10);
        assert_eq!(out.get(), a.get() + c.get());
        assert_eq!(summing.run_count(), 3);
        assert_eq!(scaling.run_count(), 2);
    }

    #[test]
    fn body_writing_a_cell_it_reads_does_not_loop() {
        let cell = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let effect = {
            let cell = cell.clone();
            let runs = runs.clone();
            Effect::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                cell.set(cell.get() + 1);
            })
        };
        assert_eq!(cell.get(), 1);

        // The write made by the run is coalesced by the notifying cell.
        cell.set(10);
        assert_eq!(cell.get(), 11);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(effect.run_count(), 2);

        cell.set(20);
        assert_eq!(cell.get(), 21);
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn stop_releases_what_the_body_captured() {
        let cell = Cell::new(0);
        let captured = Arc::new(());

        let effect = {
            let cell = cell.clone();
            let captured = captured.clone();
            Effect::new(move || {
                let _held = &captured;
                cell.get();
            })
        };
        assert_eq!(Arc::strong_count(&captured), 2);

        effect.stop();
        assert_eq!(Arc::strong_count(&captured), 1);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn panic_on_first_run_reaches_creator() {
        let result = panic::catch_unwind(|| {
            Effect::new(|| panic!("broken body"));
        });
        assert!(result.is_err());
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn failed_run_keeps_previous_subscriptions() {
        let trigger = Cell::new(0);
        let extra = Cell::new(0);

        let effect = {
            let (trigger, extra) = (trigger.clone(), extra.clone());
            Effect::new(move || {
                if trigger.get() == 1 {
                    extra.get();
                    panic!("cannot handle 1");
                }
            })
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| trigger.set(1)));
        assert!(result.is_err());
        assert!(effect.depends_on(trigger.id()));
        assert!(!effect.depends_on(extra.id()));
        assert_eq!(extra.subscriber_count(), 0);
        assert_eq!(effect.run_count(), 1);

        trigger.set(2);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_created_inside_effect_leaves_outer_tracking_intact() {
        let outer_cell = Cell::new(0);
        let inner_cell = Cell::new(0);
        let inner_effects: Arc<Mutex<Vec<Effect>>> = Arc::new(Mutex::new(Vec::new()));

        let outer = {
            let (outer_cell, inner_cell) = (outer_cell.clone(), inner_cell.clone());
            let inner_effects = inner_effects.clone();
            Effect::new(move || {
                let inner_cell = inner_cell.clone();
                let inner = Effect::new(move || {
                    inner_cell.get();
                });
                inner_effects.lock().push(inner);
                outer_cell.get();
            })
        };

        assert!(outer.depends_on(outer_cell.id()));
        assert!(!outer.depends_on(inner_cell.id()));
        assert!(inner_effects.lock()[0].depends_on(inner_cell.id()));

        for effect in inner_effects.lock().drain(..) {
            effect.stop();
        }
        outer.stop();
    }
}
