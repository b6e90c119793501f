//! Subscriber types for the reactive system.
//!
//! A Subscriber is a change callback attached to a cell. Effects and
//! watchers attach their own type-erased listeners through the same
//! mechanism, keyed by a [`SubscriberId`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a subscriber.
///
/// Closures have no identity of their own, so every subscription (user
/// callback, effect or watcher) carries an ID. Subscribing the same ID twice
/// is a no-op, which is what makes `subscribe`/`unsubscribe` idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Typed change callback, invoked with `(new_value, old_value)`.
pub(crate) type Callback<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Untyped change callback used by effects and watchers.
///
/// A listener only learns that a cell changed; it reads whatever values it
/// needs itself.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// A change callback for a cell holding values of type `T`.
///
/// Cloning a subscriber keeps its ID, so every clone refers to the same
/// subscription.
///
/// ```rust,ignore
/// let count = Cell::new(0);
/// let log = Subscriber::new(|new: &i32, old: &i32| println!("{old} -> {new}"));
///
/// count.subscribe(&log);
/// count.set(1); // prints "0 -> 1"
/// count.unsubscribe(&log);
/// ```
pub struct Subscriber<T> {
    id: SubscriberId,
    notify: Callback<T>,
}

impl<T> Subscriber<T> {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Invoke the callback directly.
    pub fn notify(&self, value: &T, old_value: &T) {
        (self.notify)(value, old_value);
    }

    pub(crate) fn callback(&self) -> Callback<T> {
        Arc::clone(&self.notify)
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}
