//! Reactive Primitives
//!
//! This module implements the reactive engine: cells, effects, watchers and
//! read-only views.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state with a list of subscribers. When
//! a cell's value is read while an effect is running, the cell registers
//! itself as one of that effect's dependencies. When the value changes, all
//! subscribers are notified synchronously.
//!
//! ## Effects
//!
//! An Effect is a computation that runs once immediately and again whenever
//! a cell it read during its last run changes. Dependencies are rediscovered
//! on every run.
//!
//! ## Watchers
//!
//! A Watcher observes an explicit list of cells and passes their values to a
//! callback. It never tracks what the callback reads.
//!
//! ## Read-only views
//!
//! A [`ReadonlyCell`] forwards reads to a cell and rejects writes.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of tracking frames (see
//! [`ReactiveContext`]). Every read path of every handle records the cell in
//! the top frame, which is how reading a value turns into declaring a
//! dependency. There is no batching: each write fully flushes before the next
//! statement runs.

mod cell;
mod context;
mod effect;
mod error;
mod readonly;
mod subscriber;
mod watch;

pub use cell::{Cell, CellId, Readable, Source};
pub use context::{untracked, with_tracking, Dependencies, ReactiveContext};
pub use effect::{run_effect, Effect};
pub use error::{ReactiveError, Result};
pub use readonly::{readonly, ReadonlyCell};
pub use subscriber::{Listener, Subscriber, SubscriberId};
pub use watch::{watch, WatchOptions, WatchSources, Watcher};
