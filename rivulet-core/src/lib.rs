//! Rivulet Core
//!
//! This crate provides a fine-grained reactive runtime:
//!
//! - Observable cells with synchronous change notification
//! - Automatic dependency tracking for effects
//! - Explicit watchers over a fixed list of cells
//! - Read-only views of cells
//!
//! Dependencies are discovered at the granularity of each cell actually
//! read, without the caller declaring them.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulet_core::reactive::{run_effect, Cell};
//!
//! let a = Cell::new(3);
//! let b = Cell::new(5);
//! let sum = Cell::new(-1);
//!
//! // Runs immediately, then whenever `a` or `b` changes
//! run_effect({
//!     let (a, b, sum) = (a.clone(), b.clone(), sum.clone());
//!     move || sum.set(a.get() + b.get())
//! });
//! assert_eq!(sum.get(), 8);
//!
//! a.set(4);
//! assert_eq!(sum.get(), 9);
//! ```

pub mod reactive;

pub use reactive::{
    readonly, run_effect, watch, Cell, Effect, ReactiveError, ReadonlyCell, WatchOptions, Watcher,
};
