//! Errors raised by the reactive engine.

use std::any::Any;

use thiserror::Error;

use super::cell::CellId;

/// Errors surfaced by cell writes.
///
/// Failures inside user computations are panics. `Cell::set` re-raises them
/// unchanged; `Cell::try_set` reports them as [`ReactiveError::SubscriberPanicked`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A write was attempted through a read-only handle.
    #[error("cannot write to {cell}: handle is read-only")]
    ReadonlyViolation { cell: CellId },

    /// A subscriber (effect, watcher or plain callback) panicked while the
    /// cell was notifying. Only the first panic of a pass is reported.
    #[error("subscriber of {cell} panicked: {message}")]
    SubscriberPanicked { cell: CellId, message: String },
}

impl ReactiveError {
    pub(crate) fn from_panic(cell: CellId, payload: &(dyn Any + Send)) -> Self {
        Self::SubscriberPanicked {
            cell,
            message: panic_message(payload),
        }
    }
}

/// Result type for fallible reactive operations.
pub type Result<T> = std::result::Result<T, ReactiveError>;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_static_and_owned_messages() {
        let cell = CellId::next();

        let err = ReactiveError::from_panic(cell, &"boom");
        assert_eq!(
            err,
            ReactiveError::SubscriberPanicked {
                cell,
                message: "boom".into()
            }
        );

        let err = ReactiveError::from_panic(cell, &String::from("owned"));
        assert!(err.to_string().ends_with("panicked: owned"));

        let err = ReactiveError::from_panic(cell, &42_u32);
        assert!(err.to_string().contains("non-string"));
    }

    #[test]
    fn readonly_violation_names_the_cell() {
        let cell = CellId::next();
        let err = ReactiveError::ReadonlyViolation { cell };
        assert_eq!(err.to_string(), format!("cannot write to {cell}: handle is read-only"));
    }
}
