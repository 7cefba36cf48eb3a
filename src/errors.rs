use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Classified failures surfaced by the claim and shutdown paths.
///
/// Steady-state processing never reports these: cancellation travels out of
/// band as a `None` from `SequenceBarrier::wait_for`, and handler failures are
/// routed to the installed [ExceptionHandler](crate::traits::ExceptionHandler).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DisruptorError {
    /// A non-waiting claim found fewer free slots than requested.
    #[error("insufficient capacity to claim {0} slot(s)")]
    InsufficientCapacity(i64),

    /// A batch claim asked for less than one slot, or for more slots than the
    /// buffer holds. No amount of waiting can satisfy it, so it is reported
    /// instead of retried.
    #[error("batch of {requested} slot(s) can never be claimed from a buffer of {capacity}")]
    InvalidBatchSize { requested: i64, capacity: i64 },

    /// A timed drain expired before every gating sequence caught up.
    #[error("shutdown timed out after {0:?} with events still in flight")]
    ShutdownTimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, DisruptorError>;

/// Best-effort extraction of a panic payload's message, used by exception
/// handlers when logging a failed event.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
