//! Core traits wiring the ring together.
//!
//! The seams fall into four groups:
//!
//! - **Coordination**: [`Sequencer`] claims and publishes slots,
//!   [`SequenceBarrier`] answers "when is sequence N safe to read", and
//!   [`WaitingStrategy`] decides how a thread waits for that answer.
//! - **Storage**: [`DataProvider`] is slot access over the pre-allocated
//!   buffer; the claim/publish protocol is its safety argument.
//! - **Processing**: [`EventProcessor`] turns an [`EventHandler`] into a
//!   [`Runnable`] run loop; [`ExceptionHandler`] decides what a failed event
//!   means for that loop.
//! - **Execution**: [`EventProcessorExecutor`] owns the spawned run loops,
//!   [`ExecutorHandle`] joins them, and [`EventProducer`] is the write-side
//!   handle.
//!
//! Everything handed to a run loop is moved onto its OS thread, so handlers,
//! barriers and storage are owned (`'static`) rather than borrowed.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::sequence::{AtomicSequence, Sequence};

/// Consumer-side view of publication progress.
///
/// `wait_for` blocks (per the wait strategy) until the requested sequence is
/// available and returns the highest available sequence, or `None` once the
/// barrier has been alerted and nothing further is available. Availability is
/// always reported in preference to the alert, so a halting processor still
/// drains work that was already published.
pub trait SequenceBarrier: Send + Sync {
    fn wait_for(&self, sequence: Sequence) -> Option<Sequence>;

    /// Wake any threads blocked in `wait_for`.
    fn signal(&self);

    /// Request cancellation: raise the alert flag and wake blocked waiters.
    fn alert(&self);

    fn clear_alert(&self);

    fn is_alerted(&self) -> bool;
}

// Lets a pool of workers share a single barrier.
impl<B: SequenceBarrier> SequenceBarrier for std::sync::Arc<B> {
    fn wait_for(&self, sequence: Sequence) -> Option<Sequence> {
        (**self).wait_for(sequence)
    }

    fn signal(&self) {
        (**self).signal()
    }

    fn alert(&self) {
        (**self).alert()
    }

    fn clear_alert(&self) {
        (**self).clear_alert()
    }

    fn is_alerted(&self) -> bool {
        (**self).is_alerted()
    }
}

/// Slot-claiming and publication for one ring buffer.
///
/// A sequencer owns the cursor (highest published sequence) and the gating
/// sequences (consumer progress it must not overrun). Claims are handed out
/// as inclusive `(start, end)` ranges; a claimed range must be written and
/// then published exactly once.
pub trait Sequencer {
    type Barrier: SequenceBarrier + 'static;

    fn add_gating_sequence(&mut self, gating_sequence: &Arc<AtomicSequence>);
    fn remove_gating_sequence(&mut self, sequence: &Arc<AtomicSequence>) -> bool;
    fn create_sequence_barrier(&self, gating_sequences: &[Arc<AtomicSequence>]) -> Self::Barrier;

    fn get_cursor(&self) -> Arc<AtomicSequence>;

    /// Claim the next `n` sequences, waiting while the buffer lacks capacity.
    /// Fails fast with `InvalidBatchSize` when `n` can never fit.
    fn next(&self, n: Sequence) -> Result<(Sequence, Sequence)>;

    /// Claim the next `n` sequences only if capacity is free right now;
    /// `InsufficientCapacity` otherwise.
    fn try_next(&self, n: Sequence) -> Result<(Sequence, Sequence)>;

    /// Make the inclusive range visible to consumers.
    fn publish(&self, low: Sequence, high: Sequence);

    /// Wait until every gating sequence has consumed everything published,
    /// then signal shutdown to all barriers created by this sequencer.
    fn drain(self);

    /// `drain`, but give up after `timeout`: shutdown is still signalled and
    /// `ShutdownTimedOut` reports that in-flight events may be unprocessed.
    fn drain_timeout(self, timeout: Duration) -> Result<()>;
}

/// How a thread waits for `dependencies` to reach a sequence.
///
/// `wait_for` returns the minimum of the dependency sequences once that
/// minimum is at least `sequence`, or `None` as soon as `check_alert` fires
/// while the sequence is still unavailable. Strategies that park threads
/// must wake them all in `signal_all_when_blocking`; it is invoked on every
/// publish, every processor batch completion, and every alert.
pub trait WaitingStrategy: Default + Send + Sync + 'static {
    fn new() -> Self;

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64>;

    fn signal_all_when_blocking(&self);
}

/// Slot access over the pre-allocated event storage.
///
/// # Safety
///
/// `get_mut` hands out `&mut T` from a shared reference; the interior
/// mutability behind it is sound only because the sequencer protocol makes
/// every slot exclusively owned by one claimer before publication and
/// read-only afterwards. Callers must hold a legitimate claim (producers) or
/// a barrier-confirmed available sequence (consumers).
#[allow(clippy::mut_from_ref)]
pub trait DataProvider<T>: Send + Sync {
    fn get_capacity(&self) -> usize;

    /// # Safety
    /// `sequence` must have been published and not yet reclaimed.
    unsafe fn get(&self, sequence: Sequence) -> &T;

    /// # Safety
    /// `sequence` must be claimed by the caller and unpublished, with no
    /// other references to the slot alive.
    unsafe fn get_mut(&self, sequence: Sequence) -> &mut T;
}

/// An executable run loop with cooperative halting.
pub trait Runnable: Send {
    fn run(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Assembles an event-processing run loop around a handler.
pub trait EventProcessor<T> {
    fn create<D, B>(self, data_provider: Arc<D>, barrier: B) -> Box<dyn Runnable>
    where
        D: DataProvider<T> + 'static,
        B: SequenceBarrier + 'static;

    /// The processor's progress marker, used for gating and as a dependency
    /// of downstream stages.
    fn get_sequence(&self) -> Arc<AtomicSequence>;
}

/// [`EventProcessor`] for handlers that need `&mut self`.
pub trait EventProcessorMut<T> {
    fn create<D, B>(self, data_provider: Arc<D>, barrier: B) -> Box<dyn Runnable>
    where
        D: DataProvider<T> + 'static,
        B: SequenceBarrier + 'static;

    fn get_sequence(&self) -> Arc<AtomicSequence>;
}

/// User event callback for broadcast (one-consumer-per-stage) processing.
///
/// `on_event` sees every published event in sequence order;
/// `end_of_batch` marks the last event of the current delivery batch.
/// The lifecycle hooks run once on its processor's thread.
///
/// ```
/// use raceway::{EventHandler, Sequence};
///
/// struct Summing(std::sync::atomic::AtomicI64);
///
/// impl EventHandler<i64> for Summing {
///     fn on_event(&self, event: &i64, _sequence: Sequence, _end_of_batch: bool) {
///         self.0.fetch_add(*event, std::sync::atomic::Ordering::Relaxed);
///     }
/// }
/// ```
pub trait EventHandler<T> {
    fn on_event(&self, event: &T, sequence: Sequence, end_of_batch: bool);
    fn on_start(&self) {}
    fn on_shutdown(&self) {}
}

/// [`EventHandler`] with exclusive state; the processor owns the handler, so
/// no synchronization is needed around `&mut self`.
pub trait EventHandlerMut<T> {
    fn on_event(&mut self, event: &T, sequence: Sequence, end_of_batch: bool);
    fn on_start(&mut self) {}
    fn on_shutdown(&mut self) {}
}

/// What a processor should do after a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOutcome {
    /// Skip to the next event; the pipeline keeps flowing.
    Continue,
    /// Halt this processor's run loop.
    Halt,
}

/// Policy for handler panics, with one hook per failure site.
///
/// A handler that panics mid-event is caught by its run loop and routed to
/// `handle_event_exception`, which chooses whether the loop continues.
/// Panics from the `on_start`/`on_shutdown` lifecycle hooks are reported to
/// the corresponding methods and never stop the loop themselves.
pub trait ExceptionHandler<T>: Send {
    fn handle_event_exception(
        &self,
        payload: &(dyn Any + Send),
        sequence: Sequence,
        event: &T,
    ) -> ExceptionOutcome;

    fn handle_on_start_exception(&self, payload: &(dyn Any + Send));

    fn handle_on_shutdown_exception(&self, payload: &(dyn Any + Send));
}

/// Joins the threads an executor spawned.
pub trait ExecutorHandle {
    fn join(self);
}

/// Owns assembled run loops and launches each on its own thread.
pub trait EventProcessorExecutor {
    type Handle: ExecutorHandle;
    fn with_runnables(runnables: Vec<Box<dyn Runnable>>) -> Self;
    fn spawn(self) -> Self::Handle;
}

/// Write-side handle over one ring buffer.
///
/// `write` claims one slot per item, populates each in place through the
/// translator closure, and publishes the whole range afterwards, so a slot
/// is always fully written before it becomes visible. `try_write` is the
/// non-blocking variant. `drain` consumes the producer to shut the ring
/// down once every consumer has caught up.
pub trait EventProducer {
    type Item;

    fn write<F, U, I, E>(&self, items: I, f: F) -> Result<()>
    where
        I: IntoIterator<Item = U, IntoIter = E>,
        E: ExactSizeIterator<Item = U>,
        F: Fn(&mut Self::Item, Sequence, &U);

    fn try_write<F, U, I, E>(&self, items: I, f: F) -> Result<()>
    where
        I: IntoIterator<Item = U, IntoIter = E>,
        E: ExactSizeIterator<Item = U>,
        F: Fn(&mut Self::Item, Sequence, &U);

    fn drain(self);

    fn drain_timeout(self, timeout: Duration) -> Result<()>;
}
