//! Coordination point between a consumer and the sequences it depends on.
//!
//! A [`ProcessingSequenceBarrier`] is handed to each processor at wiring
//! time. Its dependency set is the publisher cursor for a first-stage
//! consumer, or the sequences of the upstream stage for a chained one, so
//! the same `wait_for` call expresses both "wait for the producer" and
//! "wait for the stage before me".
//!
//! Two flags can interrupt a wait. The `alerted` flag belongs to this
//! barrier alone and is how an individual processor group is halted. The
//! `shutdown` flag is shared with the sequencer that created the barrier
//! and trips every barrier at once when the ring is drained. Either way,
//! strategies check availability first, so sequences published before the
//! interruption are still delivered.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    sequence::{AtomicSequence, Sequence},
    traits::{SequenceBarrier, WaitingStrategy},
};

pub struct ProcessingSequenceBarrier<W: WaitingStrategy> {
    shutdown: Arc<AtomicBool>,
    alerted: Arc<AtomicBool>,
    gating_sequences: Vec<Arc<AtomicSequence>>,
    waiting_strategy: Arc<W>,
}

impl<W: WaitingStrategy> ProcessingSequenceBarrier<W> {
    pub fn new(
        shutdown: Arc<AtomicBool>,
        gating_sequences: Vec<Arc<AtomicSequence>>,
        waiting_strategy: Arc<W>,
    ) -> Self {
        ProcessingSequenceBarrier {
            shutdown,
            alerted: Arc::new(AtomicBool::new(false)),
            gating_sequences,
            waiting_strategy,
        }
    }
}

impl<W: WaitingStrategy> SequenceBarrier for ProcessingSequenceBarrier<W> {
    fn wait_for(&self, sequence: Sequence) -> Option<Sequence> {
        self.waiting_strategy
            .wait_for(sequence, &self.gating_sequences, || {
                self.shutdown.load(Ordering::Relaxed) || self.alerted.load(Ordering::Relaxed)
            })
    }

    fn signal(&self) {
        self.waiting_strategy.signal_all_when_blocking();
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Relaxed);
        self.waiting_strategy.signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Relaxed);
    }

    fn is_alerted(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.alerted.load(Ordering::Relaxed)
    }
}
