//! Sequence claiming and publication, the write side of the ring.
//!
//! A sequencer owns the cursor and hands out slot sequences to producers.
//! Claiming and publishing are separate steps so the slot can be written in
//! place between them:
//!
//! 1. The producer claims a range via `next()` (or `try_next()` when it
//!    would rather fail than wait).
//! 2. It writes the events into the claimed slots.
//! 3. It publishes the range, making the events visible to consumers.
//!
//! Backpressure lives entirely in step 1: a claim may not wrap the ring
//! past the slowest gating sequence, so `next()` stalls (with the ring's
//! wait strategy) until consumers free capacity. A batch larger than the
//! whole buffer can never succeed and is rejected as
//! [`DisruptorError::InvalidBatchSize`] instead of waiting forever.
//!
//! Two implementations cover the producer topologies:
//!
//! - [`SingleProducerSequencer`] keeps its claim state in plain [`Cell`]s,
//!   which makes it `!Sync`. Sharing it across threads is a compile error,
//!   so the single-writer rule is enforced by the type system rather than
//!   a runtime check, and claims cost no atomic read-modify-write.
//! - [`MultiProducerSequencer`] claims through a CAS loop and tracks
//!   publication per slot in an availability buffer, so producers on
//!   different threads can claim and publish out of order while consumers
//!   only ever observe the contiguous published prefix through the cursor.
//!
//! # Usage Example
//! ```rust
//! use raceway::{
//!     sequencer::{SingleProducerSequencer, Sequencer},
//!     waiting::BusySpinWaitStrategy,
//! };
//!
//! let sequencer = SingleProducerSequencer::new(1024, BusySpinWaitStrategy);
//! let (start, end) = sequencer.next(1).unwrap();
//! sequencer.publish(start, end);
//! assert_eq!(sequencer.get_cursor().get(), 0);
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use log::warn;

use crate::barrier::ProcessingSequenceBarrier;
use crate::errors::{DisruptorError, Result};
use crate::sequence::{AtomicSequence, Sequence};
pub use crate::traits::Sequencer;
use crate::traits::WaitingStrategy;
use crate::utils::{AvailableSequenceBuffer, Utils};

/// A sequencer for exactly one producer thread.
///
/// Claim state is unsynchronized, so this type is deliberately `!Sync`;
/// the cursor it publishes through is still safe to share with consumers.
pub struct SingleProducerSequencer<W: WaitingStrategy> {
    buffer_size: i64,
    cursor: Arc<AtomicSequence>,
    next_value: Cell<Sequence>,
    cached_gate: Cell<Sequence>,
    gating_sequences: Vec<Arc<AtomicSequence>>,
    waiting_strategy: Arc<W>,
    is_done: Arc<AtomicBool>,
}

impl<W: WaitingStrategy> SingleProducerSequencer<W> {
    pub fn new(buffer_size: usize, waiting_strategy: W) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            cursor: Arc::new(AtomicSequence::default()),
            next_value: Cell::new(0),
            cached_gate: Cell::new(-1),
            gating_sequences: Vec::new(),
            waiting_strategy: Arc::new(waiting_strategy),
            is_done: Default::default(),
        }
    }

    fn check_batch_size(&self, n: Sequence) -> Result<()> {
        if n < 1 || n > self.buffer_size {
            return Err(DisruptorError::InvalidBatchSize {
                requested: n,
                capacity: self.buffer_size,
            });
        }
        Ok(())
    }
}

impl<W: WaitingStrategy> Sequencer for SingleProducerSequencer<W> {
    type Barrier = ProcessingSequenceBarrier<W>;

    fn add_gating_sequence(&mut self, gating_sequence: &Arc<AtomicSequence>) {
        self.gating_sequences.push(gating_sequence.clone());
    }

    fn remove_gating_sequence(&mut self, sequence: &Arc<AtomicSequence>) -> bool {
        let index = self
            .gating_sequences
            .iter()
            .position(|s| Arc::ptr_eq(s, sequence));
        if let Some(index) = index {
            self.gating_sequences.remove(index);
            true
        } else {
            false
        }
    }

    fn create_sequence_barrier(&self, gating_sequences: &[Arc<AtomicSequence>]) -> Self::Barrier {
        ProcessingSequenceBarrier::new(
            self.is_done.clone(),
            Vec::from(gating_sequences),
            self.waiting_strategy.clone(),
        )
    }

    fn get_cursor(&self) -> Arc<AtomicSequence> {
        self.cursor.clone()
    }

    fn next(&self, n: Sequence) -> Result<(Sequence, Sequence)> {
        self.check_batch_size(n)?;

        let start = self.next_value.get();
        let end = start + (n - 1);
        let wrap_point = end - self.buffer_size;

        if wrap_point > self.cached_gate.get() {
            // The closure never alerts, so the strategy spins until the
            // slowest consumer has passed the wrap point.
            if let Some(minimum_sequence) =
                self.waiting_strategy
                    .wait_for(wrap_point, &self.gating_sequences, || false)
            {
                self.cached_gate.set(minimum_sequence);
            }
        }

        self.next_value.set(end + 1);
        Ok((start, end))
    }

    fn try_next(&self, n: Sequence) -> Result<(Sequence, Sequence)> {
        self.check_batch_size(n)?;

        let start = self.next_value.get();
        let end = start + (n - 1);
        let wrap_point = end - self.buffer_size;

        if wrap_point > self.cached_gate.get() {
            let minimum_sequence = Utils::get_minimum_sequence(&self.gating_sequences);
            self.cached_gate.set(minimum_sequence);
            if wrap_point > minimum_sequence {
                return Err(DisruptorError::InsufficientCapacity(n));
            }
        }

        self.next_value.set(end + 1);
        Ok((start, end))
    }

    fn publish(&self, _low: Sequence, high: Sequence) {
        self.cursor.set(high);
        self.waiting_strategy.signal_all_when_blocking();
    }

    fn drain(self) {
        let published = self.next_value.get() - 1;

        while Utils::get_minimum_sequence(&self.gating_sequences) < published {
            self.waiting_strategy.signal_all_when_blocking();
            std::thread::yield_now();
        }

        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
    }

    fn drain_timeout(self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let published = self.next_value.get() - 1;

        while Utils::get_minimum_sequence(&self.gating_sequences) < published {
            if Instant::now() >= deadline {
                warn!("draining timed out after {:?}; forcing halt", timeout);
                self.is_done.store(true, Ordering::SeqCst);
                self.waiting_strategy.signal_all_when_blocking();
                return Err(DisruptorError::ShutdownTimedOut(timeout));
            }
            self.waiting_strategy.signal_all_when_blocking();
            std::thread::yield_now();
        }

        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
        Ok(())
    }
}

impl<W: WaitingStrategy> Drop for SingleProducerSequencer<W> {
    fn drop(&mut self) {
        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
    }
}

/// A sequencer for any number of producer threads.
///
/// Claims are serialized through a CAS on `claim_sequence`. Publication is
/// decoupled from claiming: each published slot is marked in the
/// availability buffer with its lap number, and the cursor is advanced
/// over the contiguous marked prefix so consumers never observe a gap.
pub struct MultiProducerSequencer<W: WaitingStrategy> {
    buffer_size: i64,
    cursor: Arc<AtomicSequence>,
    claim_sequence: AtomicSequence,
    cached_gate: CachePadded<AtomicI64>,
    available_buffer: AvailableSequenceBuffer,
    gating_sequences: Vec<Arc<AtomicSequence>>,
    waiting_strategy: Arc<W>,
    is_done: Arc<AtomicBool>,
}

impl<W: WaitingStrategy> MultiProducerSequencer<W> {
    pub fn new(buffer_size: usize, waiting_strategy: W) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            cursor: Arc::new(AtomicSequence::default()),
            claim_sequence: AtomicSequence::default(),
            cached_gate: CachePadded::new(AtomicI64::new(-1)),
            available_buffer: AvailableSequenceBuffer::new(buffer_size as i64),
            gating_sequences: Vec::new(),
            waiting_strategy: Arc::new(waiting_strategy),
            is_done: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check_batch_size(&self, n: Sequence) -> Result<()> {
        if n < 1 || n > self.buffer_size {
            return Err(DisruptorError::InvalidBatchSize {
                requested: n,
                capacity: self.buffer_size,
            });
        }
        Ok(())
    }

    /// Scans the availability buffer from `lower_bound` and returns the
    /// highest sequence up to `available_upper_bound` that is published
    /// with no gap below it, or `lower_bound - 1` if none is.
    pub fn get_highest_published_sequence(
        &self,
        lower_bound: Sequence,
        available_upper_bound: Sequence,
    ) -> Sequence {
        let mut highest = lower_bound - 1;
        for sequence in lower_bound..=available_upper_bound {
            if !self.available_buffer.is_set(sequence) {
                break;
            }
            highest = sequence;
        }
        highest
    }
}

impl<W: WaitingStrategy> Sequencer for MultiProducerSequencer<W> {
    type Barrier = ProcessingSequenceBarrier<W>;

    fn add_gating_sequence(&mut self, gating_sequence: &Arc<AtomicSequence>) {
        self.gating_sequences.push(gating_sequence.clone());
    }

    fn remove_gating_sequence(&mut self, sequence: &Arc<AtomicSequence>) -> bool {
        if let Some(pos) = self
            .gating_sequences
            .iter()
            .position(|s| Arc::ptr_eq(s, sequence))
        {
            self.gating_sequences.remove(pos);
            true
        } else {
            false
        }
    }

    fn create_sequence_barrier(&self, gating_sequences: &[Arc<AtomicSequence>]) -> Self::Barrier {
        ProcessingSequenceBarrier::new(
            self.is_done.clone(),
            Vec::from(gating_sequences),
            self.waiting_strategy.clone(),
        )
    }

    fn get_cursor(&self) -> Arc<AtomicSequence> {
        self.cursor.clone()
    }

    fn next(&self, n: Sequence) -> Result<(Sequence, Sequence)> {
        self.check_batch_size(n)?;

        loop {
            let current = self.claim_sequence.get();
            let end = current + n;
            let wrap_point = end - self.buffer_size;

            if wrap_point > self.cached_gate.load(Ordering::Relaxed) {
                if let Some(minimum_sequence) =
                    self.waiting_strategy
                        .wait_for(wrap_point, &self.gating_sequences, || false)
                {
                    self.cached_gate.store(minimum_sequence, Ordering::Relaxed);
                }
                // The claim race restarts from a fresh read either way.
                continue;
            }

            if self.claim_sequence.compare_and_set(current, end) {
                return Ok((current + 1, end));
            }
        }
    }

    fn try_next(&self, n: Sequence) -> Result<(Sequence, Sequence)> {
        self.check_batch_size(n)?;

        loop {
            let current = self.claim_sequence.get();
            let end = current + n;
            let wrap_point = end - self.buffer_size;

            let minimum_sequence = Utils::get_minimum_sequence(&self.gating_sequences);
            self.cached_gate.store(minimum_sequence, Ordering::Relaxed);
            if wrap_point > minimum_sequence {
                return Err(DisruptorError::InsufficientCapacity(n));
            }

            if self.claim_sequence.compare_and_set(current, end) {
                return Ok((current + 1, end));
            }
        }
    }

    fn publish(&self, low: Sequence, high: Sequence) {
        for sequence in low..=high {
            self.available_buffer.set(sequence);
        }

        // Advance the cursor over the contiguous published prefix. A claim
        // below ours may still be unpublished; wait for its mark so the
        // cursor never exposes a gap. Marks above were all set before their
        // publisher entered this loop, so the wait cannot cycle.
        loop {
            let current = self.cursor.get();
            if current >= high {
                break;
            }

            let available =
                self.get_highest_published_sequence(current + 1, self.claim_sequence.get());
            if available > current {
                self.cursor.compare_and_set(current, available);
            } else {
                std::hint::spin_loop();
            }
        }

        self.waiting_strategy.signal_all_when_blocking();
    }

    fn drain(self) {
        let published = self.cursor.get();

        while Utils::get_minimum_sequence(&self.gating_sequences) < published {
            self.waiting_strategy.signal_all_when_blocking();
            std::thread::yield_now();
        }

        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
    }

    fn drain_timeout(self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let published = self.cursor.get();

        while Utils::get_minimum_sequence(&self.gating_sequences) < published {
            if Instant::now() >= deadline {
                warn!("draining timed out after {:?}; forcing halt", timeout);
                self.is_done.store(true, Ordering::SeqCst);
                self.waiting_strategy.signal_all_when_blocking();
                return Err(DisruptorError::ShutdownTimedOut(timeout));
            }
            self.waiting_strategy.signal_all_when_blocking();
            std::thread::yield_now();
        }

        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
        Ok(())
    }
}

impl<W: WaitingStrategy> Drop for MultiProducerSequencer<W> {
    fn drop(&mut self) {
        self.is_done.store(true, Ordering::SeqCst);
        self.waiting_strategy.signal_all_when_blocking();
    }
}
