use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::sequence::{AtomicSequence, Sequence};

pub struct Utils;

impl Utils {
    /// Minimum of a set of shared sequences, or `i64::MAX` when the set is
    /// empty so an unconstrained producer is never gated.
    pub fn get_minimum_sequence(sequences: &[Arc<AtomicSequence>]) -> i64 {
        sequences.iter().map(|s| s.get()).min().unwrap_or(i64::MAX)
    }
}

/// Publication flags for out-of-order multi-producer publishing.
///
/// One atomic word per ring slot records the *lap* (`sequence >> log2(
/// capacity)`) that last published the slot's index. A sequence counts as
/// published once its slot holds its own lap number. Gating keeps live
/// sequences for one index a single lap apart, so the lap alone is enough to
/// tell a fresh publication from the previous occupant, and slots never need
/// to be cleared between laps. Flags start at −1, which no real lap uses.
pub struct AvailableSequenceBuffer {
    flags: Box<[AtomicI64]>,
    index_mask: i64,
    index_shift: u32,
}

impl AvailableSequenceBuffer {
    pub fn new(buffer_size: i64) -> Self {
        Self {
            flags: (0..buffer_size).map(|_| AtomicI64::new(-1)).collect(),
            index_mask: buffer_size - 1,
            index_shift: buffer_size.trailing_zeros(),
        }
    }

    /// Mark `sequence` as published on its lap.
    pub fn set(&self, sequence: Sequence) {
        let index = (sequence & self.index_mask) as usize;
        let lap = sequence >> self.index_shift;
        self.flags[index].store(lap, Ordering::Release);
    }

    /// True once `sequence` itself (not an earlier lap of its index) has been
    /// published.
    pub fn is_set(&self, sequence: Sequence) -> bool {
        let index = (sequence & self.index_mask) as usize;
        let lap = sequence >> self.index_shift;
        self.flags[index].load(Ordering::Acquire) == lap
    }
}
