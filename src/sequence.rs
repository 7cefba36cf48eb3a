//! Cache-line padded atomic sequence counters.
//!
//! Every coordination point in the ring (the cursor, each consumer's progress
//! marker, the shared work sequence of a worker pool) is one of these
//! counters, and each is hammered by a different thread. If two of them were
//! allowed to share a cache line, every store by one thread would invalidate
//! the line under the other and the ring would spend its time in cache
//! coherence traffic instead of moving events. `AtomicSequence` therefore
//! claims a whole 64-byte line for itself: the `AtomicI64` plus explicit
//! filler, aligned to the line boundary.
//!
//! A sequence starts at −1, meaning nothing has been produced or consumed
//! yet; the first published event is sequence 0.

use std::sync::atomic::{AtomicI64, Ordering};

pub type Sequence = i64;

/// Cache line size assumed for padding purposes (bytes).
const CACHE_LINE_SIZE: usize = 64;
/// Filler required after the atomic value to fill the line.
const CACHE_LINE_PADDING: usize = CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>();

/// An atomic i64 progress marker occupying its own cache line.
///
/// Writes use release ordering and reads acquire ordering, so a value read
/// from one of these carries visibility of everything the writer did before
/// storing it. That pairing is the only synchronization between a producer
/// filling a slot and a consumer reading it.
#[repr(align(64))]
#[derive(Debug)]
pub struct AtomicSequence {
    value: AtomicI64,
    _padding: [u8; CACHE_LINE_PADDING],
}

impl AtomicSequence {
    pub fn new(initial_value: Sequence) -> Self {
        AtomicSequence {
            value: AtomicI64::new(initial_value),
            _padding: [0u8; CACHE_LINE_PADDING],
        }
    }

    /// Current value, acquire-ordered.
    pub fn get(&self) -> Sequence {
        self.value.load(Ordering::Acquire)
    }

    /// Store a new value, release-ordered.
    pub fn set(&self, new_value: Sequence) {
        self.value.store(new_value, Ordering::Release);
    }

    /// Atomically replace `expected` with `new_value`; true on success.
    pub fn compare_and_set(&self, expected: Sequence, new_value: Sequence) -> bool {
        self.value
            .compare_exchange(expected, new_value, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add 1 and return the updated value.
    pub fn increment_and_get(&self) -> Sequence {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for AtomicSequence {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl From<i64> for AtomicSequence {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for AtomicSequence {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}
