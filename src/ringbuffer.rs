use std::cell::UnsafeCell;

use crate::sequence::Sequence;
use crate::traits::DataProvider;

/// Pre-allocated event storage with power-of-two capacity.
///
/// Slots are constructed once, up front, and then only ever mutated in place:
/// a producer fills the slot for its claimed sequence, consumers read it
/// after publication, and the slot is reused one full lap later. Indexing is
/// `sequence & (capacity - 1)`, so capacity must be a power of two.
///
/// The buffer itself holds no notion of position; producers and consumers
/// carry their own sequences and the sequencer arbitrates access. Interior
/// mutability (`UnsafeCell`) is what lets a claimed slot be written through a
/// shared reference while other slots are concurrently read.
pub struct RingBuffer<T> {
    capacity: usize,
    mask: usize,
    slots: UnsafeCell<Box<[T]>>,
}

// One slot is accessed mutably only by its claimer before publication and
// read-only afterwards; distinct slots are always disjoint. That protocol,
// not these impls, is what makes cross-thread access sound. `Sync` still
// asks `T: Sync` because broadcast consumers share `&T` to the same slot.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

const fn is_power_of_two(x: usize) -> bool {
    x != 0 && (x & (x - 1)) == 0
}

impl<T: Default> RingBuffer<T> {
    /// Buffer of `capacity` default-constructed slots.
    ///
    /// # Panics
    /// If `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        Self::with_factory(capacity, T::default)
    }
}

impl<T> RingBuffer<T> {
    /// Buffer of `capacity` slots built by `factory`, for event types without
    /// a meaningful `Default`.
    ///
    /// # Panics
    /// If `capacity` is zero or not a power of two.
    pub fn with_factory<F: FnMut() -> T>(capacity: usize, mut factory: F) -> Self {
        assert!(
            is_power_of_two(capacity),
            "ring buffer capacity must be a power of two, got {}",
            capacity
        );
        Self {
            capacity,
            mask: capacity - 1,
            slots: UnsafeCell::new((0..capacity).map(|_| factory()).collect()),
        }
    }
}

impl<T: Send + Sync> DataProvider<T> for RingBuffer<T> {
    fn get_capacity(&self) -> usize {
        self.capacity
    }

    unsafe fn get(&self, sequence: Sequence) -> &T {
        let index = (sequence as usize) & self.mask;
        &(*self.slots.get())[index]
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self, sequence: Sequence) -> &mut T {
        let index = (sequence as usize) & self.mask;
        &mut (*self.slots.get())[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_wrap_by_mask() {
        let buffer = RingBuffer::<i64>::new(4);
        unsafe {
            for sequence in 0..4 {
                *buffer.get_mut(sequence) = sequence + 1;
            }
            assert_eq!(*buffer.get(0), 1);
            assert_eq!(*buffer.get(3), 4);

            // Sequence 4 lands back on index 0.
            *buffer.get_mut(4) = 5;
            assert_eq!(*buffer.get(0), 5);
            assert_eq!(*buffer.get(4), 5);
            assert_eq!(*buffer.get(1), 2);
        }
    }

    #[test]
    fn test_capacity() {
        let buffer = RingBuffer::<i64>::new(16);
        assert_eq!(buffer.get_capacity(), 16);
    }

    #[test]
    fn test_factory_construction() {
        let mut next = 100;
        let buffer = RingBuffer::with_factory(4, || {
            next += 1;
            next
        });
        unsafe {
            assert_eq!(*buffer.get(0), 101);
            assert_eq!(*buffer.get(3), 104);
        }
    }

    #[test]
    #[should_panic]
    fn test_rejects_non_power_of_two_capacity() {
        let _ = RingBuffer::<i64>::new(3);
    }

    #[test]
    #[should_panic]
    fn test_rejects_zero_capacity() {
        let _ = RingBuffer::<i64>::new(0);
    }
}
