//! Event producers that write data into the ring buffer.
//!
//! A [`Producer`] pairs a data provider with a sequencer and turns the
//! claim/write/publish protocol into one call: it claims as many slots as
//! the batch has items, runs the caller's closure over each claimed slot,
//! and publishes the whole range. Consumers never see a partially written
//! batch.
//!
//! # Usage Example
//!
//! ``` rust
//! use std::sync::Arc;
//! use raceway::{
//!     producer::Producer,
//!     ringbuffer::RingBuffer,
//!     sequencer::SingleProducerSequencer,
//!     traits::EventProducer,
//!     waiting::BusySpinWaitStrategy,
//! };
//!
//! let ring_buffer = Arc::new(RingBuffer::new(1024));
//! let sequencer = SingleProducerSequencer::new(1024, BusySpinWaitStrategy);
//! let producer = Producer::new(ring_buffer, sequencer);
//!
//! // Write a single event.
//! producer
//!     .write(std::iter::once(42), |event, _sequence, &value| {
//!         *event = value;
//!     })
//!     .unwrap();
//!
//! // Write a batch of events; the slots are claimed in one step.
//! let batch = vec![1, 2, 3, 4, 5];
//! producer
//!     .write(batch, |event, _sequence, &value| {
//!         *event = value;
//!     })
//!     .unwrap();
//! ```
//!
//! Whether a producer may be shared between threads is decided by its
//! sequencer: a producer over a [`SingleProducerSequencer`] is `!Sync` and
//! stays on one thread, while one over a `MultiProducerSequencer` can be
//! wrapped in an `Arc` and written from anywhere.
//!
//! Claims on a full ring wait for consumers, so `write` applies
//! backpressure. `try_write` claims without waiting and surfaces
//! [`InsufficientCapacity`](crate::errors::DisruptorError::InsufficientCapacity)
//! instead. After the last event, [`drain`](EventProducer::drain) blocks
//! until every consumer has caught up and then halts the pipeline.
//!
//! [`SingleProducerSequencer`]: crate::sequencer::SingleProducerSequencer

use std::sync::Arc;
use std::time::Duration;

use crate::{
    errors::Result,
    sequence::Sequence,
    traits::{DataProvider, EventProducer, Sequencer},
};

pub struct Producer<D: DataProvider<T>, T, S: Sequencer> {
    data_provider: Arc<D>,
    sequencer: S,
    _marker: std::marker::PhantomData<T>,
}

impl<D: DataProvider<T>, T, S: Sequencer> Producer<D, T, S> {
    pub fn new(data_provider: Arc<D>, sequencer: S) -> Self {
        Producer {
            data_provider,
            sequencer,
            _marker: Default::default(),
        }
    }

    fn translate_and_publish<F, U, E>(&self, iter: E, start: Sequence, end: Sequence, f: F)
    where
        E: ExactSizeIterator<Item = U>,
        F: Fn(&mut T, Sequence, &U),
    {
        for (i, item) in iter.enumerate() {
            let sequence = start + i as Sequence;
            // SAFETY: the sequencer only hands out claimed, in-bounds slots
            // that no consumer can read before publish.
            let data = unsafe { self.data_provider.get_mut(sequence) };
            f(data, sequence, &item);
        }
        self.sequencer.publish(start, end);
    }
}

impl<D: DataProvider<T>, T, S: Sequencer> EventProducer for Producer<D, T, S> {
    type Item = T;

    fn write<F, U, I, E>(&self, items: I, f: F) -> Result<()>
    where
        I: IntoIterator<Item = U, IntoIter = E>,
        E: ExactSizeIterator<Item = U>,
        F: Fn(&mut Self::Item, Sequence, &U),
    {
        let iter = items.into_iter();
        if iter.len() == 0 {
            return Ok(());
        }
        let (start, end) = self.sequencer.next(iter.len() as Sequence)?;
        self.translate_and_publish(iter, start, end, f);
        Ok(())
    }

    fn try_write<F, U, I, E>(&self, items: I, f: F) -> Result<()>
    where
        I: IntoIterator<Item = U, IntoIter = E>,
        E: ExactSizeIterator<Item = U>,
        F: Fn(&mut Self::Item, Sequence, &U),
    {
        let iter = items.into_iter();
        if iter.len() == 0 {
            return Ok(());
        }
        let (start, end) = self.sequencer.try_next(iter.len() as Sequence)?;
        self.translate_and_publish(iter, start, end, f);
        Ok(())
    }

    fn drain(self) {
        self.sequencer.drain();
    }

    fn drain_timeout(self, timeout: Duration) -> Result<()> {
        self.sequencer.drain_timeout(timeout)
    }
}
