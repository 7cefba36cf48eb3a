use std::sync::Arc;

use crate::{
    executor::ThreadedExecutor,
    processor::EventProcessorFactory,
    producer::Producer,
    ringbuffer::RingBuffer,
    sequence::AtomicSequence,
    sequencer::{MultiProducerSequencer, SingleProducerSequencer},
    traits::{
        DataProvider, EventHandler, EventHandlerMut, EventProcessor, EventProcessorExecutor,
        EventProcessorMut, EventProducer, ExceptionHandler, Runnable, Sequencer, WaitingStrategy,
    },
    waiting::{
        BlockingWaitStrategy, BusySpinWaitStrategy, PhasedBackoffWaitStrategy,
        SleepingWaitStrategy, YieldingWaitStrategy,
    },
    work::{WorkProcessorFactory, WorkerPool},
};

/// # Pipeline Builder Guide
///
/// The builder follows a type-state pattern so that a pipeline can only be
/// assembled in a valid order, checked at compile time:
///
/// 1. Start with a data provider (usually a ring buffer)
/// 2. Pick a waiting strategy
/// 3. Pick a sequencer (single or multi producer)
/// 4. Add event handlers in barrier scopes
/// 5. Build, then spawn the executor
///
/// ## Example Usage
/// ```rust
/// use raceway::{
///     DisruptorBuilder, EventHandler, EventProcessorExecutor, EventProducer, ExecutorHandle,
///     sequence::Sequence,
/// };
///
/// #[derive(Default)]
/// struct Tick(i64);
///
/// struct TickHandler;
///
/// impl EventHandler<Tick> for TickHandler {
///     fn on_event(&self, _event: &Tick, _sequence: Sequence, _end_of_batch: bool) {}
/// }
///
/// let (executor, producer) = DisruptorBuilder::with_ring_buffer::<Tick>(1024)
///     .with_yielding_waiting_strategy()
///     .with_single_producer_sequencer()
///     .with_barrier(|scope| {
///         scope.handle_events(TickHandler);
///     })
///     .build();
///
/// let handle = executor.spawn();
/// producer
///     .write(std::iter::once(7), |event, _sequence, &value| {
///         event.0 = value;
///     })
///     .unwrap();
/// producer.drain();
/// handle.join();
/// ```
///
/// ## Barrier Scopes
/// Handlers registered in the same scope run in parallel, each seeing every
/// event. Each further `with_barrier` call opens a downstream stage that
/// waits for all handlers of the previous one, so a chain of calls builds a
/// pipeline:
///
/// ```rust
/// use raceway::{
///     DisruptorBuilder, EventHandler, EventProcessorExecutor, EventProducer, ExecutorHandle,
///     sequence::Sequence,
/// };
///
/// struct Stage(&'static str);
///
/// impl EventHandler<i64> for Stage {
///     fn on_event(&self, _event: &i64, _sequence: Sequence, _end_of_batch: bool) {}
/// }
///
/// let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(256)
///     .with_yielding_waiting_strategy()
///     .with_single_producer_sequencer()
///     .with_barrier(|scope| {
///         // These two run in parallel.
///         scope.handle_events(Stage("journal"));
///         scope.handle_events(Stage("replicate"));
///     })
///     .with_barrier(|scope| {
///         // This one waits for both of the above.
///         scope.handle_events(Stage("apply"));
///     })
///     .build();
///
/// let handle = executor.spawn();
/// producer.drain();
/// handle.join();
/// ```
///
/// ## Worker Pools
/// `handle_events_with_workers` registers a group of handlers that divide
/// the stream between them instead of each seeing all of it. It hands back
/// a [`WorkerPool`] for draining the pool explicitly:
///
/// ```rust
/// use raceway::{
///     DisruptorBuilder, EventHandler, EventProcessorExecutor, EventProducer, ExecutorHandle,
///     sequence::Sequence,
/// };
///
/// struct Worker;
///
/// impl EventHandler<i64> for Worker {
///     fn on_event(&self, _event: &i64, _sequence: Sequence, _end_of_batch: bool) {}
/// }
///
/// let mut pool = None;
/// let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(64)
///     .with_yielding_waiting_strategy()
///     .with_single_producer_sequencer()
///     .with_barrier(|scope| {
///         pool = Some(scope.handle_events_with_workers((0..2).map(|_| Worker).collect()));
///     })
///     .build();
///
/// let handle = executor.spawn();
/// producer
///     .write(vec![1, 2, 3, 4], |event, _sequence, &value| {
///         *event = value;
///     })
///     .unwrap();
/// pool.unwrap().drain_and_halt();
/// producer.drain();
/// handle.join();
/// ```
#[derive(Debug)]
pub struct DisruptorBuilder {}

pub struct WithDataProvider<D: DataProvider<T>, T>
where
    T: Send + Sync,
{
    data_provider: Arc<D>,
    _marker: std::marker::PhantomData<T>,
}

pub struct WithWaitingStrategy<W: WaitingStrategy, D: DataProvider<T>, T>
where
    T: Send + Sync,
{
    with_data_provider: WithDataProvider<D, T>,
    _waiting_strategy: std::marker::PhantomData<W>,
}

pub struct WithSequencer<S: Sequencer, W: WaitingStrategy, D: DataProvider<T>, T>
where
    T: Send + Sync,
{
    with_waiting_strategy: WithWaitingStrategy<W, D, T>,
    sequencer: S,
}

/// One dependency stage of the pipeline under construction.
///
/// Every handler or worker pool registered on the scope waits on the same
/// upstream sequences; the sequences of what is registered here become the
/// dependencies of the next scope.
pub struct BarrierScope<S: Sequencer, D: DataProvider<T>, T> {
    sequencer: S,
    data_provider: Arc<D>,
    gating_sequences: Vec<Arc<AtomicSequence>>,
    cursors: Vec<Arc<AtomicSequence>>,
    event_handlers: Vec<Box<dyn Runnable>>,
    _element: std::marker::PhantomData<T>,
}

pub struct WithEventHandlers<S: Sequencer, W: WaitingStrategy, D: DataProvider<T>, T>
where
    T: Send + Sync,
{
    with_sequencer: WithSequencer<S, W, D, T>,
    event_handlers: Vec<Box<dyn Runnable>>,
    gating_sequences: Vec<Arc<AtomicSequence>>,
}

impl DisruptorBuilder {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<D: DataProvider<T>, T>(data_provider: Arc<D>) -> WithDataProvider<D, T>
    where
        T: Send + Sync,
    {
        WithDataProvider {
            data_provider,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_ring_buffer<T>(capacity: usize) -> WithDataProvider<RingBuffer<T>, T>
    where
        T: Default + Send + Sync,
    {
        Self::new(Arc::new(RingBuffer::new(capacity)))
    }
}

impl<D: DataProvider<T>, T> WithDataProvider<D, T>
where
    T: Send + Sync,
{
    pub fn with_waiting_strategy<W: WaitingStrategy>(self) -> WithWaitingStrategy<W, D, T> {
        WithWaitingStrategy {
            with_data_provider: self,
            _waiting_strategy: Default::default(),
        }
    }

    pub fn with_busy_spin_waiting_strategy(
        self,
    ) -> WithWaitingStrategy<BusySpinWaitStrategy, D, T> {
        self.with_waiting_strategy()
    }

    pub fn with_yielding_waiting_strategy(self) -> WithWaitingStrategy<YieldingWaitStrategy, D, T> {
        self.with_waiting_strategy()
    }

    pub fn with_sleeping_waiting_strategy(self) -> WithWaitingStrategy<SleepingWaitStrategy, D, T> {
        self.with_waiting_strategy()
    }

    pub fn with_blocking_waiting_strategy(self) -> WithWaitingStrategy<BlockingWaitStrategy, D, T> {
        self.with_waiting_strategy()
    }

    pub fn with_phased_backoff_waiting_strategy(
        self,
    ) -> WithWaitingStrategy<PhasedBackoffWaitStrategy, D, T> {
        self.with_waiting_strategy()
    }
}

impl<W: WaitingStrategy, D: DataProvider<T>, T> WithWaitingStrategy<W, D, T>
where
    T: Send + Sync,
{
    pub fn with_sequencer<S: Sequencer>(self, sequencer: S) -> WithSequencer<S, W, D, T> {
        WithSequencer {
            with_waiting_strategy: self,
            sequencer,
        }
    }

    pub fn with_single_producer_sequencer(
        self,
    ) -> WithSequencer<SingleProducerSequencer<W>, W, D, T> {
        let buffer_size = self.with_data_provider.data_provider.get_capacity();
        self.with_sequencer(SingleProducerSequencer::new(buffer_size, W::new()))
    }

    pub fn with_multi_producer_sequencer(
        self,
    ) -> WithSequencer<MultiProducerSequencer<W>, W, D, T> {
        let buffer_size = self.with_data_provider.data_provider.get_capacity();
        self.with_sequencer(MultiProducerSequencer::new(buffer_size, W::new()))
    }
}

impl<S, W, D, T> WithSequencer<S, W, D, T>
where
    S: Sequencer + 'static,
    W: WaitingStrategy,
    D: DataProvider<T> + 'static,
    T: Send + Sync + 'static,
{
    pub fn with_barrier(
        mut self,
        f: impl FnOnce(&mut BarrierScope<S, D, T>),
    ) -> WithEventHandlers<S, W, D, T> {
        let cursor = self.sequencer.get_cursor();
        let mut scope = BarrierScope {
            sequencer: self.sequencer,
            data_provider: self
                .with_waiting_strategy
                .with_data_provider
                .data_provider
                .clone(),
            gating_sequences: vec![cursor],
            event_handlers: Vec::new(),
            cursors: Vec::new(),
            _element: Default::default(),
        };

        f(&mut scope);
        self.sequencer = scope.sequencer;

        WithEventHandlers {
            with_sequencer: self,
            event_handlers: scope.event_handlers,
            gating_sequences: scope.cursors,
        }
    }
}

impl<S, D, T> BarrierScope<S, D, T>
where
    S: Sequencer + 'static,
    D: DataProvider<T> + 'static,
    T: Send + Sync + 'static,
{
    pub fn handle_events<E>(&mut self, handler: E)
    where
        E: EventHandler<T> + Send + 'static,
    {
        self.handle_events_with(EventProcessorFactory::create(handler));
    }

    pub fn handle_events_mut<E>(&mut self, handler: E)
    where
        E: EventHandlerMut<T> + Send + 'static,
    {
        self.handle_events_with_mut(EventProcessorFactory::create_mut(handler));
    }

    pub fn handle_events_with_exception_handler<E, X>(&mut self, handler: E, exception_handler: X)
    where
        E: EventHandler<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
    {
        self.handle_events_with(EventProcessorFactory::create_with_exception_handler(
            handler,
            exception_handler,
        ));
    }

    pub fn handle_events_mut_with_exception_handler<E, X>(
        &mut self,
        handler: E,
        exception_handler: X,
    ) where
        E: EventHandlerMut<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
    {
        self.handle_events_with_mut(EventProcessorFactory::create_mut_with_exception_handler(
            handler,
            exception_handler,
        ));
    }

    pub fn handle_events_with<E: EventProcessor<T>>(&mut self, processor: E) {
        self.cursors.push(processor.get_sequence());
        let barrier = self
            .sequencer
            .create_sequence_barrier(&self.gating_sequences);

        let runnable = processor.create(self.data_provider.clone(), barrier);
        self.event_handlers.push(runnable);
    }

    pub fn handle_events_with_mut<E: EventProcessorMut<T>>(&mut self, processor: E) {
        self.cursors.push(processor.get_sequence());
        let barrier = self
            .sequencer
            .create_sequence_barrier(&self.gating_sequences);

        let runnable = processor.create(self.data_provider.clone(), barrier);
        self.event_handlers.push(runnable);
    }

    /// Registers one worker per handler; the workers divide the stream
    /// between them, each event going to exactly one.
    pub fn handle_events_with_workers<E>(&mut self, handlers: Vec<E>) -> WorkerPool<S::Barrier>
    where
        E: EventHandler<T> + Send + 'static,
    {
        let work_sequence: Arc<AtomicSequence> = Default::default();
        let barrier = Arc::new(
            self.sequencer
                .create_sequence_barrier(&self.gating_sequences),
        );

        let mut worker_sequences = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let processor = WorkProcessorFactory::create(handler, work_sequence.clone());
            let sequence = processor.get_sequence();
            worker_sequences.push(sequence.clone());
            self.cursors.push(sequence);
            let runnable = processor.create(self.data_provider.clone(), barrier.clone());
            self.event_handlers.push(runnable);
        }

        WorkerPool::new(
            work_sequence,
            worker_sequences,
            self.sequencer.get_cursor(),
            barrier,
        )
    }

    /// [`handle_events_with_workers`](Self::handle_events_with_workers) for
    /// stateful handlers.
    pub fn handle_events_with_workers_mut<E>(&mut self, handlers: Vec<E>) -> WorkerPool<S::Barrier>
    where
        E: EventHandlerMut<T> + Send + 'static,
    {
        let work_sequence: Arc<AtomicSequence> = Default::default();
        let barrier = Arc::new(
            self.sequencer
                .create_sequence_barrier(&self.gating_sequences),
        );

        let mut worker_sequences = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let processor = WorkProcessorFactory::create_mut(handler, work_sequence.clone());
            let sequence = processor.get_sequence();
            worker_sequences.push(sequence.clone());
            self.cursors.push(sequence);
            let runnable = processor.create(self.data_provider.clone(), barrier.clone());
            self.event_handlers.push(runnable);
        }

        WorkerPool::new(
            work_sequence,
            worker_sequences,
            self.sequencer.get_cursor(),
            barrier,
        )
    }
}

impl<S, W, D, T> WithEventHandlers<S, W, D, T>
where
    S: Sequencer + 'static,
    W: WaitingStrategy,
    D: DataProvider<T> + 'static,
    T: Send + Sync + 'static,
{
    /// Opens a stage downstream of everything registered so far: its
    /// handlers wait for all handlers of the previous stage.
    pub fn with_barrier(
        mut self,
        f: impl FnOnce(&mut BarrierScope<S, D, T>),
    ) -> WithEventHandlers<S, W, D, T> {
        let mut scope = BarrierScope {
            gating_sequences: self.gating_sequences.clone(),
            cursors: Vec::new(),
            sequencer: self.with_sequencer.sequencer,
            data_provider: self
                .with_sequencer
                .with_waiting_strategy
                .with_data_provider
                .data_provider
                .clone(),
            event_handlers: Vec::new(),
            _element: Default::default(),
        };

        f(&mut scope);
        self.with_sequencer.sequencer = scope.sequencer;
        self.event_handlers.append(&mut scope.event_handlers);
        self.gating_sequences = scope.cursors;

        self
    }

    pub fn build(self) -> (impl EventProcessorExecutor, impl EventProducer<Item = T>) {
        self.build_with_executor::<ThreadedExecutor>()
    }

    pub fn build_with_executor<E: EventProcessorExecutor>(
        mut self,
    ) -> (E, impl EventProducer<Item = T>) {
        // The terminal stage gates the producer; everything upstream is
        // already covered transitively.
        for gating_sequence in &self.gating_sequences {
            self.with_sequencer
                .sequencer
                .add_gating_sequence(gating_sequence);
        }
        let executor = E::with_runnables(self.event_handlers);
        let producer = Producer::new(
            self.with_sequencer
                .with_waiting_strategy
                .with_data_provider
                .data_provider
                .clone(),
            self.with_sequencer.sequencer,
        );
        (executor, producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Sequence;
    use crate::traits::ExecutorHandle;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct SummingHandler {
        sum: Arc<AtomicI64>,
    }

    impl EventHandler<i64> for SummingHandler {
        fn on_event(&self, event: &i64, _sequence: Sequence, _end_of_batch: bool) {
            self.sum.fetch_add(*event, Ordering::SeqCst);
        }
    }

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl EventHandler<i64> for CountingHandler {
        fn on_event(&self, _event: &i64, _sequence: Sequence, _end_of_batch: bool) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RelayHandler {
        upstream: Vec<Arc<AtomicI64>>,
        own: Arc<AtomicI64>,
        violated: Arc<AtomicBool>,
    }

    impl EventHandler<i64> for RelayHandler {
        fn on_event(&self, _event: &i64, sequence: Sequence, _end_of_batch: bool) {
            for upstream in &self.upstream {
                if upstream.load(Ordering::SeqCst) < sequence {
                    self.violated.store(true, Ordering::SeqCst);
                }
            }
            self.own.store(sequence, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_small_buffer_backpressure_loses_nothing() {
        let sum = Arc::new(AtomicI64::new(0));
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(8)
            .with_busy_spin_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(SummingHandler { sum: sum.clone() });
            })
            .build();

        let handle = executor.spawn();
        // 100 events through 8 slots: the producer has to stall on the
        // consumer repeatedly, and the sum proves nothing was overwritten.
        for value in 0..100_i64 {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain();
        handle.join();

        assert_eq!(sum.load(Ordering::SeqCst), 4950);
    }

    #[test]
    fn test_blocking_strategy_completes_under_backpressure() {
        let sum = Arc::new(AtomicI64::new(0));
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(8)
            .with_blocking_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(SummingHandler { sum: sum.clone() });
            })
            .build();

        let handle = executor.spawn();
        for value in 0..100_i64 {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain();
        handle.join();

        assert_eq!(sum.load(Ordering::SeqCst), 4950);
    }

    #[test]
    fn test_two_producers_publish_everything() {
        const PRODUCERS: usize = 2;
        const WRITES_PER_PRODUCER: usize = 50_000;

        let count = Arc::new(AtomicUsize::new(0));
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(1024)
            .with_yielding_waiting_strategy()
            .with_multi_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(CountingHandler {
                    count: count.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        let producer = Arc::new(producer);
        let mut writers = Vec::new();
        for _ in 0..PRODUCERS {
            let producer = producer.clone();
            writers.push(thread::spawn(move || {
                for value in 0..WRITES_PER_PRODUCER {
                    producer
                        .write(
                            std::iter::once(value as i64),
                            |event, _sequence, &value| {
                                *event = value;
                            },
                        )
                        .unwrap();
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }
        match Arc::try_unwrap(producer) {
            Ok(producer) => producer.drain(),
            Err(_) => panic!("producer still shared"),
        }
        handle.join();

        assert_eq!(count.load(Ordering::SeqCst), PRODUCERS * WRITES_PER_PRODUCER);
    }

    #[test]
    fn test_wide_events_are_never_observed_half_written() {
        const PRODUCERS: usize = 2;
        const WRITES_PER_PRODUCER: u64 = 20_000;

        #[derive(Default)]
        struct WideEvent {
            lo: u64,
            hi: u64,
        }

        struct MatchingWordsHandler {
            torn: Arc<AtomicBool>,
            count: Arc<AtomicUsize>,
        }

        impl EventHandler<WideEvent> for MatchingWordsHandler {
            fn on_event(&self, event: &WideEvent, _sequence: Sequence, _end_of_batch: bool) {
                if event.lo != event.hi {
                    self.torn.store(true, Ordering::SeqCst);
                }
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }

        let torn = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        // The payload spans two words and the translator keeps them equal,
        // so a slot read mid-write or recycled mid-read shows up as a
        // mismatch. The small ring keeps every slot under constant reuse.
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<WideEvent>(64)
            .with_yielding_waiting_strategy()
            .with_multi_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(MatchingWordsHandler {
                    torn: torn.clone(),
                    count: count.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        let producer = Arc::new(producer);
        let mut writers = Vec::new();
        for producer_id in 0..PRODUCERS {
            let producer = producer.clone();
            writers.push(thread::spawn(move || {
                // Values start at 1 and never repeat, so a word from a
                // default-constructed slot or an earlier lap cannot pose as
                // the current event.
                let base = producer_id as u64 * WRITES_PER_PRODUCER;
                for offset in 1..=WRITES_PER_PRODUCER {
                    producer
                        .write(
                            std::iter::once(base + offset),
                            |event, _sequence, &value| {
                                event.lo = value;
                                event.hi = value;
                            },
                        )
                        .unwrap();
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }
        match Arc::try_unwrap(producer) {
            Ok(producer) => producer.drain(),
            Err(_) => panic!("producer still shared"),
        }
        handle.join();

        assert_eq!(
            count.load(Ordering::SeqCst),
            PRODUCERS * WRITES_PER_PRODUCER as usize
        );
        assert!(!torn.load(Ordering::SeqCst));
    }

    #[test]
    fn test_broadcast_delivers_every_event_to_every_handler() {
        const HANDLERS: usize = 3;
        const EVENTS: usize = 50;

        let counts: Vec<Arc<AtomicUsize>> = (0..HANDLERS)
            .map(|_| Arc::new(AtomicUsize::new(0)))
            .collect();

        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(64)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                for count in &counts {
                    scope.handle_events(CountingHandler {
                        count: count.clone(),
                    });
                }
            })
            .build();

        let handle = executor.spawn();
        for value in 0..EVENTS {
            producer
                .write(std::iter::once(value as i64), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain();
        handle.join();

        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), EVENTS);
        }
    }

    #[test]
    fn test_three_stage_pipeline_preserves_order() {
        const EVENTS: i64 = 200;

        let stage_positions: Vec<Arc<AtomicI64>> =
            (0..3).map(|_| Arc::new(AtomicI64::new(-1))).collect();
        let violated = Arc::new(AtomicBool::new(false));

        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(16)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(RelayHandler {
                    upstream: Vec::new(),
                    own: stage_positions[0].clone(),
                    violated: violated.clone(),
                });
            })
            .with_barrier(|scope| {
                scope.handle_events(RelayHandler {
                    upstream: vec![stage_positions[0].clone()],
                    own: stage_positions[1].clone(),
                    violated: violated.clone(),
                });
            })
            .with_barrier(|scope| {
                scope.handle_events(RelayHandler {
                    upstream: vec![stage_positions[1].clone()],
                    own: stage_positions[2].clone(),
                    violated: violated.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        for value in 0..EVENTS {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain();
        handle.join();

        assert!(!violated.load(Ordering::SeqCst));
        assert_eq!(stage_positions[2].load(Ordering::SeqCst), EVENTS - 1);
    }

    #[test]
    fn test_second_stage_waits_for_both_parallel_handlers() {
        const EVENTS: i64 = 64;

        let first = Arc::new(AtomicI64::new(-1));
        let second = Arc::new(AtomicI64::new(-1));
        let terminal = Arc::new(AtomicI64::new(-1));
        let violated = Arc::new(AtomicBool::new(false));

        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(16)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(RelayHandler {
                    upstream: Vec::new(),
                    own: first.clone(),
                    violated: violated.clone(),
                });
                scope.handle_events(RelayHandler {
                    upstream: Vec::new(),
                    own: second.clone(),
                    violated: violated.clone(),
                });
            })
            .with_barrier(|scope| {
                scope.handle_events(RelayHandler {
                    upstream: vec![first.clone(), second.clone()],
                    own: terminal.clone(),
                    violated: violated.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        for value in 0..EVENTS {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain();
        handle.join();

        assert!(!violated.load(Ordering::SeqCst));
        assert_eq!(terminal.load(Ordering::SeqCst), EVENTS - 1);
    }

    #[test]
    fn test_worker_pool_through_builder_is_exactly_once() {
        const WORKERS: usize = 3;
        const EVENTS: i64 = 64;

        let count = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicI64::new(0));

        struct Worker {
            count: Arc<AtomicUsize>,
            sum: Arc<AtomicI64>,
        }

        impl EventHandler<i64> for Worker {
            fn on_event(&self, event: &i64, _sequence: Sequence, _end_of_batch: bool) {
                self.count.fetch_add(1, Ordering::SeqCst);
                self.sum.fetch_add(*event, Ordering::SeqCst);
            }
        }

        let mut pool = None;
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(128)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                let handlers = (0..WORKERS)
                    .map(|_| Worker {
                        count: count.clone(),
                        sum: sum.clone(),
                    })
                    .collect();
                pool = Some(scope.handle_events_with_workers(handlers));
            })
            .build();

        let handle = executor.spawn();
        for value in 0..EVENTS {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        pool.unwrap().drain_and_halt();
        producer.drain();
        handle.join();

        assert_eq!(count.load(Ordering::SeqCst), EVENTS as usize);
        assert_eq!(sum.load(Ordering::SeqCst), (0..EVENTS).sum::<i64>());
    }

    struct Accumulator {
        sum: i64,
        total: Arc<AtomicI64>,
    }

    impl EventHandlerMut<i64> for Accumulator {
        fn on_event(&mut self, event: &i64, _sequence: Sequence, _end_of_batch: bool) {
            self.sum += *event;
        }

        fn on_shutdown(&mut self) {
            self.total.store(self.sum, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_mut_handler_through_builder() {
        let total = Arc::new(AtomicI64::new(0));
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(32)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events_mut(Accumulator {
                    sum: 0,
                    total: total.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        producer
            .write((0..100).map(i64::from), |event, _sequence, &value| {
                *event = value;
            })
            .unwrap_err();
        producer
            .write((0..32).map(i64::from), |event, _sequence, &value| {
                *event = value;
            })
            .unwrap();
        producer.drain();
        handle.join();

        assert_eq!(total.load(Ordering::SeqCst), (0..32).sum::<i64>());
    }

    #[test]
    fn test_drain_timeout_succeeds_on_live_pipeline() {
        let count = Arc::new(AtomicUsize::new(0));
        let (executor, producer) = DisruptorBuilder::with_ring_buffer::<i64>(16)
            .with_yielding_waiting_strategy()
            .with_single_producer_sequencer()
            .with_barrier(|scope| {
                scope.handle_events(CountingHandler {
                    count: count.clone(),
                });
            })
            .build();

        let handle = executor.spawn();
        for value in 0..10_i64 {
            producer
                .write(std::iter::once(value), |event, _sequence, &value| {
                    *event = value;
                })
                .unwrap();
        }
        producer.drain_timeout(Duration::from_secs(5)).unwrap();
        handle.join();

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
