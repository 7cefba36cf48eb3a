//! Worker-pool processors: exactly-once consumption across N threads.
//!
//! Where a plain event processor gives every handler the whole stream, a
//! worker pool divides the stream: workers race on a shared `work_sequence`
//! counter and each published event is claimed by exactly one of them. A
//! worker advertises its progress through its own sequence, set to one
//! below its claim before the claim is attempted, so producer gating only
//! ever sees fully processed events.
//!
//! All workers of a pool share one barrier. Halting the pool alerts that
//! barrier once and every worker finishes its in-flight event, then exits;
//! [`WorkerPool::drain_and_halt`] first waits for the claim counter to
//! catch up with the cursor so nothing published is left behind.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{atomic::AtomicU8, Arc};

use crate::{
    processor::{DefaultExceptionHandler, ProcessorState},
    sequence::{AtomicSequence, Sequence},
    traits::{
        DataProvider, EventHandler, EventHandlerMut, EventProcessor, EventProcessorMut,
        ExceptionHandler, ExceptionOutcome, Runnable, SequenceBarrier,
    },
};

use std::sync::atomic::Ordering;

/// Factory for creating work processors (exactly-once) from handlers.
pub struct WorkProcessorFactory;

impl WorkProcessorFactory {
    pub fn create<E, T>(
        handler: E,
        work_sequence: Arc<AtomicSequence>,
    ) -> WorkEventProcessor<E, DefaultExceptionHandler, T>
    where
        E: EventHandler<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::create_with_exception_handler(handler, DefaultExceptionHandler, work_sequence)
    }

    pub fn create_with_exception_handler<E, X, T>(
        handler: E,
        exception_handler: X,
        work_sequence: Arc<AtomicSequence>,
    ) -> WorkEventProcessor<E, X, T>
    where
        E: EventHandler<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
        T: Send + 'static,
    {
        WorkEventProcessor {
            handler,
            exception_handler,
            cursor: Default::default(),
            work_sequence,
            _marker: Default::default(),
        }
    }

    pub fn create_mut<E, T>(
        handler: E,
        work_sequence: Arc<AtomicSequence>,
    ) -> WorkEventProcessorMut<E, DefaultExceptionHandler, T>
    where
        E: EventHandlerMut<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::create_mut_with_exception_handler(handler, DefaultExceptionHandler, work_sequence)
    }

    pub fn create_mut_with_exception_handler<E, X, T>(
        handler: E,
        exception_handler: X,
        work_sequence: Arc<AtomicSequence>,
    ) -> WorkEventProcessorMut<E, X, T>
    where
        E: EventHandlerMut<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
        T: Send + 'static,
    {
        WorkEventProcessorMut {
            handler,
            exception_handler,
            cursor: Default::default(),
            work_sequence,
            _marker: Default::default(),
        }
    }
}

/// EventProcessor that claims work from a shared `work_sequence`.
pub struct WorkEventProcessor<E, X, T> {
    handler: E,
    exception_handler: X,
    cursor: Arc<AtomicSequence>,
    work_sequence: Arc<AtomicSequence>,
    _marker: std::marker::PhantomData<T>,
}

/// EventProcessorMut that claims work from a shared `work_sequence`.
pub struct WorkEventProcessorMut<E, X, T> {
    handler: E,
    exception_handler: X,
    cursor: Arc<AtomicSequence>,
    work_sequence: Arc<AtomicSequence>,
    _marker: std::marker::PhantomData<T>,
}

struct WorkRunnable<E, X, T, D: DataProvider<T>, B: SequenceBarrier> {
    state: AtomicU8,
    processor: WorkEventProcessor<E, X, T>,
    data_provider: Arc<D>,
    barrier: B,
}

struct WorkRunnableMut<E, X, T, D: DataProvider<T>, B: SequenceBarrier> {
    state: AtomicU8,
    processor: WorkEventProcessorMut<E, X, T>,
    data_provider: Arc<D>,
    barrier: B,
}

impl<E, X, T> EventProcessor<T> for WorkEventProcessor<E, X, T>
where
    E: EventHandler<T> + Send + 'static,
    X: ExceptionHandler<T> + 'static,
    T: Send + 'static,
{
    fn create<D, B>(self, data_provider: Arc<D>, barrier: B) -> Box<dyn Runnable>
    where
        D: DataProvider<T> + 'static,
        B: SequenceBarrier + 'static,
    {
        Box::new(WorkRunnable {
            state: AtomicU8::new(ProcessorState::Idle as u8),
            processor: self,
            data_provider,
            barrier,
        })
    }

    fn get_sequence(&self) -> Arc<AtomicSequence> {
        self.cursor.clone()
    }
}

impl<E, X, T> EventProcessorMut<T> for WorkEventProcessorMut<E, X, T>
where
    E: EventHandlerMut<T> + Send + 'static,
    X: ExceptionHandler<T> + 'static,
    T: Send + 'static,
{
    fn create<D, B>(self, data_provider: Arc<D>, barrier: B) -> Box<dyn Runnable>
    where
        D: DataProvider<T> + 'static,
        B: SequenceBarrier + 'static,
    {
        Box::new(WorkRunnableMut {
            state: AtomicU8::new(ProcessorState::Idle as u8),
            processor: self,
            data_provider,
            barrier,
        })
    }

    fn get_sequence(&self) -> Arc<AtomicSequence> {
        self.cursor.clone()
    }
}

impl<E, X, T, D, B> WorkRunnable<E, X, T, D, B>
where
    E: EventHandler<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn process_loop(&self) {
        let handler = &self.processor.handler;
        let exception_handler = &self.processor.exception_handler;
        let own_sequence = &self.processor.cursor;
        let work_sequence = &self.processor.work_sequence;
        let data_provider = &self.data_provider;
        let barrier = &self.barrier;

        let mut processed = true;
        let mut cached_available: Sequence = i64::MIN;
        let mut next_sequence: Sequence = 0;

        loop {
            if processed {
                processed = false;
                loop {
                    next_sequence = work_sequence.get() + 1;
                    // Advertise the claim before racing for it, so gating
                    // never counts an unprocessed event as consumed.
                    own_sequence.set(next_sequence - 1);
                    if work_sequence.compare_and_set(next_sequence - 1, next_sequence) {
                        break;
                    }
                }
            }

            if cached_available >= next_sequence {
                let event = unsafe { data_provider.get(next_sequence) };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                    handler.on_event(event, next_sequence, true)
                })) {
                    match exception_handler.handle_event_exception(
                        payload.as_ref(),
                        next_sequence,
                        event,
                    ) {
                        ExceptionOutcome::Continue => {}
                        ExceptionOutcome::Halt => {
                            own_sequence.set(next_sequence);
                            barrier.signal();
                            return;
                        }
                    }
                }
                processed = true;
            } else {
                match barrier.wait_for(next_sequence) {
                    Some(available) => cached_available = available,
                    None => return,
                }
            }
        }
    }
}

impl<E, X, T, D, B> Runnable for WorkRunnable<E, X, T, D, B>
where
    E: EventHandler<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn run(&mut self) {
        self.state
            .store(ProcessorState::Running as u8, Ordering::Release);

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.processor.handler.on_start()))
        {
            self.processor
                .exception_handler
                .handle_on_start_exception(payload.as_ref());
        }

        self.process_loop();

        if let Err(payload) =
            catch_unwind(AssertUnwindSafe(|| self.processor.handler.on_shutdown()))
        {
            self.processor
                .exception_handler
                .handle_on_shutdown_exception(payload.as_ref());
        }

        self.state
            .store(ProcessorState::Stopped as u8, Ordering::Release);
    }

    fn stop(&mut self) {
        self.state
            .store(ProcessorState::Halted as u8, Ordering::Release);
        self.barrier.alert();
    }

    fn is_running(&self) -> bool {
        let state = self.state.load(Ordering::Acquire);
        state == ProcessorState::Running as u8 || state == ProcessorState::Halted as u8
    }
}

impl<E, X, T, D, B> WorkRunnableMut<E, X, T, D, B>
where
    E: EventHandlerMut<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn process_loop(&mut self) {
        let data_provider = self.data_provider.clone();
        let own_sequence = self.processor.cursor.clone();
        let work_sequence = self.processor.work_sequence.clone();
        let handler = &mut self.processor.handler;
        let exception_handler = &self.processor.exception_handler;
        let barrier = &self.barrier;

        let mut processed = true;
        let mut cached_available: Sequence = i64::MIN;
        let mut next_sequence: Sequence = 0;

        loop {
            if processed {
                processed = false;
                loop {
                    next_sequence = work_sequence.get() + 1;
                    own_sequence.set(next_sequence - 1);
                    if work_sequence.compare_and_set(next_sequence - 1, next_sequence) {
                        break;
                    }
                }
            }

            if cached_available >= next_sequence {
                let event = unsafe { data_provider.get(next_sequence) };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                    handler.on_event(event, next_sequence, true)
                })) {
                    match exception_handler.handle_event_exception(
                        payload.as_ref(),
                        next_sequence,
                        event,
                    ) {
                        ExceptionOutcome::Continue => {}
                        ExceptionOutcome::Halt => {
                            own_sequence.set(next_sequence);
                            barrier.signal();
                            return;
                        }
                    }
                }
                processed = true;
            } else {
                match barrier.wait_for(next_sequence) {
                    Some(available) => cached_available = available,
                    None => return,
                }
            }
        }
    }
}

impl<E, X, T, D, B> Runnable for WorkRunnableMut<E, X, T, D, B>
where
    E: EventHandlerMut<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn run(&mut self) {
        self.state
            .store(ProcessorState::Running as u8, Ordering::Release);

        let handler = &mut self.processor.handler;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler.on_start())) {
            self.processor
                .exception_handler
                .handle_on_start_exception(payload.as_ref());
        }

        self.process_loop();

        let handler = &mut self.processor.handler;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler.on_shutdown())) {
            self.processor
                .exception_handler
                .handle_on_shutdown_exception(payload.as_ref());
        }

        self.state
            .store(ProcessorState::Stopped as u8, Ordering::Release);
    }

    fn stop(&mut self) {
        self.state
            .store(ProcessorState::Halted as u8, Ordering::Release);
        self.barrier.alert();
    }

    fn is_running(&self) -> bool {
        let state = self.state.load(Ordering::Acquire);
        state == ProcessorState::Running as u8 || state == ProcessorState::Halted as u8
    }
}

/// Handle over a group of workers sharing one claim counter and barrier.
///
/// Returned from the builder when a worker stage is wired. Dropping the
/// handle leaves the workers running; halting goes through
/// [`drain_and_halt`](WorkerPool::drain_and_halt) or
/// [`halt`](WorkerPool::halt).
pub struct WorkerPool<B: SequenceBarrier> {
    work_sequence: Arc<AtomicSequence>,
    worker_sequences: Vec<Arc<AtomicSequence>>,
    cursor: Arc<AtomicSequence>,
    barrier: Arc<B>,
}

impl<B: SequenceBarrier> WorkerPool<B> {
    pub(crate) fn new(
        work_sequence: Arc<AtomicSequence>,
        worker_sequences: Vec<Arc<AtomicSequence>>,
        cursor: Arc<AtomicSequence>,
        barrier: Arc<B>,
    ) -> Self {
        Self {
            work_sequence,
            worker_sequences,
            cursor,
            barrier,
        }
    }

    /// The per-worker progress sequences, suitable as gating sequences.
    pub fn worker_sequences(&self) -> &[Arc<AtomicSequence>] {
        &self.worker_sequences
    }

    /// Waits until every published event has been claimed, then halts the
    /// workers. In-flight events finish processing before the workers exit.
    pub fn drain_and_halt(self) {
        while self.work_sequence.get() < self.cursor.get() {
            self.barrier.signal();
            std::thread::yield_now();
        }
        self.barrier.alert();
    }

    /// Halts the workers without waiting for outstanding events.
    pub fn halt(self) {
        self.barrier.alert();
    }
}
