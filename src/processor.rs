//! Batch event processors: the consumer loop that drives an [`EventHandler`].
//!
//! A processor waits on its barrier, takes every sequence that has become
//! available as one batch, hands the events to the handler in order, and
//! only then publishes its own sequence, so downstream stages observe
//! whole batches. Handler panics are caught per event and routed to an
//! [`ExceptionHandler`], which decides whether the processor skips the
//! event or halts.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use log::error;

use crate::{
    errors::panic_message,
    sequence::AtomicSequence,
    traits::{
        DataProvider, EventHandler, EventHandlerMut, EventProcessor, EventProcessorMut,
        ExceptionHandler, ExceptionOutcome, Runnable, SequenceBarrier,
    },
};

/// Logs the panic and keeps the processor running. The poisoned event is
/// skipped.
pub struct DefaultExceptionHandler;

impl<T> ExceptionHandler<T> for DefaultExceptionHandler {
    fn handle_event_exception(
        &self,
        payload: &(dyn std::any::Any + Send),
        sequence: crate::sequence::Sequence,
        _event: &T,
    ) -> ExceptionOutcome {
        error!(
            "event handler panicked at sequence {}: {}",
            sequence,
            panic_message(payload)
        );
        ExceptionOutcome::Continue
    }

    fn handle_on_start_exception(&self, payload: &(dyn std::any::Any + Send)) {
        error!("on_start hook panicked: {}", panic_message(payload));
    }

    fn handle_on_shutdown_exception(&self, payload: &(dyn std::any::Any + Send)) {
        error!("on_shutdown hook panicked: {}", panic_message(payload));
    }
}

/// Logs the panic and halts the processor at the failed sequence.
pub struct FatalExceptionHandler;

impl<T> ExceptionHandler<T> for FatalExceptionHandler {
    fn handle_event_exception(
        &self,
        payload: &(dyn std::any::Any + Send),
        sequence: crate::sequence::Sequence,
        _event: &T,
    ) -> ExceptionOutcome {
        error!(
            "event handler panicked at sequence {}, halting processor: {}",
            sequence,
            panic_message(payload)
        );
        ExceptionOutcome::Halt
    }

    fn handle_on_start_exception(&self, payload: &(dyn std::any::Any + Send)) {
        error!("on_start hook panicked: {}", panic_message(payload));
    }

    fn handle_on_shutdown_exception(&self, payload: &(dyn std::any::Any + Send)) {
        error!("on_shutdown hook panicked: {}", panic_message(payload));
    }
}

pub struct EventProcessorFactory;

impl EventProcessorFactory {
    pub fn create<E, T>(handler: E) -> impl EventProcessor<T>
    where
        E: EventHandler<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::create_with_exception_handler(handler, DefaultExceptionHandler)
    }

    pub fn create_with_exception_handler<E, X, T>(
        handler: E,
        exception_handler: X,
    ) -> impl EventProcessor<T>
    where
        E: EventHandler<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
        T: Send + 'static,
    {
        Processor {
            handler,
            exception_handler,
            cursor: Default::default(),
            _marker: Default::default(),
        }
    }

    pub fn create_mut<E, T>(handler: E) -> impl EventProcessorMut<T>
    where
        E: EventHandlerMut<T> + Send + 'static,
        T: Send + 'static,
    {
        Self::create_mut_with_exception_handler(handler, DefaultExceptionHandler)
    }

    pub fn create_mut_with_exception_handler<E, X, T>(
        handler: E,
        exception_handler: X,
    ) -> impl EventProcessorMut<T>
    where
        E: EventHandlerMut<T> + Send + 'static,
        X: ExceptionHandler<T> + 'static,
        T: Send + 'static,
    {
        ProcessorMut {
            handler,
            exception_handler,
            cursor: Default::default(),
            _marker: Default::default(),
        }
    }
}

pub(crate) enum ProcessorState {
    Idle = 0,
    Running = 1,
    Halted = 2,
    Stopped = 3,
}

struct Processor<E, X, T> {
    handler: E,
    exception_handler: X,
    cursor: Arc<AtomicSequence>,
    _marker: std::marker::PhantomData<T>,
}

struct ProcessorMut<E, X, T> {
    handler: E,
    exception_handler: X,
    cursor: Arc<AtomicSequence>,
    _marker: std::marker::PhantomData<T>,
}

struct RunnableProcessor<E, X, T, D: DataProvider<T>, B: SequenceBarrier> {
    state: AtomicU8,
    processor: Processor<E, X, T>,
    data_provider: Arc<D>,
    barrier: B,
}

struct RunnableProcessorMut<E, X, T, D: DataProvider<T>, B: SequenceBarrier> {
    state: AtomicU8,
    processor: ProcessorMut<E, X, T>,
    data_provider: Arc<D>,
    barrier: B,
}

impl<E, X, T, D, B> RunnableProcessor<E, X, T, D, B>
where
    E: EventHandler<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn process_events(&self) {
        let handler = &self.processor.handler;
        let exception_handler = &self.processor.exception_handler;
        let cursor = &self.processor.cursor;
        let data_provider = &self.data_provider;
        let barrier = &self.barrier;

        loop {
            let next_sequence = cursor.get() + 1;
            match barrier.wait_for(next_sequence) {
                Some(available_sequence) => {
                    for sequence in next_sequence..=available_sequence {
                        let event = unsafe { data_provider.get(sequence) };
                        let end_of_batch = sequence == available_sequence;
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                            handler.on_event(event, sequence, end_of_batch)
                        })) {
                            match exception_handler.handle_event_exception(
                                payload.as_ref(),
                                sequence,
                                event,
                            ) {
                                ExceptionOutcome::Continue => {}
                                ExceptionOutcome::Halt => {
                                    cursor.set(sequence);
                                    barrier.signal();
                                    return;
                                }
                            }
                        }
                    }

                    // One store per batch; downstream stages see whole
                    // batches, never a half-consumed one.
                    cursor.set(available_sequence);
                    barrier.signal();
                }
                None => return,
            }
        }
    }
}

impl<E, X, T, D, B> RunnableProcessorMut<E, X, T, D, B>
where
    E: EventHandlerMut<T> + Send,
    X: ExceptionHandler<T>,
    D: DataProvider<T>,
    B: SequenceBarrier,
    T: Send,
{
    fn process_events(&mut self) {
        let data_provider = self.data_provider.clone();
        let cursor = self.processor.cursor.clone();
        let handler = &mut self.processor.handler;
        let exception_handler = &self.processor.exception_handler;
        let barrier = &self.barrier;

        loop {
            let next_sequence = cursor.get() + 1;
            match barrier.wait_for(next_sequence) {
                Some(available_sequence) => {
                    for sequence in next_sequence..=available_sequence {
                        let event = unsafe { data_provider.get(sequence) };
                        let end_of_batch = sequence == available_sequence;
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                            handler.on_event(event, sequence, end_of_batch)
                        })) {
                            match exception_handler.handle_event_exception(
                                payload.as_ref(),
                                sequence,
                                event,
                            ) {
                                ExceptionOutcome::Continue => {}
                                ExceptionOutcome::Halt => {
                                    cursor.set(sequence);
                                    barrier.signal();
                                    return;
                                }
                            }
                        }
                    }

                    cursor.set(available_sequence);
                    barrier.signal();
                }
                None => return,
            }
        }
    }
}

impl<E, X, T> EventProcessor<T> for Processor<E, X, T>
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
        Box::new(RunnableProcessor {
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

impl<E, X, T> EventProcessorMut<T> for ProcessorMut<E, X, T>
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
        Box::new(RunnableProcessorMut {
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

impl<E, X, T, D, B> Runnable for RunnableProcessor<E, X, T, D, B>
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

        self.process_events();

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

impl<E, X, T, D, B> Runnable for RunnableProcessorMut<E, X, T, D, B>
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

        self.process_events();

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
