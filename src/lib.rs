//! Lock-free inter-thread messaging over a pre-allocated ring buffer.
//!
//! Producers claim slots from a sequencer, write events in place, and
//! publish them; consumers wait on sequence barriers and read the slots
//! without locks or further allocation. Pipelines of dependent consumers,
//! broadcast fan-out, and worker pools that divide the stream are all
//! assembled through [`DisruptorBuilder`].

pub mod barrier;
pub mod builder;
pub mod errors;
pub mod executor;
pub mod processor;
pub mod producer;
pub mod ringbuffer;
pub mod sequence;
pub mod sequencer;
pub mod traits;
mod utils;
pub mod waiting;
pub mod work;

pub use builder::DisruptorBuilder;
pub use errors::{DisruptorError, Result};
pub use executor::ThreadedExecutor;
pub use processor::{DefaultExceptionHandler, EventProcessorFactory, FatalExceptionHandler};
pub use ringbuffer::RingBuffer;
pub use sequence::{AtomicSequence, Sequence};
pub use traits::{
    DataProvider, EventHandler, EventHandlerMut, EventProcessor, EventProcessorExecutor,
    EventProcessorMut, EventProducer, ExceptionHandler, ExceptionOutcome, ExecutorHandle,
    Runnable, SequenceBarrier, Sequencer, WaitingStrategy,
};
pub use work::{WorkProcessorFactory, WorkerPool};
