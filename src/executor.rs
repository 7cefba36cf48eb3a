//! Runs processor run loops on dedicated OS threads.
//!
//! Event processors are latency-sensitive and usually wired once for the
//! lifetime of the application, so the executor model is deliberately
//! plain: one named thread per runnable, joined on shutdown.

use std::thread;

use log::error;

use crate::traits::{EventProcessorExecutor, ExecutorHandle, Runnable};

pub struct ThreadedExecutor {
    runnables: Vec<Box<dyn Runnable>>,
}

pub struct ThreadedExecutorHandle {
    threads: Vec<thread::JoinHandle<()>>,
}

impl EventProcessorExecutor for ThreadedExecutor {
    type Handle = ThreadedExecutorHandle;

    fn with_runnables(runnables: Vec<Box<dyn Runnable>>) -> Self {
        Self { runnables }
    }

    fn spawn(self) -> Self::Handle {
        let mut threads = Vec::with_capacity(self.runnables.len());
        for (index, mut runnable) in self.runnables.into_iter().enumerate() {
            let builder = thread::Builder::new().name(format!("event-processor-{}", index));
            match builder.spawn(move || runnable.run()) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    // Runnables already spawned keep running; their halt
                    // goes through the usual drain path.
                    error!("failed to spawn event-processor-{}: {}", index, e);
                }
            }
        }
        ThreadedExecutorHandle { threads }
    }
}

impl ExecutorHandle for ThreadedExecutorHandle {
    fn join(self) {
        for handle in self.threads {
            let name = handle
                .thread()
                .name()
                .unwrap_or("event-processor")
                .to_owned();
            if handle.join().is_err() {
                error!("{} terminated by panic", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NoopRunnable {
        ran: Arc<AtomicUsize>,
        named_correctly: Arc<AtomicUsize>,
        expected_name: String,
    }

    impl Runnable for NoopRunnable {
        fn run(&mut self) {
            self.ran.fetch_add(1, Ordering::SeqCst);
            if std::thread::current().name() == Some(self.expected_name.as_str()) {
                self.named_correctly.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn stop(&mut self) {}

        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_spawns_one_named_thread_per_runnable() {
        let ran = Arc::new(AtomicUsize::new(0));
        let named_correctly = Arc::new(AtomicUsize::new(0));

        let runnables: Vec<Box<dyn Runnable>> = (0..3)
            .map(|i| {
                Box::new(NoopRunnable {
                    ran: ran.clone(),
                    named_correctly: named_correctly.clone(),
                    expected_name: format!("event-processor-{}", i),
                }) as Box<dyn Runnable>
            })
            .collect();

        let executor = ThreadedExecutor::with_runnables(runnables);
        executor.spawn().join();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(named_correctly.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_join_survives_panicking_runnable() {
        struct PanickingRunnable;

        impl Runnable for PanickingRunnable {
            fn run(&mut self) {
                panic!("processor died");
            }

            fn stop(&mut self) {}

            fn is_running(&self) -> bool {
                false
            }
        }

        let executor = ThreadedExecutor::with_runnables(vec![Box::new(PanickingRunnable)]);
        // Must not propagate the panic to the joining thread.
        executor.spawn().join();
    }
}
