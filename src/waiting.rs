//! Wait strategies: how a thread stalls until a sequence becomes available.
//!
//! Consumers wait for the cursor (or upstream stages) to reach the sequence
//! they need next; producers wait for gating sequences to free capacity. In
//! both cases the *policy* of waiting is this module's concern, and it is a
//! latency/CPU trade selected once per ring at construction:
//!
//! - [`BusySpinWaitStrategy`]: spin-hint loop. Lowest latency, burns a core.
//! - [`YieldingWaitStrategy`]: bounded spin, then yields its timeslice on
//!   every further retry. The usual default for dedicated pipelines.
//! - [`SleepingWaitStrategy`]: spin, then yield, then short parked sleeps.
//!   Cheap on CPU, latency in the tens of microseconds.
//! - [`BlockingWaitStrategy`]: mutex and condvar. Waiters consume no CPU and
//!   publishers pay a small signalling cost; highest latency.
//! - [`PhasedBackoffWaitStrategy`]: spin for a configured window, yield for
//!   another, then fall back to sleeping. A compromise when load is bursty.
//!
//! Every strategy checks availability before the alert flag, so a consumer
//! being halted still receives work that was already published, and all of
//! them return promptly (`None`) once alerted with nothing left to take.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{
    sequence::{AtomicSequence, Sequence},
    traits::WaitingStrategy,
    utils::Utils,
};

#[derive(Default)]
pub struct BusySpinWaitStrategy;

impl WaitingStrategy for BusySpinWaitStrategy {
    fn new() -> Self {
        BusySpinWaitStrategy {}
    }

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64> {
        loop {
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);

            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }

            if check_alert() {
                return None;
            }

            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {}
}

#[derive(Default)]
pub struct YieldingWaitStrategy;

impl WaitingStrategy for YieldingWaitStrategy {
    fn new() -> Self {
        YieldingWaitStrategy {}
    }

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64> {
        let mut counter: u32 = 100;
        loop {
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);

            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }

            if check_alert() {
                return None;
            }

            if counter > 0 {
                counter -= 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

#[derive(Default)]
pub struct SleepingWaitStrategy;

impl SleepingWaitStrategy {
    const SLEEP: Duration = Duration::from_micros(50);
}

impl WaitingStrategy for SleepingWaitStrategy {
    fn new() -> Self {
        SleepingWaitStrategy {}
    }

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64> {
        let mut counter: u32 = 200;
        loop {
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);

            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }

            if check_alert() {
                return None;
            }

            if counter > 100 {
                counter -= 1;
                std::hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(Self::SLEEP);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Parks waiters on a condvar; publishers wake them via
/// `signal_all_when_blocking`.
#[derive(Default)]
pub struct BlockingWaitStrategy {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitingStrategy for BlockingWaitStrategy {
    fn new() -> Self {
        Default::default()
    }

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64> {
        loop {
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);
            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }
            if check_alert() {
                return None;
            }

            let mut guard = self.lock.lock();
            // Re-check while holding the lock: a signal raised between the
            // checks above and parking would otherwise be lost, since
            // signalling also takes the lock.
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);
            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }
            if check_alert() {
                return None;
            }
            self.condvar.wait(&mut guard);
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

/// Spins, then yields, then sleeps, with the first two phases bounded by
/// wall-clock windows instead of iteration counts.
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_timeout: Duration,
}

impl PhasedBackoffWaitStrategy {
    const SLEEP: Duration = Duration::from_millis(1);

    pub fn with_timeouts(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self {
            spin_timeout,
            yield_timeout,
        }
    }
}

impl Default for PhasedBackoffWaitStrategy {
    fn default() -> Self {
        Self::with_timeouts(Duration::from_millis(1), Duration::from_millis(1))
    }
}

impl WaitingStrategy for PhasedBackoffWaitStrategy {
    fn new() -> Self {
        Default::default()
    }

    fn wait_for<F: Fn() -> bool>(
        &self,
        sequence: Sequence,
        dependencies: &[Arc<AtomicSequence>],
        check_alert: F,
    ) -> Option<i64> {
        let started = Instant::now();
        loop {
            let minimum_sequence = Utils::get_minimum_sequence(dependencies);

            if minimum_sequence >= sequence {
                return Some(minimum_sequence);
            }

            if check_alert() {
                return None;
            }

            let elapsed = started.elapsed();
            if elapsed < self.spin_timeout {
                std::hint::spin_loop();
            } else if elapsed < self.spin_timeout + self.yield_timeout {
                std::thread::yield_now();
            } else {
                std::thread::sleep(Self::SLEEP);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn never() -> bool {
        false
    }

    #[test]
    fn test_busy_spin_wait_strategy() {
        let strategy = BusySpinWaitStrategy::new();
        let seq = Arc::new(AtomicSequence::default());
        let dependencies = vec![seq.clone()];

        assert_eq!(strategy.wait_for(1, &dependencies, || true), None);

        seq.set(5);
        assert_eq!(strategy.wait_for(5, &dependencies, never), Some(5));

        let seq_clone = seq.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            seq_clone.set(10);
        });
        assert_eq!(strategy.wait_for(10, &dependencies, never), Some(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_yielding_wait_strategy() {
        let strategy = YieldingWaitStrategy::new();
        let seq = Arc::new(AtomicSequence::default());
        let dependencies = vec![seq.clone()];

        assert_eq!(strategy.wait_for(1, &dependencies, || true), None);

        let seq_clone = seq.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            seq_clone.set(3);
        });
        assert_eq!(strategy.wait_for(3, &dependencies, never), Some(3));
        handle.join().unwrap();
    }

    #[test]
    fn test_sleeping_wait_strategy() {
        let strategy = SleepingWaitStrategy::new();
        let seq = Arc::new(AtomicSequence::default());
        let dependencies = vec![seq.clone()];

        assert_eq!(strategy.wait_for(1, &dependencies, || true), None);

        seq.set(5);
        assert_eq!(strategy.wait_for(5, &dependencies, never), Some(5));

        let seq_clone = seq.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            seq_clone.set(10);
        });
        assert_eq!(strategy.wait_for(10, &dependencies, never), Some(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_available_work_beats_alert() {
        // A strategy must hand over already-available sequences even when the
        // alert is already raised, so halting consumers drain what exists.
        let strategy = YieldingWaitStrategy::new();
        let seq = Arc::new(AtomicSequence::from(7));
        let dependencies = vec![seq.clone()];

        assert_eq!(strategy.wait_for(5, &dependencies, || true), Some(7));
    }

    #[test]
    fn test_blocking_wait_strategy_wakes_on_signal() {
        let strategy = Arc::new(BlockingWaitStrategy::new());
        let seq = Arc::new(AtomicSequence::default());

        let waiter = {
            let strategy = strategy.clone();
            let dependencies = vec![seq.clone()];
            thread::spawn(move || strategy.wait_for(0, &dependencies, never))
        };

        thread::sleep(Duration::from_millis(20));
        seq.set(0);
        strategy.signal_all_when_blocking();
        assert_eq!(waiter.join().unwrap(), Some(0));
    }

    #[test]
    fn test_blocking_wait_strategy_wakes_on_alert() {
        let strategy = Arc::new(BlockingWaitStrategy::new());
        let seq = Arc::new(AtomicSequence::default());
        let alerted = Arc::new(AtomicBool::new(false));

        let waiter = {
            let strategy = strategy.clone();
            let dependencies = vec![seq.clone()];
            let alerted = alerted.clone();
            thread::spawn(move || {
                strategy.wait_for(0, &dependencies, move || alerted.load(Ordering::Relaxed))
            })
        };

        thread::sleep(Duration::from_millis(20));
        alerted.store(true, Ordering::Relaxed);
        strategy.signal_all_when_blocking();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_phased_backoff_reaches_sleep_phase() {
        let strategy = PhasedBackoffWaitStrategy::with_timeouts(
            Duration::from_micros(50),
            Duration::from_micros(50),
        );
        let seq = Arc::new(AtomicSequence::default());
        let dependencies = vec![seq.clone()];

        let seq_clone = seq.clone();
        let handle = thread::spawn(move || {
            // Long enough that the waiter has fallen through to sleeping.
            thread::sleep(Duration::from_millis(20));
            seq_clone.set(4);
        });
        assert_eq!(strategy.wait_for(4, &dependencies, never), Some(4));
        handle.join().unwrap();
    }

    #[test]
    fn test_multiple_dependencies_gate_on_minimum() {
        let strategy = BusySpinWaitStrategy::new();
        let seq1 = Arc::new(AtomicSequence::default());
        let seq2 = Arc::new(AtomicSequence::default());
        let dependencies = vec![seq1.clone(), seq2.clone()];

        seq1.set(5);
        seq2.set(3);

        assert_eq!(strategy.wait_for(3, &dependencies, never), Some(3));
    }
}
