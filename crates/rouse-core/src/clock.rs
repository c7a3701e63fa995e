//! Wall clock and deferred tasks
//!
//! Everything time-dependent in the engine goes through these two traits so
//! the arbiter can be driven deterministically in tests.

use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

/// Source of the current local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A task run once after a delay
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
///
/// Tasks may run on any thread and must not assume they run before or after
/// other work scheduled at the same time.
pub trait TimerQueue: Send + Sync {
    fn schedule(&self, delay: Duration, task: DeferredTask);
}

/// One sleeping thread per deferred task
///
/// The engine only ever has a handful of timers outstanding (an early-wait
/// deferral and a guard release), so a thread each is fine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimers;

impl TimerQueue for ThreadTimers {
    fn schedule(&self, delay: Duration, task: DeferredTask) {
        let spawned = thread::Builder::new()
            .name("rouse-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                task();
            });

        if let Err(e) = spawned {
            log::error!("[Timers] Failed to spawn timer thread ({:?} delay): {}", delay, e);
        }
    }
}

/// Convert a signed chrono delta into a std duration, clamping negatives to zero
pub(crate) fn non_negative(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_thread_timers_run_task_after_delay() {
        let (tx, rx) = channel::bounded(1);
        ThreadTimers.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(42);
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_non_negative_clamps() {
        assert_eq!(non_negative(chrono::Duration::seconds(-5)), Duration::ZERO);
        assert_eq!(non_negative(chrono::Duration::milliseconds(1500)), Duration::from_millis(1500));
    }
}
