//! The schedule-changed condition variable shared by the store and the
//! scheduler loop.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// A generation-counter condition variable: every mutation that should wake
/// the scheduler loop bumps the generation, so a waiter that checks the
/// generation before sleeping never misses a signal raised concurrently.
#[derive(Debug, Default)]
pub struct ScheduleSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

/// A shared handle to a [`ScheduleSignal`].
pub type SharedSignal = Arc<ScheduleSignal>;

impl ScheduleSignal {
    /// A fresh signal at generation zero.
    pub fn new() -> SharedSignal {
        Arc::new(Self::default())
    }

    /// Bumps the generation and wakes every waiter.
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// The current generation, to be passed back into [`Self::wait_for_change`].
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Blocks until the generation advances past `since` or `timeout`
    /// elapses. Returns `true` if woken by a signal, `false` on timeout.
    pub fn wait_for_change(&self, since: u64, timeout: Duration) -> bool {
        let mut generation = self.generation.lock();
        if *generation != since {
            return true;
        }
        let result = self.condvar.wait_for(&mut generation, timeout);
        !result.timed_out() || *generation != since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_immediately_if_already_changed() {
        let signal = ScheduleSignal::new();
        let gen = signal.generation();
        signal.notify();
        assert!(signal.wait_for_change(gen, Duration::from_millis(1)));
    }

    #[test]
    fn wait_times_out_without_a_signal() {
        let signal = ScheduleSignal::new();
        let gen = signal.generation();
        assert!(!signal.wait_for_change(gen, Duration::from_millis(10)));
    }

    #[test]
    fn notify_wakes_a_blocked_waiter() {
        let signal = ScheduleSignal::new();
        let gen = signal.generation();
        let waiter_signal = Arc::clone(&signal);
        let handle = thread::spawn(move || waiter_signal.wait_for_change(gen, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert!(handle.join().unwrap());
    }
}
