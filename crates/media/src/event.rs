//! Manual-reset event used as the stop signal for threaded loops.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock;

#[derive(Default)]
pub struct ManualEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl ManualEvent {
    pub fn new() -> ManualEvent {
        ManualEvent::default()
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    /// Non-blocking check.
    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }

    /// Wait up to `timeout`; returns true when the event fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        if *signalled {
            return true;
        }
        let _ = self.cond.wait_for(&mut signalled, timeout);
        *signalled
    }

    /// Sleep until `deadline_ns` on the shared clock unless signalled first;
    /// returns true when the event fired. This is the precise timed wait the
    /// paced loops are built on.
    pub fn wait_deadline(&self, deadline_ns: u64) -> bool {
        let mut signalled = self.signalled.lock();
        loop {
            if *signalled {
                return true;
            }
            let now = clock::now_ns();
            if now >= deadline_ns {
                return false;
            }
            let _ = self
                .cond
                .wait_for(&mut signalled, Duration::from_nanos(deadline_ns - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_wakes_waiter() {
        let event = Arc::new(ManualEvent::new());
        let waiter = event.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        event.signal();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn deadline_elapses_without_signal() {
        let event = ManualEvent::new();
        let deadline = clock::now_ns() + 5_000_000;
        assert!(!event.wait_deadline(deadline));
        assert!(clock::now_ns() >= deadline);
    }

    #[test]
    fn manual_reset_stays_signalled() {
        let event = ManualEvent::new();
        event.signal();
        assert!(event.wait_timeout(Duration::ZERO));
        assert!(event.wait_timeout(Duration::ZERO));
        event.reset();
        assert!(!event.is_signalled());
    }
}
