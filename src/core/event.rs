//! One-shot data events for stalled readers.
//!
//! A reader that must refetch stale data sends `RequestData` and blocks until
//! the inbound `Data` handler signals the node's event. The event is
//! generation-counted: a waiter registers *before* the request is sent, so a
//! signal that lands between the send and the wait is never lost. Events live
//! as long as the node record and are reusable across wait cycles.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct DataEvent {
    generation: Mutex<u64>,
    arrived: Condvar,
}

impl DataEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter against the current generation.
    pub fn waiter(&self) -> EventWaiter<'_> {
        let seen = *self.generation.lock().expect("data event lock poisoned");
        EventWaiter { event: self, seen }
    }

    /// Wake every registered waiter.
    pub fn signal(&self) {
        let mut generation = self.generation.lock().expect("data event lock poisoned");
        *generation += 1;
        self.arrived.notify_all();
    }
}

/// A registered wait for the next signal after the waiter was created.
#[derive(Debug)]
pub struct EventWaiter<'a> {
    event: &'a DataEvent,
    seen: u64,
}

impl EventWaiter<'_> {
    /// Block until the event is signalled. Returns immediately if a signal
    /// already arrived since this waiter was registered.
    pub fn wait(self) {
        let mut generation = self
            .event
            .generation
            .lock()
            .expect("data event lock poisoned");
        while *generation == self.seen {
            generation = self
                .event
                .arrived
                .wait(generation)
                .expect("data event lock poisoned");
        }
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `false` if the
    /// timeout elapsed with no signal.
    pub fn wait_deadline(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self
            .event
            .generation
            .lock()
            .expect("data event lock poisoned");
        while *generation == self.seen {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self
                .event
                .arrived
                .wait_timeout(generation, remaining)
                .expect("data event lock poisoned");
            generation = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let event = DataEvent::new();
        let waiter = event.waiter();
        event.signal();
        // Would hang forever if the pre-wait signal were dropped.
        waiter.wait();
    }

    #[test]
    fn wait_deadline_reports_timeout() {
        let event = DataEvent::new();
        let waiter = event.waiter();
        assert!(!waiter.wait_deadline(Duration::from_millis(10)));
    }

    #[test]
    fn signal_from_another_thread_unblocks_waiter() {
        let event = Arc::new(DataEvent::new());
        let signaller = Arc::clone(&event);
        let waiter_thread = thread::spawn(move || {
            let waiter = event.waiter();
            waiter.wait_deadline(Duration::from_secs(5))
        });
        thread::sleep(Duration::from_millis(20));
        signaller.signal();
        assert!(waiter_thread.join().expect("waiter thread panicked"));
    }

    #[test]
    fn event_is_reusable_across_cycles() {
        let event = DataEvent::new();
        for _ in 0..3 {
            let waiter = event.waiter();
            event.signal();
            assert!(waiter.wait_deadline(Duration::from_secs(1)));
        }
    }
}
