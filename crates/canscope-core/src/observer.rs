//! Observer registry
//!
//! The session engine reports everything it sees through
//! [`SessionObserver`]. Observers are called on whatever task produced
//! the event; any thread affinity a consumer needs is its own business.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ErrorCounters;
use crate::frame::ReceivedFrame;
use crate::status::StatusMessage;

/// Receiver of session events. All methods default to no-ops.
pub trait SessionObserver: Send + Sync {
    /// A frame was received, or a transmit was attempted (outbound echo)
    fn on_frame(&self, _frame: &ReceivedFrame) {}

    /// A status line for the presentation feed
    fn on_message(&self, _message: &StatusMessage) {}

    /// Fresh error counters
    fn on_counters(&self, _counters: ErrorCounters) {}

    /// Fresh bus usage in percent
    fn on_bus_usage(&self, _percent: f32) {}
}

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fan-out registry of observers, shared by every component of a session
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ObserverId, Arc<dyn SessionObserver>)>>,
}

impl Observers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, observer));
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // Snapshot so observers may (un)subscribe from inside a callback.
    fn snapshot(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.entries
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }

    pub fn frame(&self, frame: &ReceivedFrame) {
        for observer in self.snapshot() {
            observer.on_frame(frame);
        }
    }

    pub fn message(&self, message: StatusMessage) {
        tracing::debug!(%message, "Status message");
        for observer in self.snapshot() {
            observer.on_message(&message);
        }
    }

    pub fn counters(&self, counters: ErrorCounters) {
        for observer in self.snapshot() {
            observer.on_counters(counters);
        }
    }

    pub fn bus_usage(&self, percent: f32) {
        for observer in self.snapshot() {
            observer.on_bus_usage(percent);
        }
    }
}

impl SessionObserver for Observers {
    fn on_frame(&self, frame: &ReceivedFrame) {
        self.frame(frame);
    }

    fn on_message(&self, message: &StatusMessage) {
        self.message(message.clone());
    }

    fn on_counters(&self, counters: ErrorCounters) {
        self.counters(counters);
    }

    fn on_bus_usage(&self, percent: f32) {
        self.bus_usage(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<usize>,
        messages: Mutex<Vec<String>>,
    }

    impl SessionObserver for Recorder {
        fn on_frame(&self, _frame: &ReceivedFrame) {
            *self.frames.lock() += 1;
        }

        fn on_message(&self, message: &StatusMessage) {
            self.messages.lock().push(message.to_string());
        }
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let observers = Observers::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        observers.subscribe(a.clone());
        let id_b = observers.subscribe(b.clone());

        let frame = ReceivedFrame::outbound(Frame::classic(1, &[], false).unwrap());
        observers.frame(&frame);
        assert!(observers.unsubscribe(id_b));
        assert!(!observers.unsubscribe(id_b));
        observers.frame(&frame);
        observers.message(StatusMessage::info("hello"));

        assert_eq!(*a.frames.lock(), 2);
        assert_eq!(*b.frames.lock(), 1);
        assert_eq!(a.messages.lock().as_slice(), ["[info] hello"]);
        assert!(b.messages.lock().is_empty());
    }
}
