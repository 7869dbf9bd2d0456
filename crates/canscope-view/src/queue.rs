//! Bounded drop-oldest queue
//!
//! Producers never block: when the queue is full the oldest entry is
//! discarded to admit the new one. A single consumer drains everything
//! queued at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Fixed-capacity queue that discards its oldest entry on overflow
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an entry. Returns true if an older entry was discarded.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let overflow = items.len() >= self.capacity;
        if overflow {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
        overflow
    }

    /// Remove and return everything currently queued, oldest first
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries discarded since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued without counting it as dropped
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn overflow_keeps_most_recent_entries() {
        let queue = DropOldestQueue::new(1000);
        for i in 0..1500u32 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.dropped(), 500);

        let drained = queue.drain();
        assert_eq!(drained.first(), Some(&500));
        assert_eq!(drained.last(), Some(&1499));
        assert_eq!(drained, (500..1500).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn push_reports_overflow() {
        let queue = DropOldestQueue::new(2);
        assert!(!queue.push('a'));
        assert!(!queue.push('b'));
        assert!(queue.push('c'));
        assert_eq!(queue.drain(), vec!['b', 'c']);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = DropOldestQueue::new(0);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.drain(), vec![2]);
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = std::sync::Arc::new(DropOldestQueue::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 64);
        assert_eq!(queue.dropped(), 4000 - 64);
    }
}
