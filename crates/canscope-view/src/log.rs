//! Sequential log with batched flush
//!
//! Producers push rows into a [`DropOldestQueue`]. Only [`SequentialLog::flush`]
//! touches the visible collection: it moves everything queued in one
//! batch and publishes a single [`LogNotification::Reset`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::DropOldestQueue;
use crate::row::FrameRow;

/// Queue capacity of the full sequential log
pub const LOG_CAPACITY: usize = 20_000;
/// Queue capacity of a single-identifier detail view
pub const DETAIL_CAPACITY: usize = 1_000;
/// Rows kept visible before the oldest are trimmed
pub const DEFAULT_RETAIN: usize = 200_000;
/// Interval between batched flushes
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Change notification published once per flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogNotification {
    /// The visible collection changed wholesale
    Reset {
        /// Rows appended by this flush
        appended: usize,
        /// Visible rows after the flush
        total: usize,
        /// Rows lost to queue overflow since the previous flush
        dropped: u64,
    },
}

/// Best-effort, rate-limited frame log
pub struct SequentialLog {
    pending: DropOldestQueue<FrameRow>,
    visible: RwLock<Vec<FrameRow>>,
    retain: usize,
    dropped_reported: AtomicU64,
    notify: broadcast::Sender<LogNotification>,
}

impl SequentialLog {
    /// Log with a queue of `capacity` rows keeping at most `retain` rows visible
    pub fn new(capacity: usize, retain: usize) -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            pending: DropOldestQueue::new(capacity),
            visible: RwLock::new(Vec::new()),
            retain: retain.max(1),
            dropped_reported: AtomicU64::new(0),
            notify,
        }
    }

    /// Queue a row for the next flush; never blocks
    pub fn push(&self, row: FrameRow) {
        if self.pending.push(row) {
            debug!(capacity = self.pending.capacity(), "Sequential log queue overflow");
        }
    }

    /// Move every queued row into the visible collection.
    ///
    /// Returns the notification that was published, or `None` when nothing
    /// was queued.
    pub fn flush(&self) -> Option<LogNotification> {
        let batch = self.pending.drain();
        if batch.is_empty() {
            return None;
        }
        let dropped_total = self.pending.dropped();
        let dropped = dropped_total - self.dropped_reported.swap(dropped_total, Ordering::Relaxed);

        let appended = batch.len();
        let total = {
            let mut visible = self.visible.write();
            visible.extend(batch);
            if visible.len() > self.retain {
                let excess = visible.len() - self.retain;
                visible.drain(..excess);
            }
            visible.len()
        };

        let notification = LogNotification::Reset {
            appended,
            total,
            dropped,
        };
        // No subscribers is fine.
        let _ = self.notify.send(notification);
        Some(notification)
    }

    /// Receive a notification after each flush
    pub fn subscribe(&self) -> broadcast::Receiver<LogNotification> {
        self.notify.subscribe()
    }

    /// Copy of the visible rows, oldest first
    pub fn snapshot(&self) -> Vec<FrameRow> {
        self.visible.read().clone()
    }

    /// Last `n` visible rows
    pub fn tail(&self, n: usize) -> Vec<FrameRow> {
        let visible = self.visible.read();
        let start = visible.len().saturating_sub(n);
        visible[start..].to_vec()
    }

    /// Number of visible rows
    pub fn len(&self) -> usize {
        self.visible.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.read().is_empty()
    }

    /// Rows waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Empty both the queue and the visible rows
    pub fn clear(&self) {
        self.pending.clear();
        self.dropped_reported
            .store(self.pending.dropped(), Ordering::Relaxed);
        self.visible.write().clear();
        let _ = self.notify.send(LogNotification::Reset {
            appended: 0,
            total: 0,
            dropped: 0,
        });
    }

    /// Flush every `interval` until `cancel` fires
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        log.flush();
                    }
                }
            }
            debug!("Sequential log flusher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ObservedAt;
    use canscope_core::{Frame, ReceivedFrame};
    use pretty_assertions::assert_eq;

    fn row(id: u32) -> FrameRow {
        let frame = ReceivedFrame::inbound(Frame::classic(id, &[], false).unwrap(), None);
        FrameRow::new(&frame, ObservedAt::now())
    }

    #[test]
    fn flush_applies_queued_rows_in_one_batch() {
        let log = SequentialLog::new(LOG_CAPACITY, DEFAULT_RETAIN);
        let mut rx = log.subscribe();
        log.push(row(1));
        log.push(row(2));
        assert!(log.is_empty());

        let notification = log.flush();
        assert_eq!(
            notification,
            Some(LogNotification::Reset {
                appended: 2,
                total: 2,
                dropped: 0
            })
        );
        assert_eq!(rx.try_recv().ok(), notification);
        assert!(rx.try_recv().is_err());
        assert_eq!(log.len(), 2);
        assert_eq!(log.flush(), None);
    }

    #[test]
    fn overflow_before_flush_keeps_latest_rows() {
        let log = SequentialLog::new(1000, DEFAULT_RETAIN);
        for id in 0..1500 {
            log.push(row(id));
        }
        let notification = log.flush().unwrap();
        assert_eq!(
            notification,
            LogNotification::Reset {
                appended: 1000,
                total: 1000,
                dropped: 500
            }
        );
        let rows = log.snapshot();
        assert_eq!(rows.first().unwrap().id(), &canscope_core::IdKey::new(500, false));
        assert_eq!(rows.last().unwrap().id(), &canscope_core::IdKey::new(1499, false));

        // Drops are reported once.
        log.push(row(1));
        assert!(matches!(
            log.flush(),
            Some(LogNotification::Reset { dropped: 0, .. })
        ));
    }

    #[test]
    fn retention_trims_oldest_rows() {
        let log = SequentialLog::new(100, 5);
        for id in 0..8 {
            log.push(row(id));
        }
        log.flush();
        let ids: Vec<_> = log.tail(10).iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, ["0x003", "0x004", "0x005", "0x006", "0x007"]);
        assert_eq!(log.tail(2).len(), 2);
    }

    #[test]
    fn clear_discards_queued_and_visible_rows() {
        let log = SequentialLog::new(10, 10);
        log.push(row(1));
        log.flush();
        log.push(row(2));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.pending(), 0);
        assert_eq!(log.flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn flusher_runs_on_interval() {
        let log = Arc::new(SequentialLog::new(LOG_CAPACITY, DEFAULT_RETAIN));
        let cancel = CancellationToken::new();
        let task = log.spawn_flusher(FLUSH_INTERVAL, cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        log.push(row(0x42));
        assert!(log.is_empty());

        tokio::time::sleep(FLUSH_INTERVAL).await;
        assert_eq!(log.len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
