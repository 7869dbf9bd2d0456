//! Frame aggregator
//!
//! Projects the frame stream of a session into the latest-state table and
//! the sequential log, and fans frames out to any open detail views.

use std::sync::Arc;
use std::time::Duration;

use canscope_core::{IdKey, ObserverId, Observers, ReceivedFrame, SessionObserver};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::detail::{DetailHandle, DetailView};
use crate::log::{LogNotification, SequentialLog, DEFAULT_RETAIN, FLUSH_INTERVAL, LOG_CAPACITY};
use crate::row::{FrameRow, ObservedAt};
use crate::table::LatestStateTable;

/// Aggregator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Sequential log queue capacity
    pub log_capacity: usize,
    /// Visible rows kept by each sequential log
    pub retain: usize,
    /// Flush interval of the log and of every detail view
    pub flush_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            log_capacity: LOG_CAPACITY,
            retain: DEFAULT_RETAIN,
            flush_interval: FLUSH_INTERVAL,
        }
    }
}

/// Latest-state table plus sequential log for one session
pub struct FrameAggregator {
    config: AggregatorConfig,
    table: Mutex<LatestStateTable>,
    log: Arc<SequentialLog>,
    details: Arc<Observers>,
}

impl FrameAggregator {
    pub fn new() -> Arc<Self> {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(config: AggregatorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            table: Mutex::new(LatestStateTable::new()),
            log: Arc::new(SequentialLog::new(config.log_capacity, config.retain)),
            details: Observers::new(),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Subscribe to a session's observer registry
    pub fn attach(self: &Arc<Self>, observers: &Observers) -> ObserverId {
        observers.subscribe(self.clone())
    }

    pub fn observe(&self, frame: &ReceivedFrame) {
        self.observe_at(frame, ObservedAt::now());
    }

    /// Record a frame observed at `at`
    pub fn observe_at(&self, frame: &ReceivedFrame, at: ObservedAt) {
        {
            // Log order matches table order across producers.
            let mut table = self.table.lock();
            let snapshot = table.observe(frame, at).clone();
            self.log.push(snapshot);
        }
        if !self.details.is_empty() {
            self.details.frame(frame);
        }
    }

    /// Forget all rows; called when a new session starts
    pub fn reset(&self) {
        self.table.lock().clear();
        self.log.clear();
        debug!("Aggregator reset");
    }

    /// Copy of the latest-state table in first-seen order
    pub fn table_rows(&self) -> Vec<FrameRow> {
        self.table.lock().rows().to_vec()
    }

    pub fn table_len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn row(&self, key: &IdKey) -> Option<FrameRow> {
        self.table.lock().get(key).cloned()
    }

    pub fn log(&self) -> &Arc<SequentialLog> {
        &self.log
    }

    /// Flush the sequential log now
    pub fn flush(&self) -> Option<LogNotification> {
        self.log.flush()
    }

    /// Run the sequential log flush timer until `cancel` fires
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            interval_ms = self.config.flush_interval.as_millis() as u64,
            capacity = self.config.log_capacity,
            "Aggregator flush started"
        );
        self.log.spawn_flusher(self.config.flush_interval, cancel)
    }

    /// Open a detail view for one key with its own flush timer.
    ///
    /// The view stops when the handle is dropped or `parent` is cancelled.
    pub fn open_detail(&self, key: IdKey, parent: &CancellationToken) -> DetailHandle {
        let view = Arc::new(DetailView::new(key, self.config.retain));
        let id = self.details.subscribe(view.clone());
        let cancel = parent.child_token();
        let flusher = view
            .log()
            .spawn_flusher(self.config.flush_interval, cancel.clone());
        debug!(key = %view.key(), "Detail view opened");
        DetailHandle::new(view, self.details.clone(), id, cancel, Some(flusher))
    }

    /// Number of open detail views
    pub fn detail_count(&self) -> usize {
        self.details.len()
    }
}

impl SessionObserver for FrameAggregator {
    fn on_frame(&self, frame: &ReceivedFrame) {
        self.observe(frame);
    }
}
