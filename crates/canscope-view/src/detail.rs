//! Single-identifier detail view

use std::sync::Arc;

use canscope_core::{IdKey, ObserverId, Observers, ReceivedFrame, SessionObserver};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::log::{SequentialLog, DETAIL_CAPACITY};
use crate::row::{FrameRow, ObservedAt};

/// Follows one identifier key with its own row statistics and log.
///
/// Build the key with [`IdKey::parse`] to accept user input in any case.
pub struct DetailView {
    key: IdKey,
    row: Mutex<Option<FrameRow>>,
    log: Arc<SequentialLog>,
}

impl DetailView {
    pub fn new(key: IdKey, retain: usize) -> Self {
        Self {
            key,
            row: Mutex::new(None),
            log: Arc::new(SequentialLog::new(DETAIL_CAPACITY, retain)),
        }
    }

    pub fn key(&self) -> &IdKey {
        &self.key
    }

    /// Latest row for the key, if it has been seen
    pub fn row(&self) -> Option<FrameRow> {
        self.row.lock().clone()
    }

    pub fn log(&self) -> &Arc<SequentialLog> {
        &self.log
    }

    /// Record `frame` if it carries this view's key
    pub fn observe_at(&self, frame: &ReceivedFrame, at: ObservedAt) -> bool {
        if frame.frame.key() != self.key {
            return false;
        }
        let snapshot = {
            let mut row = self.row.lock();
            match row.as_mut() {
                Some(existing) => existing.update(frame, at),
                None => *row = Some(FrameRow::new(frame, at)),
            }
            row.clone()
        };
        if let Some(snapshot) = snapshot {
            self.log.push(snapshot);
        }
        true
    }
}

impl SessionObserver for DetailView {
    fn on_frame(&self, frame: &ReceivedFrame) {
        self.observe_at(frame, ObservedAt::now());
    }
}

/// Live detail view registration. Dropping it unsubscribes the view and
/// stops its flush timer.
pub struct DetailHandle {
    view: Arc<DetailView>,
    registry: Arc<Observers>,
    id: ObserverId,
    cancel: CancellationToken,
    flusher: Option<JoinHandle<()>>,
}

impl DetailHandle {
    pub(crate) fn new(
        view: Arc<DetailView>,
        registry: Arc<Observers>,
        id: ObserverId,
        cancel: CancellationToken,
        flusher: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            view,
            registry,
            id,
            cancel,
            flusher,
        }
    }

    pub fn view(&self) -> &Arc<DetailView> {
        &self.view
    }

    pub fn key(&self) -> &IdKey {
        self.view.key()
    }

    pub fn row(&self) -> Option<FrameRow> {
        self.view.row()
    }

    pub fn log(&self) -> &Arc<SequentialLog> {
        self.view.log()
    }
}

impl Drop for DetailHandle {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
        self.cancel.cancel();
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
        }
        debug!(key = %self.view.key(), "Detail view closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::DEFAULT_RETAIN;
    use canscope_core::Frame;

    #[test]
    fn view_filters_by_exact_key() {
        let view = DetailView::new(IdKey::parse("0x1ab").unwrap(), DEFAULT_RETAIN);
        let hit = ReceivedFrame::inbound(Frame::classic(0x1AB, &[1], false).unwrap(), None);
        let extended = ReceivedFrame::inbound(Frame::classic(0x1AB, &[1], true).unwrap(), None);
        let other = ReceivedFrame::inbound(Frame::classic(0x1AC, &[1], false).unwrap(), None);

        assert!(view.observe_at(&hit, ObservedAt::now()));
        assert!(!view.observe_at(&extended, ObservedAt::now()));
        assert!(!view.observe_at(&other, ObservedAt::now()));
        assert!(view.observe_at(&hit, ObservedAt::now()));

        assert_eq!(view.row().unwrap().count(), 2);
        view.log().flush();
        assert_eq!(view.log().len(), 2);
    }
}
