//! Serialized transmit path shared by single-shot and periodic sends

use std::sync::Arc;

use canscope_core::{Frame, Observers, ReceivedFrame};
use parking_lot::Mutex;

use crate::driver::BusHandle;

/// Cloneable sender that funnels every transmission through one lock
#[derive(Clone)]
pub struct Transmitter {
    inner: Arc<TransmitInner>,
}

struct TransmitInner {
    handle: Arc<dyn BusHandle>,
    lock: Mutex<()>,
    observers: Arc<Observers>,
}

impl Transmitter {
    pub(crate) fn new(handle: Arc<dyn BusHandle>, observers: Arc<Observers>) -> Self {
        Self {
            inner: Arc::new(TransmitInner {
                handle,
                lock: Mutex::new(()),
                observers,
            }),
        }
    }

    /// Send one frame and return the number of frames the driver accepted.
    ///
    /// The attempt is echoed to observers as an outbound frame before the
    /// driver is called. Driver errors count as 0 accepted.
    pub fn send(&self, frame: &Frame) -> usize {
        // Echo outside the lock: observers may transmit from their callback.
        self.inner
            .observers
            .frame(&ReceivedFrame::outbound(frame.clone()));

        let _guard = self.inner.lock.lock();
        match self.inner.handle.transmit(frame) {
            Ok(0) => {
                tracing::debug!(id = %frame.key(), "Transmit not accepted");
                0
            }
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::debug!(id = %frame.key(), error = %e, "Transmit failed");
                0
            }
        }
    }
}
