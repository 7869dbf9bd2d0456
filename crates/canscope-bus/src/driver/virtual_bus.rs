//! In-process virtual bus for testing and demos
//!
//! [`VirtualDriver`] opens handles onto a shared [`VirtualBus`]. Tests
//! keep an `Arc<VirtualBus>` to inject traffic, error frames and faults,
//! and to inspect what the session transmitted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canscope_core::{
    DeviceCapabilities, ErrorCounters, Features, FilterSet, Frame, ReceivedFrame, SessionConfig,
};
use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::{BusDriver, BusHandle, DriverError, DriverEvent, ErrorFrameEvent, ErrorFrameKind};

type RxItem = Result<ReceivedFrame, DriverError>;

/// Window during which a transmit call was executing
#[derive(Debug, Clone, Copy)]
pub struct TransmitWindow {
    pub started: Instant,
    pub finished: Instant,
}

/// Shared state of a virtual bus
pub struct VirtualBus {
    rx_sender: Mutex<Option<mpsc::UnboundedSender<RxItem>>>,
    events: broadcast::Sender<DriverEvent>,
    filters: Mutex<FilterSet>,
    listen_only: AtomicBool,
    transmitted: Mutex<Vec<Frame>>,
    windows: Mutex<Vec<TransmitWindow>>,
    transmit_delay: Mutex<Duration>,
    reject_transmit: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    counters: Mutex<ErrorCounters>,
    bus_usage: Mutex<f32>,
    fail_counters: AtomicBool,
    fail_bus_usage: AtomicBool,
    counter_queries: AtomicUsize,
    usage_queries: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl VirtualBus {
    fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            rx_sender: Mutex::new(None),
            events,
            filters: Mutex::new(FilterSet::default()),
            listen_only: AtomicBool::new(false),
            transmitted: Mutex::new(Vec::new()),
            windows: Mutex::new(Vec::new()),
            transmit_delay: Mutex::new(Duration::ZERO),
            reject_transmit: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            counters: Mutex::new(ErrorCounters::default()),
            bus_usage: Mutex::new(0.0),
            fail_counters: AtomicBool::new(false),
            fail_bus_usage: AtomicBool::new(false),
            counter_queries: AtomicUsize::new(0),
            usage_queries: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Deliver a frame to the open handle. Returns false if it was
    /// filtered out or no handle is open.
    pub fn inject(&self, frame: Frame, timestamp: Option<Duration>) -> bool {
        if !self.filters.lock().matches(&frame) {
            return false;
        }
        match self.rx_sender.lock().as_ref() {
            Some(tx) => tx.send(Ok(ReceivedFrame::inbound(frame, timestamp))).is_ok(),
            None => false,
        }
    }

    /// Make the next receive fail with `error`
    pub fn inject_receive_error(&self, error: DriverError) -> bool {
        match self.rx_sender.lock().as_ref() {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Report an error frame, optionally carrying counters
    pub fn inject_error_frame(&self, kind: ErrorFrameKind, counters: Option<ErrorCounters>) {
        let _ = self.events.send(DriverEvent::ErrorFrame(ErrorFrameEvent {
            kind,
            timestamp: Local::now(),
            counters,
        }));
    }

    /// Report a background exception
    pub fn inject_fault(&self, message: impl Into<String>) {
        let _ = self.events.send(DriverEvent::BackgroundFault {
            message: message.into(),
        });
    }

    /// Close the bus underneath the open handle
    pub fn close_bus(&self) {
        self.rx_sender.lock().take();
    }

    pub fn set_counters(&self, counters: ErrorCounters) {
        *self.counters.lock() = counters;
    }

    pub fn set_bus_usage(&self, percent: f32) {
        *self.bus_usage.lock() = percent;
    }

    pub fn fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bus_usage(&self, fail: bool) {
        self.fail_bus_usage.store(fail, Ordering::SeqCst);
    }

    pub fn reject_transmit(&self, reject: bool) {
        self.reject_transmit.store(reject, Ordering::SeqCst);
    }

    /// Make every transmit occupy the driver for `delay`
    pub fn set_transmit_delay(&self, delay: Duration) {
        *self.transmit_delay.lock() = delay;
    }

    /// Frames accepted so far
    pub fn transmitted(&self) -> Vec<Frame> {
        self.transmitted.lock().clone()
    }

    /// Execution windows of every transmit call
    pub fn transmit_windows(&self) -> Vec<TransmitWindow> {
        self.windows.lock().clone()
    }

    /// Highest number of transmit calls seen executing at once
    pub fn max_concurrent_transmits(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn counter_queries(&self) -> usize {
        self.counter_queries.load(Ordering::SeqCst)
    }

    pub fn usage_queries(&self) -> usize {
        self.usage_queries.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Driver for `virtual://` endpoints
pub struct VirtualDriver {
    capabilities: DeviceCapabilities,
    bus: Arc<VirtualBus>,
}

impl VirtualDriver {
    pub fn new(features: Features) -> Self {
        Self {
            capabilities: DeviceCapabilities::with_presets(features),
            bus: Arc::new(VirtualBus::new()),
        }
    }

    /// The bus behind every handle this driver opens
    pub fn bus(&self) -> Arc<VirtualBus> {
        self.bus.clone()
    }
}

impl Default for VirtualDriver {
    fn default() -> Self {
        Self::new(Features::all())
    }
}

#[async_trait]
impl BusDriver for VirtualDriver {
    fn capabilities(&self, _endpoint: &str) -> Result<DeviceCapabilities, DriverError> {
        Ok(self.capabilities.clone())
    }

    async fn open(&self, config: &SessionConfig) -> Result<Arc<dyn BusHandle>, DriverError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.bus.rx_sender.lock() = Some(tx);
        *self.bus.filters.lock() = config.filters.clone();
        self.bus
            .listen_only
            .store(config.listen_only, Ordering::SeqCst);
        self.bus.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(endpoint = %config.endpoint, "Virtual bus opened");

        Ok(Arc::new(VirtualHandle {
            bus: self.bus.clone(),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle onto a [`VirtualBus`]
pub struct VirtualHandle {
    bus: Arc<VirtualBus>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RxItem>>,
    closed: AtomicBool,
}

#[async_trait]
impl BusHandle for VirtualHandle {
    async fn recv(&self) -> Result<Option<ReceivedFrame>, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.rx.lock().await.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn transmit(&self, frame: &Frame) -> Result<usize, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let started = Instant::now();
        let current = self.bus.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.bus.transmit_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let accepted = if self.bus.reject_transmit.load(Ordering::SeqCst)
            || self.bus.listen_only.load(Ordering::SeqCst)
        {
            0
        } else {
            self.bus.transmitted.lock().push(frame.clone());
            1
        };

        self.bus.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.bus.windows.lock().push(TransmitWindow {
            started,
            finished: Instant::now(),
        });
        Ok(accepted)
    }

    fn error_counters(&self) -> Result<ErrorCounters, DriverError> {
        self.bus.counter_queries.fetch_add(1, Ordering::SeqCst);
        if self.bus.fail_counters.load(Ordering::SeqCst) {
            return Err(DriverError::QueryFailed("error counters unavailable".to_string()));
        }
        Ok(*self.bus.counters.lock())
    }

    fn bus_usage(&self) -> Result<f32, DriverError> {
        self.bus.usage_queries.fetch_add(1, Ordering::SeqCst);
        if self.bus.fail_bus_usage.load(Ordering::SeqCst) {
            return Err(DriverError::QueryFailed("bus usage unavailable".to_string()));
        }
        Ok(*self.bus.bus_usage.lock())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DriverEvent> {
        self.bus.events.subscribe()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.closes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Virtual bus handle closed");
        }
    }
}
