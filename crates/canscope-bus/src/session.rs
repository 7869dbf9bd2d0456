//! Live bus session
//!
//! A [`BusSession`] owns one open [`BusHandle`] and everything bound to
//! it: the receive stream, the serialized transmit path, the periodic
//! scheduler, the telemetry poller and the driver event pump. All of
//! them observe one [`CancellationToken`]; the receive stream performs
//! the orderly shutdown exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use canscope_core::{
    Features, Frame, IdKey, Observers, PeriodicItem, ReceivedFrame, SessionConfig, SessionError,
    SessionResult, StatusMessage,
};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{BusDriver, BusHandle, DriverEvent, ErrorFrameEvent};
use crate::periodic::PeriodicScheduler;
use crate::telemetry::TelemetryPoller;
use crate::transmit::Transmitter;

/// An open bus session
pub struct BusSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    handle: Arc<dyn BusHandle>,
    transmitter: Transmitter,
    observers: Arc<Observers>,
    cancel: CancellationToken,
    periodic: Mutex<PeriodicScheduler>,
    background: Mutex<Vec<JoinHandle<()>>>,
    close_reason: Mutex<Option<String>>,
    open: AtomicBool,
    stream_taken: AtomicBool,
    released: AtomicBool,
}

impl BusSession {
    /// Validate `config`, check it against the endpoint's capabilities and
    /// open the bus.
    ///
    /// Every check runs before the driver opens anything. On success the
    /// session announces itself on the status feed and starts the event
    /// pump and, if configured, the telemetry poller.
    pub async fn open(
        driver: &dyn BusDriver,
        config: SessionConfig,
        observers: Arc<Observers>,
    ) -> SessionResult<Self> {
        config.validate()?;
        let caps = driver
            .capabilities(&config.endpoint)
            .map_err(|e| SessionError::config(e.to_string()))?;
        config.check_capabilities(&caps)?;
        if !caps.bit_rates.is_empty() && !caps.bit_rates.contains(&config.bit_rate) {
            warn!(bit_rate = config.bit_rate, "Bit rate not in the endpoint's table");
        }

        let handle = driver
            .open(&config)
            .await
            .map_err(|e| SessionError::Driver(e.to_string()))?;
        info!(endpoint = %config.endpoint, mode = config.mode.label(), "Bus session opened");
        observers.message(StatusMessage::info(config.describe()));

        let cancel = CancellationToken::new();
        let transmitter = Transmitter::new(handle.clone(), observers.clone());
        let periodic = PeriodicScheduler::new(transmitter.clone(), cancel.clone());

        let mut background = vec![spawn_event_pump(
            handle.clone(),
            observers.clone(),
            config.features,
            cancel.clone(),
        )];
        if let Some(poller) =
            TelemetryPoller::new(handle.clone(), observers.clone(), config.features)
        {
            background.extend(poller.spawn(config.telemetry_interval(), cancel.clone()));
        }

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                handle,
                transmitter,
                observers,
                cancel,
                periodic: Mutex::new(periodic),
                background: Mutex::new(background),
                close_reason: Mutex::new(None),
                open: AtomicBool::new(true),
                stream_taken: AtomicBool::new(false),
                released: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn observers(&self) -> &Arc<Observers> {
        &self.inner.observers
    }

    /// False once the session was stopped, even before the receive stream
    /// has finished its shutdown
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    /// Token that stops the session when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Request an orderly stop. The receive stream observes it at its next
    /// wait and shuts the session down.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        if !self.inner.stream_taken.load(Ordering::SeqCst) {
            self.inner.shutdown();
        }
    }

    /// Take the receive stream.
    ///
    /// The stream yields received frames until the session is stopped or
    /// the bus closes, then shuts the session down: periodic tasks stop,
    /// `"Listener stopped."` is announced and the handle is released. It
    /// can be taken once per session. Every frame is also delivered to the
    /// session's observers.
    pub fn stream_frames(
        &self,
    ) -> SessionResult<impl Stream<Item = ReceivedFrame> + Send + 'static> {
        if !self.is_open() {
            return Err(SessionError::NotOpen);
        }
        if self.inner.stream_taken.swap(true, Ordering::SeqCst) {
            return Err(SessionError::StreamTaken);
        }
        let inner = self.inner.clone();
        // Created outside the generator so an unpolled stream still shuts down on drop.
        let guard = ShutdownGuard(self.inner.clone());

        Ok(async_stream::stream! {
            let _shutdown = guard;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    next = inner.handle.recv() => next,
                };
                match next {
                    Ok(Some(frame)) => {
                        inner.observers.frame(&frame);
                        yield frame;
                    }
                    Ok(None) => {
                        inner.mark_closed("bus closed by driver".to_string());
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        inner.mark_closed(e.to_string());
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "Receive fault");
                        inner.observers.message(StatusMessage::exception(e.to_string()));
                    }
                }
            }
        })
    }

    /// Drive the receive stream to completion, delivering frames to the
    /// observers only.
    ///
    /// Returns `Ok(())` when the session was stopped and
    /// [`SessionError::BusClosed`] when the bus closed underneath it.
    pub async fn run(&self) -> SessionResult<()> {
        let stream = self.stream_frames()?;
        futures::pin_mut!(stream);
        while stream.next().await.is_some() {}

        match self.inner.close_reason.lock().take() {
            Some(reason) => Err(SessionError::BusClosed(reason)),
            None => Ok(()),
        }
    }

    /// Send one frame through the shared transmit lock.
    ///
    /// Returns the number of frames the driver accepted; 0 when the driver
    /// rejected it or the session is not open.
    pub fn transmit(&self, frame: &Frame) -> usize {
        if !self.is_open() {
            return 0;
        }
        self.inner.transmitter.send(frame)
    }

    /// Replace the running periodic tasks with `items`
    pub fn start_periodic(&self, items: &[PeriodicItem]) -> SessionResult<usize> {
        if !self.is_open() {
            return Err(SessionError::NotOpen);
        }
        let (stopped, count) = {
            let mut periodic = self.inner.periodic.lock();
            (periodic.stop_all(), periodic.start_all(items))
        };
        if stopped {
            self.inner.announce_periodic_stopped();
        }
        self.inner.observers.message(StatusMessage::info(format!(
            "Periodic started: {} item(s).",
            count
        )));
        Ok(count)
    }

    /// Stop every periodic task
    pub fn stop_periodic(&self) {
        let stopped = self.inner.periodic.lock().stop_all();
        if stopped {
            self.inner.announce_periodic_stopped();
        }
    }

    /// Number of running periodic tasks
    pub fn periodic_count(&self) -> usize {
        self.inner.periodic.lock().active_count()
    }

    /// Identifier keys of the running periodic tasks
    pub fn periodic_keys(&self) -> Vec<IdKey> {
        self.inner.periodic.lock().active_keys()
    }
}

impl Drop for BusSession {
    fn drop(&mut self) {
        // A stream that was never taken cannot perform the shutdown.
        if !self.inner.stream_taken.load(Ordering::SeqCst) {
            self.inner.shutdown();
        }
    }
}

impl SessionInner {
    fn mark_closed(&self, reason: String) {
        warn!(reason = %reason, "Bus closed under the receive loop");
        self.observers
            .message(StatusMessage::error(format!("Bus closed: {}", reason)));
        *self.close_reason.lock() = Some(reason);
    }

    fn announce_periodic_stopped(&self) {
        self.observers
            .message(StatusMessage::info("Periodic stopped."));
    }

    fn shutdown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        let stopped = self.periodic.lock().stop_all();
        if stopped {
            self.announce_periodic_stopped();
        }
        for task in self.background.lock().drain(..) {
            task.abort();
        }
        self.observers
            .message(StatusMessage::info("Listener stopped."));
        self.handle.close();
        info!(endpoint = %self.config.endpoint, "Bus session closed");
    }
}

struct ShutdownGuard(Arc<SessionInner>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

fn spawn_event_pump(
    handle: Arc<dyn BusHandle>,
    observers: Arc<Observers>,
    features: Features,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = handle.subscribe_events();
    let error_frames = features.contains(Features::ERROR_FRAME);
    let query_counters = features.contains(Features::ERROR_COUNTERS);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(DriverEvent::ErrorFrame(event)) if error_frames => {
                    report_error_frame(handle.as_ref(), &observers, &event, query_counters);
                }
                Ok(DriverEvent::ErrorFrame(_)) => {}
                Ok(DriverEvent::BackgroundFault { message }) => {
                    debug!(message = %message, "Driver background fault");
                    observers.message(StatusMessage::exception(message));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Driver events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn report_error_frame(
    handle: &dyn BusHandle,
    observers: &Observers,
    event: &ErrorFrameEvent,
    query_counters: bool,
) {
    let counters = match event.counters {
        Some(counters) => Some(counters),
        None if query_counters => match handle.error_counters() {
            Ok(counters) => Some(counters),
            Err(e) => {
                debug!(error = %e, "Error counter query failed");
                None
            }
        },
        None => None,
    };
    if let Some(counters) = counters {
        observers.counters(counters);
    }
    observers.message(StatusMessage::error(format!(
        "{} @{}",
        event.kind,
        event.timestamp.format("%H:%M:%S%.3f")
    )));
}
