//! SocketCAN driver using a raw CAN FD socket

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canscope_core::{
    DeviceCapabilities, ErrorCounters, Features, FilterRule, FilterSet, Frame, ReceivedFrame,
    SessionConfig,
};
use chrono::Local;
use parking_lot::Mutex;
use socketcan::{
    CanAnyFrame, CanErrorFrame, CanFdFrame, CanFdSocket, CanFilter, CanFrame, EmbeddedFrame,
    ExtendedId, Frame as _, Id, Socket, SocketOptions, StandardId,
};
use tokio::sync::{broadcast, mpsc};

use crate::driver::{
    endpoint_scheme, BusDriver, BusHandle, DriverError, DriverEvent, ErrorFrameEvent,
    ErrorFrameKind,
};

const CAN_EFF_FLAG: u32 = 0x8000_0000;

// Error class bits of the error frame ID word (linux/can/error.h)
const CAN_ERR_LOSTARB: u32 = 0x0002;
const CAN_ERR_CRTL: u32 = 0x0004;
const CAN_ERR_PROT: u32 = 0x0008;
const CAN_ERR_TRX: u32 = 0x0010;
const CAN_ERR_ACK: u32 = 0x0020;
const CAN_ERR_BUSOFF: u32 = 0x0040;
const CAN_ERR_BUSERROR: u32 = 0x0080;
const CAN_ERR_CNT: u32 = 0x0200;

// Controller status in data[1]
const CAN_ERR_CRTL_WARNING: u8 = 0x04 | 0x08;
const CAN_ERR_CRTL_PASSIVE: u8 = 0x10 | 0x20;

/// Longest Linux interface name
const IFNAMSIZ: usize = 15;

type RxItem = Result<ReceivedFrame, DriverError>;

/// Driver for `socketcan://<iface>` endpoints
#[derive(Debug, Default)]
pub struct SocketCanDriver;

impl SocketCanDriver {
    pub fn new() -> Self {
        Self
    }
}

fn interface_name(endpoint: &str) -> Result<&str, DriverError> {
    let name = match endpoint_scheme(endpoint) {
        Some((_, rest)) => rest,
        None => endpoint.trim(),
    };
    if name.is_empty() || name.len() > IFNAMSIZ || name.contains('/') {
        return Err(DriverError::InvalidEndpoint(format!(
            "'{}' is not a CAN interface name",
            endpoint
        )));
    }
    Ok(name)
}

#[async_trait]
impl BusDriver for SocketCanDriver {
    fn capabilities(&self, endpoint: &str) -> Result<DeviceCapabilities, DriverError> {
        interface_name(endpoint)?;
        // Listen-only and bit timing are interface settings (ip link), not socket options.
        Ok(DeviceCapabilities::with_presets(
            Features::CLASSIC
                | Features::FD
                | Features::FILTERS
                | Features::ERROR_FRAME
                | Features::CYCLIC_TX,
        ))
    }

    async fn open(&self, config: &SessionConfig) -> Result<Arc<dyn BusHandle>, DriverError> {
        let iface = interface_name(&config.endpoint)?;

        let socket = CanFdSocket::open(iface).map_err(|e| {
            DriverError::OpenFailed(format!("Failed to open CAN socket on {}: {}", iface, e))
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| DriverError::OpenFailed(format!("Failed to set non-blocking: {}", e)))?;

        if let Some(filters) = kernel_filters(&config.filters) {
            socket
                .set_filters(&filters)
                .map_err(|e| DriverError::OpenFailed(format!("Failed to set filters: {}", e)))?;
        }
        if config.features.contains(Features::ERROR_FRAME) {
            socket.set_error_filter_accept_all().map_err(|e| {
                DriverError::OpenFailed(format!("Failed to enable error frames: {}", e))
            })?;
        }

        tracing::info!(interface = %iface, fd = config.is_fd(), "SocketCAN bus opened");

        let (rx_tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let handle = SocketCanHandle {
            socket: Arc::new(Mutex::new(socket)),
            rx: tokio::sync::Mutex::new(rx),
            events,
            running: Arc::new(AtomicBool::new(true)),
            last_counters: Arc::new(Mutex::new(None)),
        };
        handle.start_listener(rx_tx, config.filters.clone());

        Ok(Arc::new(handle))
    }
}

/// Kernel filters for a filter set, or `None` when a rule can only be
/// applied in software (ranges)
fn kernel_filters(filters: &FilterSet) -> Option<Vec<CanFilter>> {
    if filters.is_empty() {
        return None;
    }
    filters
        .rules()
        .iter()
        .map(|rule| match *rule {
            FilterRule::Mask {
                code,
                mask,
                id_type,
            } => {
                let (code, mask) = if id_type.is_extended() {
                    (code | CAN_EFF_FLAG, mask | CAN_EFF_FLAG)
                } else {
                    (code, mask | CAN_EFF_FLAG)
                };
                Some(CanFilter::new(code, mask))
            }
            FilterRule::Range { .. } => None,
        })
        .collect()
}

/// Open SocketCAN bus
pub struct SocketCanHandle {
    socket: Arc<Mutex<CanFdSocket>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RxItem>>,
    events: broadcast::Sender<DriverEvent>,
    running: Arc<AtomicBool>,
    last_counters: Arc<Mutex<Option<ErrorCounters>>>,
}

impl SocketCanHandle {
    fn start_listener(&self, frames: mpsc::UnboundedSender<RxItem>, filters: FilterSet) {
        let socket = self.socket.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let last_counters = self.last_counters.clone();

        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                let result = socket.lock().read_frame();
                match result {
                    Ok(CanAnyFrame::Error(err)) => {
                        let event = error_event(&err);
                        if let Some(counters) = event.counters {
                            *last_counters.lock() = Some(counters);
                        }
                        let _ = events.send(DriverEvent::ErrorFrame(event));
                    }
                    Ok(any) => {
                        let Some(frame) = convert_frame(any) else {
                            continue;
                        };
                        if !filters.matches(&frame) {
                            continue;
                        }
                        if frames.send(Ok(ReceivedFrame::inbound(frame, None))).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        tracing::error!(?e, "SocketCAN read error");
                        if frames
                            .send(Err(DriverError::ReceiveFailed(e.to_string())))
                            .is_err()
                        {
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            tracing::debug!("SocketCAN listener stopped");
        });
    }
}

#[async_trait]
impl BusHandle for SocketCanHandle {
    async fn recv(&self) -> Result<Option<ReceivedFrame>, DriverError> {
        match self.rx.lock().await.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn transmit(&self, frame: &Frame) -> Result<usize, DriverError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let id = socket_id(frame)?;
        let invalid = || DriverError::SendFailed(format!("cannot encode frame {}", frame.key()));

        let socket = self.socket.lock();
        let result = if frame.is_fd() {
            let mut fd = CanFdFrame::new(id, frame.data()).ok_or_else(invalid)?;
            fd.set_brs(frame.brs());
            fd.set_esi(frame.esi());
            socket.write_frame(&fd)
        } else if frame.is_remote() {
            let remote = CanFrame::new_remote(id, frame.dlc() as usize).ok_or_else(invalid)?;
            socket.write_frame(&remote)
        } else {
            let data = CanFrame::new(id, frame.data()).ok_or_else(invalid)?;
            socket.write_frame(&data)
        };

        match result {
            Ok(()) => Ok(1),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(DriverError::SendFailed(e.to_string())),
        }
    }

    fn error_counters(&self) -> Result<ErrorCounters, DriverError> {
        (*self.last_counters.lock()).ok_or_else(|| {
            DriverError::QueryFailed("no error counters reported yet".to_string())
        })
    }

    fn bus_usage(&self) -> Result<f32, DriverError> {
        Err(DriverError::Unsupported(
            "SocketCAN does not report bus usage".to_string(),
        ))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("SocketCAN handle closed");
        }
    }
}

impl Drop for SocketCanHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn socket_id(frame: &Frame) -> Result<Id, DriverError> {
    let id = if frame.is_extended() {
        ExtendedId::new(frame.id()).map(Id::Extended)
    } else {
        u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    id.ok_or_else(|| DriverError::SendFailed(format!("invalid CAN ID 0x{:X}", frame.id())))
}

fn convert_frame(frame: CanAnyFrame) -> Option<Frame> {
    match frame {
        CanAnyFrame::Normal(f) => Frame::classic(f.raw_id(), f.data(), f.is_extended()).ok(),
        CanAnyFrame::Remote(f) => {
            let dlc = u8::try_from(f.dlc()).ok()?;
            Frame::remote(f.raw_id(), dlc, f.is_extended()).ok()
        }
        CanAnyFrame::Fd(f) => {
            Frame::fd(f.raw_id(), f.data(), f.is_extended(), f.is_brs(), f.is_esi()).ok()
        }
        CanAnyFrame::Error(_) => None,
    }
}

fn error_event(frame: &CanErrorFrame) -> ErrorFrameEvent {
    let (kind, counters) = classify_error(frame.error_bits(), frame.data());
    ErrorFrameEvent {
        kind,
        timestamp: Local::now(),
        counters,
    }
}

fn classify_error(bits: u32, data: &[u8]) -> (ErrorFrameKind, Option<ErrorCounters>) {
    let controller = data.get(1).copied().unwrap_or(0);
    let kind = if bits & CAN_ERR_BUSOFF != 0 {
        ErrorFrameKind::BusOff
    } else if bits & CAN_ERR_CRTL != 0 {
        if controller & CAN_ERR_CRTL_PASSIVE != 0 {
            ErrorFrameKind::ErrorPassive
        } else if controller & CAN_ERR_CRTL_WARNING != 0 {
            ErrorFrameKind::ErrorWarning
        } else {
            ErrorFrameKind::Controller
        }
    } else if bits & CAN_ERR_LOSTARB != 0 {
        ErrorFrameKind::ArbitrationLost
    } else if bits & CAN_ERR_PROT != 0 {
        ErrorFrameKind::Protocol
    } else if bits & CAN_ERR_ACK != 0 {
        ErrorFrameKind::NoAck
    } else if bits & CAN_ERR_TRX != 0 {
        ErrorFrameKind::Transceiver
    } else if bits & CAN_ERR_BUSERROR != 0 {
        ErrorFrameKind::BusError
    } else {
        ErrorFrameKind::Other
    };

    let counters = match data {
        [_, _, _, _, _, _, tx, rx, ..] if bits & CAN_ERR_CNT != 0 => Some(ErrorCounters {
            tx: *tx as u32,
            rx: *rx as u32,
        }),
        _ => None,
    };
    (kind, counters)
}
