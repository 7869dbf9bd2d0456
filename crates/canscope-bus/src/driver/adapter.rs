//! Bus driver traits and event types

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use canscope_core::{DeviceCapabilities, ErrorCounters, Frame, ReceivedFrame, SessionConfig};
use chrono::{DateTime, Local};
use tokio::sync::broadcast;

use super::DriverError;

/// Class of a bus error frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFrameKind {
    BusOff,
    ErrorPassive,
    ErrorWarning,
    ArbitrationLost,
    Protocol,
    NoAck,
    BusError,
    Controller,
    Transceiver,
    Other,
}

impl fmt::Display for ErrorFrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorFrameKind::BusOff => "BusOff",
            ErrorFrameKind::ErrorPassive => "ErrorPassive",
            ErrorFrameKind::ErrorWarning => "ErrorWarning",
            ErrorFrameKind::ArbitrationLost => "ArbitrationLost",
            ErrorFrameKind::Protocol => "ProtocolViolation",
            ErrorFrameKind::NoAck => "NoAck",
            ErrorFrameKind::BusError => "BusError",
            ErrorFrameKind::Controller => "Controller",
            ErrorFrameKind::Transceiver => "Transceiver",
            ErrorFrameKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// An error frame reported by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrameEvent {
    pub kind: ErrorFrameKind,
    /// Wall-clock time the driver saw the error
    pub timestamp: DateTime<Local>,
    /// Counters carried on the error frame itself, if the driver has them
    pub counters: Option<ErrorCounters>,
}

/// Asynchronous notifications from an open bus
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    ErrorFrame(ErrorFrameEvent),
    /// Exception raised on a driver background thread
    BackgroundFault { message: String },
}

/// Factory for bus handles
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Query what an endpoint supports, without opening it
    fn capabilities(&self, endpoint: &str) -> Result<DeviceCapabilities, DriverError>;

    /// Open the endpoint and apply mode, timing, filters, listen-only and
    /// error reporting from `config`
    async fn open(&self, config: &SessionConfig) -> Result<Arc<dyn BusHandle>, DriverError>;
}

/// An open bus
#[async_trait]
pub trait BusHandle: Send + Sync {
    /// Wait for the next received frame.
    ///
    /// Returns `Ok(None)` once the bus has closed. Only one task receives
    /// from a handle.
    async fn recv(&self) -> Result<Option<ReceivedFrame>, DriverError>;

    /// Send one frame, returning the number of frames the driver accepted
    /// (0 when rejected or not ready)
    fn transmit(&self, frame: &Frame) -> Result<usize, DriverError>;

    /// Read the transmit / receive error counters
    fn error_counters(&self) -> Result<ErrorCounters, DriverError>;

    /// Read the bus load in percent
    fn bus_usage(&self) -> Result<f32, DriverError>;

    /// Subscribe to error frames and background faults
    fn subscribe_events(&self) -> broadcast::Receiver<DriverEvent>;

    /// Release the handle
    fn close(&self);
}
