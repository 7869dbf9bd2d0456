//! canscope-bus - Live CAN bus session engine
//!
//! This crate opens a bus endpoint through a [`BusDriver`], streams
//! received frames, serializes single-shot and periodic transmission and
//! samples device telemetry, all bound to one cancellation token.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BusSession                           │
//! │  receive stream, orderly shutdown, error-frame reporting    │
//! │                                                             │
//! │  ┌──────────────────┐ ┌─────────────┐ ┌─────────────────┐  │
//! │  │PeriodicScheduler │ │ Transmitter │ │ TelemetryPoller │  │
//! │  │ (repeating tx)   │─▶ (tx lock)   │ │ (counters/load) │  │
//! │  └──────────────────┘ └──────┬──────┘ └────────┬────────┘  │
//! │                              │                 │           │
//! │                      ┌───────┴─────────────────┴──┐        │
//! │                      │         BusHandle          │        │
//! │                      │ (virtual / SocketCAN / ..) │        │
//! │                      └────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//!                │ frames, status messages, telemetry
//!                ▼
//!            Observers
//! ```

pub mod driver;
pub mod periodic;
pub mod session;
pub mod telemetry;
pub mod transmit;

pub use driver::{create_driver, BusDriver, BusHandle, DriverError, DriverEvent, ErrorFrameKind};
pub use periodic::PeriodicScheduler;
pub use session::BusSession;
pub use telemetry::TelemetryPoller;
pub use transmit::Transmitter;

// Re-export for convenience
pub use canscope_core::{
    DeviceCapabilities, Features, Frame, Observers, PeriodicItem, ReceivedFrame, SessionConfig,
    SessionError, SessionObserver, SessionResult, StatusMessage,
};
