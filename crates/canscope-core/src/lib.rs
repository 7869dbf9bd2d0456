//! canscope-core - Core types for live CAN bus sessions
//!
//! This crate holds the driver-independent data model shared by the
//! session engine (`canscope-bus`), the frame aggregator
//! (`canscope-view`) and any presentation layer:
//!
//! - [`Frame`] with the CAN / CAN FD DLC table
//! - [`FrameEntry`] parsing of user-entered frames
//! - [`FilterRule`] acceptance filters
//! - [`SessionConfig`], [`Features`], [`DeviceCapabilities`]
//! - [`StatusMessage`] and the [`Observers`] fan-out registry
//! - the [`SessionError`] taxonomy

pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod frame;
pub mod observer;
pub mod status;

pub use config::{
    format_bitrate, DeviceCapabilities, ErrorCounters, Features, PeriodicItem, ProtocolMode,
    SessionConfig,
};
pub use entry::FrameEntry;
pub use error::{FrameError, SessionError, SessionResult};
pub use filter::{FilterRule, FilterSet, IdType};
pub use frame::{Direction, Frame, FrameKind, IdKey, ReceivedFrame};
pub use observer::{ObserverId, Observers, SessionObserver};
pub use status::{StatusLevel, StatusMessage};
