//! Error types shared by the session engine

use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that end or refuse a bus session
///
/// Recoverable faults (rejected transmits, failed telemetry samples,
/// driver background exceptions) are never returned through this type;
/// they are reported on the status message feed instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid or unsupported session configuration, raised from open
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation requires an open session
    #[error("Bus session is not open")]
    NotOpen,

    /// The frame stream of a session can only be taken once
    #[error("Frame stream already taken for this session")]
    StreamTaken,

    /// The bus closed underneath the receive loop
    #[error("Bus closed: {0}")]
    BusClosed(String),

    /// Driver failure while opening the bus
    #[error("Driver error: {0}")]
    Driver(String),
}

impl SessionError {
    pub fn config(msg: impl Into<String>) -> Self {
        SessionError::Config(msg.into())
    }
}

/// Errors constructing or parsing a frame
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Identifier 0x{id:X} out of range for {} frame", id_width(.extended))]
    IdOutOfRange { id: u32, extended: bool },

    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("DLC {dlc} is invalid for {} frame", frame_type(.fd))]
    InvalidDlc { dlc: u8, fd: bool },

    #[error("FD frames require a session in FD mode")]
    FdNotAllowed,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid hex byte: {0}")]
    InvalidHex(String),
}

fn id_width(extended: &bool) -> &'static str {
    if *extended {
        "extended"
    } else {
        "standard"
    }
}

fn frame_type(fd: &bool) -> &'static str {
    if *fd {
        "an FD"
    } else {
        "a classic"
    }
}
