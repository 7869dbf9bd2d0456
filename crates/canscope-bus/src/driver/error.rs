//! Driver layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("Bus closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

impl DriverError {
    /// Errors after which the bus handle is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Closed)
    }
}
