//! Error types for the P9813 driver

use thiserror::Error;

/// Errors surfaced by the bus handle and the device session
#[derive(Debug, Error)]
pub enum P9813Error {
    /// The spidev file is missing, inaccessible or already claimed
    #[error("SPI device {path} unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// Requested mode, bit order, frequency or chain length was rejected
    #[error("Invalid SPI configuration: {0}")]
    ConfigurationError(String),

    /// Transfer-level failure on the bus
    #[error("SPI transfer failed: {0}")]
    Io(#[source] std::io::Error),

    /// Caller-supplied value out of range for the device
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Operation attempted after the session was closed
    #[error("Session is closed")]
    SessionClosed,
}

impl P9813Error {
    /// Whether the entry point may reasonably retry the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(self, P9813Error::Io(_))
    }
}

/// Result type for P9813 operations
pub type Result<T> = std::result::Result<T, P9813Error>;
