//! Error types for bleota.

use std::fmt;
use std::io;

use thiserror::Error;

pub use crate::protocol::notify::NackReason;

/// Result type for bleota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol step an acknowledgment was awaited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// START_APP / START_SPIFFS handshake.
    Start,
    /// Final packet of a sector.
    Sector(u16),
    /// STOP handshake.
    Stop,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start command"),
            Self::Sector(index) => write!(f, "sector {index}"),
            Self::Stop => write!(f, "stop command"),
        }
    }
}

/// User-visible outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Completed.
    Success,
    /// Failed.
    Failure,
    /// Neither: the user stopped it.
    Neutral,
}

/// Error type for bleota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image files, local resources).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bluetooth stack error.
    #[cfg(feature = "native")]
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Transport refused or failed a write.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The receiver rejected a command or sector.
    #[error("{0}")]
    Nack(NackReason),

    /// No acknowledgment arrived in time.
    #[error("response timeout")]
    Timeout(Stage),

    /// The user cancelled the upload.
    #[error("Upload cancelled")]
    Cancelled,

    /// Image cannot be transferred.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Invalid upload configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No matching device was found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation not supported by the device or platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Map this error onto the user-visible tri-state.
    pub fn status(&self) -> StatusKind {
        match self {
            Self::Cancelled => StatusKind::Neutral,
            _ => StatusKind::Failure,
        }
    }

    /// Whether the remote device answered negatively.
    pub fn is_nack(&self) -> bool {
        matches!(self, Self::Nack(_))
    }
}
