//! Upload configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::command::CommandCode;
use crate::protocol::packet::{MAX_PACKET_SIZE, validate_packet_size};

/// Time allowed for each acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Kind of image being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OtaKind {
    /// Application firmware.
    #[default]
    App,
    /// SPIFFS filesystem image.
    Spiffs,
}

impl OtaKind {
    /// Command that opens an upload of this kind.
    pub fn start_code(self) -> CommandCode {
        match self {
            Self::App => CommandCode::StartApp,
            Self::Spiffs => CommandCode::StartSpiffs,
        }
    }
}

impl fmt::Display for OtaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Spiffs => write!(f, "spiffs"),
        }
    }
}

impl FromStr for OtaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "app" | "application" | "firmware" => Ok(Self::App),
            "spiffs" | "fs" | "filesystem" => Ok(Self::Spiffs),
            other => Err(Error::InvalidConfig(format!("unknown image kind '{other}'"))),
        }
    }
}

/// Tunables of an upload session.
///
/// The defaults reproduce the reference receiver's expectations: 510-byte
/// packets, a 5000 ms acknowledgment timeout and no retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Image kind, selects the start command.
    pub kind: OtaKind,
    /// Wire size cap of a data packet, header included.
    pub packet_size: usize,
    /// Time allowed for each acknowledgment.
    pub ack_timeout: Duration,
    /// Extra attempts for a command frame whose acknowledgment timed out.
    pub command_retries: u32,
    /// Extra attempts for a sector whose acknowledgment timed out.
    pub sector_retries: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            kind: OtaKind::App,
            packet_size: MAX_PACKET_SIZE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            command_retries: 0,
            sector_retries: 0,
        }
    }
}

impl UploadConfig {
    /// Set the image kind.
    #[must_use]
    pub fn with_kind(mut self, kind: OtaKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the packet size cap.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the acknowledgment timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the retry budget for commands.
    #[must_use]
    pub fn with_command_retries(mut self, retries: u32) -> Self {
        self.command_retries = retries;
        self
    }

    /// Set the retry budget for sectors.
    #[must_use]
    pub fn with_sector_retries(mut self, retries: u32) -> Self {
        self.sector_retries = retries;
        self
    }

    /// Check the configuration before a session starts.
    pub fn validate(&self) -> Result<()> {
        validate_packet_size(self.packet_size)?;
        if self.ack_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "acknowledgment timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
