//! OTA command frames (start / stop handshake).
//!
//! ## Frame Format
//!
//! Every command is a fixed 20-byte frame written to the command channel:
//!
//! ```text
//! +------+----------+--------------+------------+--------+
//! | Code | Reserved | Payload size |  Reserved  | CRC16  |
//! +------+----------+--------------+------------+--------+
//! |  1   |    1     |   4 (LE)     |     12     | 2 (LE) |
//! +------+----------+--------------+------------+--------+
//! ```
//!
//! The CRC covers bytes `0..18` and is seeded with zero.

use crate::protocol::crc::checksum;
use byteorder::{ByteOrder, LittleEndian};

/// Length of a command frame on the wire.
pub const COMMAND_FRAME_LEN: usize = 20;

/// Offset of the trailing CRC in command frames and acknowledgments.
pub const CRC_OFFSET: usize = 18;

/// Command codes understood by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Begin an application image upload (0x01).
    StartApp = 0x01,
    /// Finish the upload (0x02).
    Stop = 0x02,
    /// Begin a SPIFFS filesystem image upload (0x04).
    StartSpiffs = 0x04,
}

impl CommandCode {
    /// Decode a command code echoed in an acknowledgment.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::StartApp),
            0x02 => Some(Self::Stop),
            0x04 => Some(Self::StartSpiffs),
            _ => None,
        }
    }

    /// Short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::StartApp => "START_APP",
            Self::Stop => "STOP",
            Self::StartSpiffs => "START_SPIFFS",
        }
    }
}

/// Command frame builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    code: CommandCode,
    payload_size: Option<u32>,
}

impl CommandFrame {
    /// Create a frame without a payload size.
    pub fn new(code: CommandCode) -> Self {
        Self {
            code,
            payload_size: None,
        }
    }

    /// Build a start frame announcing `image_len` bytes.
    pub fn start(code: CommandCode, image_len: u32) -> Self {
        Self {
            code,
            payload_size: Some(image_len),
        }
    }

    /// Build the stop frame.
    pub fn stop() -> Self {
        Self::new(CommandCode::Stop)
    }

    /// Get the command code.
    pub fn code(&self) -> CommandCode {
        self.code
    }

    /// Encode the frame.
    pub fn build(&self) -> [u8; COMMAND_FRAME_LEN] {
        let mut buf = [0u8; COMMAND_FRAME_LEN];
        buf[0] = self.code as u8;
        if let Some(size) = self.payload_size {
            LittleEndian::write_u32(&mut buf[2..6], size);
        }
        let crc = checksum(&buf[..CRC_OFFSET]);
        LittleEndian::write_u16(&mut buf[CRC_OFFSET..], crc);
        buf
    }
}

/// Check the trailing CRC of a 20-byte (or longer) control frame.
///
/// Returns `false` for frames shorter than [`COMMAND_FRAME_LEN`].
pub fn has_valid_crc(frame: &[u8]) -> bool {
    if frame.len() < COMMAND_FRAME_LEN {
        return false;
    }
    LittleEndian::read_u16(&frame[CRC_OFFSET..COMMAND_FRAME_LEN]) == checksum(&frame[..CRC_OFFSET])
}
