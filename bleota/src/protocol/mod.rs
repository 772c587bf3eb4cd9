//! OTA wire protocol: checksum, outbound framing and inbound decoding.

pub mod command;
pub mod crc;
pub mod notify;
pub mod packet;

// Re-export common types
pub use command::{CommandCode, CommandFrame};
pub use crc::{checksum, crc16};
pub use notify::{AckStatus, CommandAck, DataAck, Event, Malformed, NackReason, decode};
pub use packet::{DataPacket, Sector, TransferPlan, plan, sectors};
