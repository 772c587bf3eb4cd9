//! Notification decoder.
//!
//! Turns raw payloads delivered by the transport into typed [`Event`]s.
//! Corrupted or unexpected frames decode to [`Event::Malformed`]; they are
//! never errors, because partial reads happen on this transport and a lost
//! acknowledgment simply runs into the pending timeout.
//!
//! ## Acknowledgment Formats
//!
//! ```text
//! Command-Ack (command channel):
//! +---------------+--------+--------+-----------+--------+
//! | Discriminator |  Code  | Result |    ...    | CRC16  |
//! +---------------+--------+--------+-----------+--------+
//! |   2 (LE) = 3  | 2 (LE) | 2 (LE) |  12 bytes | 2 (LE) |
//! +---------------+--------+--------+-----------+--------+
//!
//! Data-Ack (firmware channel):
//! +--------------+----------+-----------+--------+
//! | Sector index | Response |    ...    | CRC16  |
//! +--------------+----------+-----------+--------+
//! |    2 (LE)    |  2 (LE)  |  14 bytes | 2 (LE) |
//! +--------------+----------+-----------+--------+
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::protocol::command::{COMMAND_FRAME_LEN, CRC_OFFSET, CommandCode};
use crate::protocol::crc::checksum;
use crate::telemetry::{BATTERY_FRAME_LEN, BatteryStatus};
use crate::transport::Channel;

/// Discriminator leading every Command-Ack.
pub const COMMAND_ACK_DISCRIMINATOR: u16 = 3;

/// Minimum length of any acknowledgment frame.
pub const ACK_FRAME_LEN: usize = COMMAND_FRAME_LEN;

/// Data-Ack response codes.
pub mod response {
    /// Sector accepted.
    pub const OK: u16 = 0;
    /// Sector CRC did not match.
    pub const CRC_ERROR: u16 = 1;
    /// Unexpected sector index.
    pub const INDEX_ERROR: u16 = 2;
    /// Packet payload length was invalid.
    pub const PAYLOAD_ERROR: u16 = 3;
}

/// Command-Ack result codes.
pub mod result {
    /// Command accepted.
    pub const OK: u16 = 0;
    /// Command rejected.
    pub const NACK: u16 = 1;
    /// Image signature rejected.
    pub const SIGNATURE_ERROR: u16 = 3;
}

/// Reason carried by a negative acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NackReason {
    /// Receiver computed a different sector CRC.
    ChecksumMismatch,
    /// Receiver expected a different sector index.
    IndexMismatch,
    /// Receiver rejected a packet length.
    PayloadLength,
    /// Receiver rejected the image signature.
    Signature,
    /// Generic command rejection.
    Negative,
}

impl NackReason {
    /// Reason text shown to the user.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChecksumMismatch => "checksum mismatch",
            Self::IndexMismatch => "sequence index mismatch",
            Self::PayloadLength => "payload length invalid",
            Self::Signature => "signature error",
            Self::Negative => "negative acknowledgment",
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Positive acknowledgment.
    Ok,
    /// Negative acknowledgment.
    Rejected(NackReason),
}

impl AckStatus {
    /// Whether the acknowledgment is positive.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Acknowledgment of a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    /// Command being acknowledged.
    pub command: CommandCode,
    /// Outcome.
    pub status: AckStatus,
}

/// Acknowledgment of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAck {
    /// Sector index echoed by the receiver.
    pub sector_index: u16,
    /// Outcome.
    pub status: AckStatus,
}

impl DataAck {
    /// Whether this acknowledgment answers the sector `expected`.
    ///
    /// Index errors answer whatever sector is in flight, so they always match.
    pub fn answers(&self, expected: u16) -> bool {
        self.status == AckStatus::Rejected(NackReason::IndexMismatch)
            || self.sector_index == expected
    }
}

/// Why an inbound payload was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Payload shorter than the frame it should contain.
    TooShort(usize),
    /// Trailing CRC did not match the payload.
    BadCrc {
        /// CRC carried by the frame.
        received: u16,
        /// CRC computed over the frame.
        computed: u16,
    },
    /// Command-Ack without the expected discriminator.
    UnknownDiscriminator(u16),
    /// Command-Ack for an unknown command code.
    UnknownCommand(u16),
    /// Command-Ack with an unknown result code.
    UnknownResult(u16),
    /// Data-Ack with an unknown response code.
    UnknownResponse(u16),
}

/// A decoded notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Answer to a command frame.
    CommandAck(CommandAck),
    /// Answer to a sector's final packet.
    DataAck(DataAck),
    /// Battery telemetry sample.
    Telemetry(BatteryStatus),
    /// Discarded payload.
    Malformed(Malformed),
}

/// Decode a payload received on `channel`.
pub fn decode(channel: Channel, payload: &[u8]) -> Event {
    let event = match channel {
        Channel::Command => decode_command_ack(payload),
        Channel::Firmware => decode_data_ack(payload),
        Channel::Battery => match BatteryStatus::parse(payload) {
            Some(status) => Event::Telemetry(status),
            None => Event::Malformed(Malformed::TooShort(payload.len())),
        },
    };
    if let Event::Malformed(reason) = event {
        trace!(
            "Discarding {} byte notification on {channel}: {reason:?}",
            payload.len()
        );
    }
    event
}

fn verify(payload: &[u8]) -> Result<(), Malformed> {
    if payload.len() < ACK_FRAME_LEN {
        return Err(Malformed::TooShort(payload.len()));
    }
    let received = LittleEndian::read_u16(&payload[CRC_OFFSET..CRC_OFFSET + 2]);
    let computed = checksum(&payload[..CRC_OFFSET]);
    if received == computed {
        Ok(())
    } else {
        Err(Malformed::BadCrc { received, computed })
    }
}

/// Decode a Command-Ack payload.
pub fn decode_command_ack(payload: &[u8]) -> Event {
    if let Err(reason) = verify(payload) {
        return Event::Malformed(reason);
    }

    let discriminator = LittleEndian::read_u16(&payload[0..2]);
    if discriminator != COMMAND_ACK_DISCRIMINATOR {
        return Event::Malformed(Malformed::UnknownDiscriminator(discriminator));
    }

    let code = LittleEndian::read_u16(&payload[2..4]);
    let Some(command) = CommandCode::from_u16(code) else {
        return Event::Malformed(Malformed::UnknownCommand(code));
    };

    let status = match LittleEndian::read_u16(&payload[4..6]) {
        result::OK => AckStatus::Ok,
        result::NACK => AckStatus::Rejected(NackReason::Negative),
        result::SIGNATURE_ERROR => AckStatus::Rejected(NackReason::Signature),
        other => return Event::Malformed(Malformed::UnknownResult(other)),
    };

    Event::CommandAck(CommandAck { command, status })
}

/// Decode a Data-Ack payload.
pub fn decode_data_ack(payload: &[u8]) -> Event {
    if let Err(reason) = verify(payload) {
        return Event::Malformed(reason);
    }

    let sector_index = LittleEndian::read_u16(&payload[0..2]);
    let status = match LittleEndian::read_u16(&payload[2..4]) {
        response::OK => AckStatus::Ok,
        response::CRC_ERROR => AckStatus::Rejected(NackReason::ChecksumMismatch),
        response::INDEX_ERROR => AckStatus::Rejected(NackReason::IndexMismatch),
        response::PAYLOAD_ERROR => AckStatus::Rejected(NackReason::PayloadLength),
        other => return Event::Malformed(Malformed::UnknownResponse(other)),
    };

    Event::DataAck(DataAck {
        sector_index,
        status,
    })
}

/// Build a Command-Ack frame, as sent by the receiver.
pub fn encode_command_ack(command: u16, result: u16) -> [u8; ACK_FRAME_LEN] {
    let mut buf = [0u8; ACK_FRAME_LEN];
    LittleEndian::write_u16(&mut buf[0..2], COMMAND_ACK_DISCRIMINATOR);
    LittleEndian::write_u16(&mut buf[2..4], command);
    LittleEndian::write_u16(&mut buf[4..6], result);
    seal(buf)
}

/// Build a Data-Ack frame, as sent by the receiver.
pub fn encode_data_ack(sector_index: u16, response: u16) -> [u8; ACK_FRAME_LEN] {
    let mut buf = [0u8; ACK_FRAME_LEN];
    LittleEndian::write_u16(&mut buf[0..2], sector_index);
    LittleEndian::write_u16(&mut buf[2..4], response);
    seal(buf)
}

fn seal(mut buf: [u8; ACK_FRAME_LEN]) -> [u8; ACK_FRAME_LEN] {
    let crc = checksum(&buf[..CRC_OFFSET]);
    LittleEndian::write_u16(&mut buf[CRC_OFFSET..], crc);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_ack_ok() {
        let frame = encode_command_ack(1, result::OK);
        assert_eq!(
            decode(Channel::Command, &frame),
            Event::CommandAck(CommandAck {
                command: CommandCode::StartApp,
                status: AckStatus::Ok,
            })
        );
    }

    #[test]
    fn test_command_ack_nack_and_signature() {
        let nack = decode(Channel::Command, &encode_command_ack(2, result::NACK));
        assert_eq!(
            nack,
            Event::CommandAck(CommandAck {
                command: CommandCode::Stop,
                status: AckStatus::Rejected(NackReason::Negative),
            })
        );

        let sig = decode(
            Channel::Command,
            &encode_command_ack(4, result::SIGNATURE_ERROR),
        );
        assert_eq!(
            sig,
            Event::CommandAck(CommandAck {
                command: CommandCode::StartSpiffs,
                status: AckStatus::Rejected(NackReason::Signature),
            })
        );
    }

    #[test]
    fn test_command_ack_unknown_fields_are_discarded() {
        assert_eq!(
            decode(Channel::Command, &encode_command_ack(3, result::OK)),
            Event::Malformed(Malformed::UnknownCommand(3))
        );
        assert_eq!(
            decode(Channel::Command, &encode_command_ack(1, 2)),
            Event::Malformed(Malformed::UnknownResult(2))
        );

        let mut frame = encode_command_ack(1, 0);
        frame[0] = 4;
        let frame = seal(frame);
        assert_eq!(
            decode(Channel::Command, &frame),
            Event::Malformed(Malformed::UnknownDiscriminator(4))
        );
    }

    #[test]
    fn test_bad_crc_is_discarded() {
        let mut frame = encode_data_ack(0, response::OK);
        frame[19] ^= 0x01;
        assert!(matches!(
            decode(Channel::Firmware, &frame),
            Event::Malformed(Malformed::BadCrc { .. })
        ));
    }

    #[test]
    fn test_short_payload_is_discarded() {
        let frame = encode_data_ack(0, response::OK);
        assert_eq!(
            decode(Channel::Firmware, &frame[..19]),
            Event::Malformed(Malformed::TooShort(19))
        );
    }

    #[test]
    fn test_longer_payload_is_accepted() {
        let mut frame = encode_data_ack(9, response::OK).to_vec();
        frame.extend_from_slice(&[0xEE; 4]);
        assert_eq!(
            decode(Channel::Firmware, &frame),
            Event::DataAck(DataAck {
                sector_index: 9,
                status: AckStatus::Ok,
            })
        );
    }

    #[test]
    fn test_data_ack_response_codes() {
        let cases = [
            (response::CRC_ERROR, NackReason::ChecksumMismatch),
            (response::INDEX_ERROR, NackReason::IndexMismatch),
            (response::PAYLOAD_ERROR, NackReason::PayloadLength),
        ];
        for (code, reason) in cases {
            assert_eq!(
                decode(Channel::Firmware, &encode_data_ack(5, code)),
                Event::DataAck(DataAck {
                    sector_index: 5,
                    status: AckStatus::Rejected(reason),
                })
            );
        }
        assert_eq!(
            decode(Channel::Firmware, &encode_data_ack(5, 9)),
            Event::Malformed(Malformed::UnknownResponse(9))
        );
    }

    #[test]
    fn test_data_ack_answers_expected_index_only() {
        let ok = DataAck {
            sector_index: 3,
            status: AckStatus::Ok,
        };
        assert!(ok.answers(3));
        assert!(!ok.answers(4));

        let crc = DataAck {
            sector_index: 3,
            status: AckStatus::Rejected(NackReason::ChecksumMismatch),
        };
        assert!(!crc.answers(4));

        let index = DataAck {
            sector_index: 77,
            status: AckStatus::Rejected(NackReason::IndexMismatch),
        };
        assert!(index.answers(4));
    }

    #[test]
    fn test_battery_channel_decodes_telemetry() {
        let payload = [0x10, 0x0E, 0xF6, 0xFF, 0x50, 0x00, 0x31, 0x01];
        match decode(Channel::Battery, &payload) {
            Event::Telemetry(status) => {
                assert_eq!(status.voltage_mv, 3600);
                assert_eq!(status.average_current_ma, -10);
            },
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            decode(Channel::Battery, &payload[..BATTERY_FRAME_LEN - 1]),
            Event::Malformed(Malformed::TooShort(7))
        );
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(NackReason::ChecksumMismatch.to_string(), "checksum mismatch");
        assert_eq!(NackReason::IndexMismatch.to_string(), "sequence index mismatch");
        assert_eq!(NackReason::PayloadLength.to_string(), "payload length invalid");
        assert_eq!(NackReason::Signature.to_string(), "signature error");
        assert_eq!(NackReason::Negative.to_string(), "negative acknowledgment");
    }
}
