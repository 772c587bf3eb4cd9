//! Transport abstraction for the OTA service.
//!
//! The upload session never talks to a radio directly. It writes frames to a
//! logical [`Channel`] through the [`Transport`] trait and receives decoded
//! acknowledgments through a [`NotificationSink`] it hands to the transport.
//!
//! ```text
//! +------------------+        write(channel, bytes)        +-------------+
//! |  UploadSession   | ----------------------------------> |  Transport  |
//! |                  | <---- single-slot event channel --- |             |
//! +------------------+    NotificationSink::deliver(bytes) +------+------+
//!                                                                 |
//!                                          +----------------------+------+
//!                                          |                             |
//!                                  +-------+--------+          +---------+------+
//!                                  |  BleTransport  |          | LoopbackDevice |
//!                                  |   (btleplug)   |          |  (in-process)  |
//!                                  +----------------+          +----------------+
//! ```
//!
//! Implementations exist for:
//!
//! - **Native platforms** via `btleplug` (`native` feature)
//! - An in-process loopback receiver used for dry runs and tests

pub mod loopback;

#[cfg(feature = "native")]
pub mod native;

use std::fmt;
use std::future::Future;

use log::trace;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::protocol::notify::{Event, decode};

/// Build a 128-bit UUID from a 16-bit Bluetooth SIG short UUID.
pub const fn ble_uuid(short: u16) -> u128 {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
    BASE | ((short as u128) << 96)
}

/// OTA service.
pub const OTA_SERVICE_UUID: u128 = ble_uuid(0x8018);
/// Firmware data characteristic (data packets, Data-Acks).
pub const FIRMWARE_CHAR_UUID: u128 = ble_uuid(0x8020);
/// Command characteristic (command frames, Command-Acks).
pub const COMMAND_CHAR_UUID: u128 = ble_uuid(0x8022);
/// Battery telemetry characteristic.
pub const BATTERY_CHAR_UUID: u128 = ble_uuid(0x8024);

/// Device Information Service UUIDs.
pub mod dis {
    use super::ble_uuid;

    /// Device Information Service.
    pub const SERVICE_UUID: u128 = ble_uuid(0x180A);
    /// Model number string.
    pub const MODEL_NUMBER_UUID: u128 = ble_uuid(0x2A24);
    /// Serial number string.
    pub const SERIAL_NUMBER_UUID: u128 = ble_uuid(0x2A25);
    /// Firmware revision string.
    pub const FIRMWARE_REVISION_UUID: u128 = ble_uuid(0x2A26);
    /// Hardware revision string.
    pub const HARDWARE_REVISION_UUID: u128 = ble_uuid(0x2A27);
    /// Manufacturer name string.
    pub const MANUFACTURER_NAME_UUID: u128 = ble_uuid(0x2A29);
}

/// Logical channels of the OTA service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Start/stop handshake.
    Command,
    /// Bulk data packets.
    Firmware,
    /// Battery telemetry.
    Battery,
}

impl Channel {
    /// Characteristic UUID backing this channel.
    pub const fn uuid(self) -> u128 {
        match self {
            Self::Command => COMMAND_CHAR_UUID,
            Self::Firmware => FIRMWARE_CHAR_UUID,
            Self::Battery => BATTERY_CHAR_UUID,
        }
    }

    /// Channel backed by the characteristic `uuid`, if any.
    pub fn from_uuid(uuid: u128) -> Option<Self> {
        [Self::Command, Self::Firmware, Self::Battery]
            .into_iter()
            .find(|c| c.uuid() == uuid)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Firmware => write!(f, "firmware"),
            Self::Battery => write!(f, "battery"),
        }
    }
}

/// Write flavour requested from the transport.
///
/// Acknowledgment is handled at the protocol level in both cases; the
/// transport-level response only reports that the write was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write request, answered by the peer's stack.
    WithResponse,
    /// Write command, not answered.
    WithoutResponse,
}

/// Inbound delivery path for one channel.
///
/// The transport calls [`deliver`](Self::deliver) with every raw payload, in
/// arrival order. The sink decodes it and hands the event to whoever holds
/// the receiving end. Malformed payloads are dropped here; if the receiving
/// slot is still occupied the new event is dropped as stale.
///
/// A sink may be gated on the sector currently in flight: Data-Acks that do
/// not answer it are dropped before they reach the slot, and so are
/// Command-Acks while any sector is in flight.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    channel: Channel,
    events: mpsc::Sender<Event>,
    expected: Option<watch::Receiver<Option<u16>>>,
}

impl NotificationSink {
    /// Create a sink decoding payloads of `channel` into `events`.
    pub fn new(channel: Channel, events: mpsc::Sender<Event>) -> Self {
        Self {
            channel,
            events,
            expected: None,
        }
    }

    /// Gate on the sector index published on `expected`.
    ///
    /// While it holds `Some(index)` only Data-Acks answering `index` pass and
    /// Command-Acks are dropped. While it holds `None` every Data-Ack is
    /// dropped.
    #[must_use]
    pub fn gated(mut self, expected: watch::Receiver<Option<u16>>) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Channel this sink decodes.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Whether the receiving end is gone.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Decode and forward one payload. Returns `true` if an event was handed off.
    pub fn deliver(&self, payload: &[u8]) -> bool {
        trace!("RX {} [{}]: {payload:02X?}", self.channel, payload.len());
        let event = decode(self.channel, payload);
        match (&event, &self.expected) {
            (Event::Malformed(_), _) => return false,
            (Event::DataAck(ack), Some(expected)) => {
                let awaited = *expected.borrow();
                if !awaited.is_some_and(|index| ack.answers(index)) {
                    trace!(
                        "Ignoring Data-Ack for sector {} (awaiting {awaited:?})",
                        ack.sector_index
                    );
                    return false;
                }
            },
            (Event::CommandAck(ack), Some(expected)) => {
                let awaited = *expected.borrow();
                if let Some(index) = awaited {
                    trace!(
                        "Ignoring {} Command-Ack while sector {index} is in flight",
                        ack.command.name()
                    );
                    return false;
                }
            },
            _ => {},
        }
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                trace!("Event slot busy, dropping {event:?}");
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Create the single-slot rendezvous between a transport and a session.
pub fn event_slot() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(1)
}

/// Send/receive boundary the upload session depends on.
pub trait Transport: Send {
    /// Write `data` to `channel`.
    fn write(
        &mut self,
        channel: Channel,
        data: &[u8],
        mode: WriteMode,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Route notifications of `sink.channel()` to `sink`, replacing any
    /// previous sink for that channel.
    fn subscribe(&mut self, sink: NotificationSink) -> impl Future<Output = Result<()>> + Send;
}

impl<T: Transport> Transport for &mut T {
    fn write(
        &mut self,
        channel: Channel,
        data: &[u8],
        mode: WriteMode,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).write(channel, data, mode)
    }

    fn subscribe(&mut self, sink: NotificationSink) -> impl Future<Output = Result<()>> + Send {
        (**self).subscribe(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::CommandCode;
    use crate::protocol::notify::{encode_command_ack, encode_data_ack, response, result};

    #[test]
    fn test_ble_uuid_expansion() {
        assert_eq!(OTA_SERVICE_UUID, 0x0000_8018_0000_1000_8000_0080_5F9B_34FB);
        assert_eq!(dis::SERVICE_UUID, 0x0000_180A_0000_1000_8000_0080_5F9B_34FB);
    }

    #[test]
    fn test_channel_uuid_roundtrip() {
        for channel in [Channel::Command, Channel::Firmware, Channel::Battery] {
            assert_eq!(Channel::from_uuid(channel.uuid()), Some(channel));
        }
        assert_eq!(Channel::from_uuid(OTA_SERVICE_UUID), None);
    }

    #[test]
    fn test_sink_drops_malformed_and_stale_events() {
        let (tx, mut rx) = event_slot();
        let sink = NotificationSink::new(Channel::Firmware, tx);

        assert!(!sink.deliver(&[0u8; 5]));
        assert!(sink.deliver(&encode_data_ack(0, response::OK)));
        // Slot still holds the first event.
        assert!(!sink.deliver(&encode_data_ack(1, response::OK)));

        assert!(matches!(rx.try_recv(), Ok(Event::DataAck(ack)) if ack.sector_index == 0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gated_sink_filters_by_awaited_index() {
        let (tx, mut rx) = event_slot();
        let (expected_tx, expected_rx) = watch::channel(None);
        let sink = NotificationSink::new(Channel::Firmware, tx).gated(expected_rx);

        // Nothing awaited yet.
        assert!(!sink.deliver(&encode_data_ack(0, response::OK)));

        expected_tx.send_replace(Some(4));
        assert!(!sink.deliver(&encode_data_ack(3, response::OK)));
        assert!(sink.deliver(&encode_data_ack(4, response::CRC_ERROR)));
        assert!(matches!(rx.try_recv(), Ok(Event::DataAck(ack)) if ack.sector_index == 4));

        // Index errors answer whatever is in flight.
        assert!(sink.deliver(&encode_data_ack(9, response::INDEX_ERROR)));
    }

    #[test]
    fn test_gated_sink_holds_back_command_acks_during_a_sector() {
        let (tx, mut rx) = event_slot();
        let (expected_tx, expected_rx) = watch::channel(None);
        let sink = NotificationSink::new(Channel::Command, tx).gated(expected_rx);
        let late_start = encode_command_ack(CommandCode::StartApp as u16, result::OK);

        expected_tx.send_replace(Some(0));
        assert!(!sink.deliver(&late_start));
        assert!(rx.try_recv().is_err());

        expected_tx.send_replace(None);
        assert!(sink.deliver(&late_start));
        assert!(matches!(rx.try_recv(), Ok(Event::CommandAck(_))));
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (tx, rx) = event_slot();
        let sink = NotificationSink::new(Channel::Command, tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(&encode_command_ack(1, 0)));
    }
}
