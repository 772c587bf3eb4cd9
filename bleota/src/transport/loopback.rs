//! In-process receiver that speaks the OTA protocol.
//!
//! [`LoopbackDevice`] implements [`Transport`] by playing the device side:
//! it validates command frames, reassembles sectors, checks sector CRCs and
//! sector order, and answers with Command-Ack / Data-Ack notifications. It
//! backs the CLI's dry-run mode and the session tests.
//!
//! Faults can be scripted per stage to exercise failure handling:
//!
//! ```rust
//! use bleota::transport::loopback::{Fault, LoopbackDevice, Target};
//!
//! let device = LoopbackDevice::new()
//!     .with_fault(Target::Sector(1), Fault::Silent)
//!     .with_fault(Target::Stop, Fault::Reject(1));
//! assert!(device.received().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::command::{CommandCode, has_valid_crc};
use crate::protocol::crc::crc16;
use crate::protocol::notify::{encode_command_ack, encode_data_ack, response, result};
use crate::protocol::packet::{
    LAST_PACKET_MARKER, PACKET_HEADER_LEN, SECTOR_CRC_LEN, SECTOR_SIZE,
};
use crate::transport::{Channel, NotificationSink, Transport, WriteMode};

/// Stage a fault is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The START_APP / START_SPIFFS command.
    Start,
    /// The final packet of the given sector.
    Sector(u16),
    /// The STOP command.
    Stop,
}

/// Scripted misbehaviour. Each injected fault is consumed by one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Do not answer at all.
    Silent,
    /// Answer with this result (commands) or response (sectors) code.
    Reject(u16),
    /// Answer with a frame whose CRC is broken, then stay silent.
    CorruptAck,
    /// Send a positive Data-Ack for another sector index, then answer normally.
    StrayAck(u16),
}

/// One frame written by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFrame {
    /// Channel written to.
    pub channel: Channel,
    /// Frame bytes.
    pub data: Vec<u8>,
    /// Requested write mode.
    pub mode: WriteMode,
}

/// Simulated OTA receiver.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    sinks: HashMap<Channel, NotificationSink>,
    faults: HashMap<Target, VecDeque<Fault>>,
    latency: Option<Duration>,
    fail_write_at: Option<usize>,
    writes: Vec<WrittenFrame>,
    announced: Option<u32>,
    last_start: Option<CommandCode>,
    expected_sector: u16,
    sector: Vec<u8>,
    received: Vec<u8>,
    completed: bool,
}

impl LoopbackDevice {
    /// Create a well-behaved receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for `target`.
    #[must_use]
    pub fn with_fault(mut self, target: Target, fault: Fault) -> Self {
        self.faults.entry(target).or_default().push_back(fault);
        self
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the `n`-th write (zero-based) fail at the transport level.
    #[must_use]
    pub fn with_write_failure(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    /// Every frame written so far.
    pub fn writes(&self) -> &[WrittenFrame] {
        &self.writes
    }

    /// Frames written to `channel`.
    pub fn writes_on(&self, channel: Channel) -> impl Iterator<Item = &WrittenFrame> {
        self.writes.iter().filter(move |w| w.channel == channel)
    }

    /// Bytes of every sector accepted so far.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Whether a STOP command completed the transfer.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn take_fault(&mut self, target: Target) -> Option<Fault> {
        self.faults.get_mut(&target).and_then(VecDeque::pop_front)
    }

    fn notify(&self, channel: Channel, frame: Vec<u8>) {
        let Some(sink) = self.sinks.get(&channel).cloned() else {
            trace!("Loopback: nobody subscribed to {channel}");
            return;
        };
        match self.latency {
            Some(latency) => {
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    sink.deliver(&frame);
                });
            },
            None => {
                sink.deliver(&frame);
            },
        }
    }

    fn answer(&self, channel: Channel, target: Target, code: u16, fault: Option<Fault>) {
        let build = |code: u16| match target {
            Target::Sector(index) => encode_data_ack(index, code).to_vec(),
            Target::Start => {
                let start = self.last_start.unwrap_or(CommandCode::StartApp);
                encode_command_ack(start as u16, code).to_vec()
            },
            Target::Stop => encode_command_ack(CommandCode::Stop as u16, code).to_vec(),
        };

        match fault {
            None => self.notify(channel, build(code)),
            Some(Fault::Silent) => debug!("Loopback: staying silent on {target:?}"),
            Some(Fault::Reject(code)) => self.notify(channel, build(code)),
            Some(Fault::CorruptAck) => {
                let mut frame = build(code);
                frame[19] ^= 0xFF;
                self.notify(channel, frame);
            },
            Some(Fault::StrayAck(index)) => {
                self.notify(channel, encode_data_ack(index, response::OK).to_vec());
                self.notify(channel, build(code));
            },
        }
    }

    fn on_command(&mut self, frame: &[u8]) {
        if !has_valid_crc(frame) {
            debug!("Loopback: command frame with bad CRC ignored");
            return;
        }
        let Some(code) = CommandCode::from_u16(u16::from(frame[0])) else {
            debug!("Loopback: unknown command 0x{:02X}", frame[0]);
            return;
        };

        match code {
            CommandCode::StartApp | CommandCode::StartSpiffs => {
                let size = LittleEndian::read_u32(&frame[2..6]);
                debug!("Loopback: {} for {size} bytes", code.name());
                self.announced = Some(size);
                self.expected_sector = 0;
                self.sector.clear();
                self.received.clear();
                self.completed = false;
                self.last_start = Some(code);
                let fault = self.take_fault(Target::Start);
                self.answer(Channel::Command, Target::Start, result::OK, fault);
            },
            CommandCode::Stop => {
                let complete = self
                    .announced
                    .is_some_and(|size| size as usize == self.received.len());
                let fault = self.take_fault(Target::Stop);
                self.completed = complete && fault.is_none();
                let code = if complete { result::OK } else { result::NACK };
                self.answer(Channel::Command, Target::Stop, code, fault);
            },
        }
    }

    fn on_packet(&mut self, packet: &[u8]) {
        if packet.len() <= PACKET_HEADER_LEN {
            debug!("Loopback: runt packet of {} bytes", packet.len());
            return;
        }
        let index = LittleEndian::read_u16(&packet[0..2]);
        let sequence = packet[2];

        if sequence != LAST_PACKET_MARKER {
            self.sector.extend_from_slice(&packet[PACKET_HEADER_LEN..]);
            return;
        }

        if packet.len() < PACKET_HEADER_LEN + SECTOR_CRC_LEN {
            self.sector.clear();
            self.answer(Channel::Firmware, Target::Sector(index), response::PAYLOAD_ERROR, None);
            return;
        }
        let body_end = packet.len() - SECTOR_CRC_LEN;
        self.sector
            .extend_from_slice(&packet[PACKET_HEADER_LEN..body_end]);
        let sent_crc = LittleEndian::read_u16(&packet[body_end..]);
        let sector = std::mem::take(&mut self.sector);

        let code = if index != self.expected_sector {
            response::INDEX_ERROR
        } else if sector.len() > SECTOR_SIZE {
            response::PAYLOAD_ERROR
        } else if crc16(0, &sector) != sent_crc {
            response::CRC_ERROR
        } else {
            response::OK
        };

        let fault = self.take_fault(Target::Sector(index));
        if code == response::OK && matches!(fault, None | Some(Fault::StrayAck(_))) {
            self.received.extend_from_slice(&sector);
            self.expected_sector = self.expected_sector.wrapping_add(1);
        }
        trace!("Loopback: sector {index} -> response {code}");
        self.answer(Channel::Firmware, Target::Sector(index), code, fault);
    }
}

impl Transport for LoopbackDevice {
    async fn write(&mut self, channel: Channel, data: &[u8], mode: WriteMode) -> Result<()> {
        if self.fail_write_at == Some(self.writes.len()) {
            return Err(Error::Transport("loopback write failed".into()));
        }
        self.writes.push(WrittenFrame {
            channel,
            data: data.to_vec(),
            mode,
        });

        match channel {
            Channel::Command => self.on_command(data),
            Channel::Firmware => self.on_packet(data),
            Channel::Battery => {},
        }
        Ok(())
    }

    async fn subscribe(&mut self, sink: NotificationSink) -> Result<()> {
        self.sinks.insert(sink.channel(), sink);
        Ok(())
    }
}
