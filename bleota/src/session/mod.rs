//! Sender-side upload state machine.
//!
//! ## Flow
//!
//! ```text
//! Idle --START--> AwaitingStartAck --ack--> Transferring
//!
//! Transferring, for each sector:
//!     packets 0..n-1 (not acknowledged)
//!     final packet --> AwaitingPacketAck --ack--> next sector
//!
//! all sectors acknowledged --STOP--> AwaitingStopAck --ack--> Done
//!
//! any wait --NACK | timeout | cancel | transport error--> Failed
//! ```
//!
//! Exactly one acknowledgment is outstanding at any time. Decoded events
//! reach the session through a single-slot channel fed by the transport's
//! [`NotificationSink`]s; the session is the only owner of its counters.
//! While a sector is in flight the sinks pass only Data-Acks answering it,
//! and a rejection arriving before the final packet fails the sector at once.
//!
//! ## Example
//!
//! ```rust
//! use bleota::session::{CancelToken, UploadConfig, UploadSession};
//! use bleota::transport::loopback::LoopbackDevice;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> bleota::Result<()> {
//! let image = vec![0u8; 5000];
//! let mut device = LoopbackDevice::new();
//! let mut session = UploadSession::new(&mut device, UploadConfig::default());
//! let summary = session
//!     .upload(&image, |p| println!("{p}"), CancelToken::never())
//!     .await?;
//! assert_eq!(summary.packets, 11);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod progress;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use config::{DEFAULT_ACK_TIMEOUT, OtaKind, UploadConfig};
pub use progress::{Progress, UploadSummary};

use std::fmt;

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{Error, Result, Stage};
use crate::protocol::command::{CommandCode, CommandFrame};
use crate::protocol::notify::{AckStatus, Event};
use crate::protocol::packet::{Sector, sectors, validate_image};
use crate::transport::{Channel, NotificationSink, Transport, WriteMode, event_slot};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing sent yet.
    Idle,
    /// Start command sent.
    AwaitingStartAck,
    /// Writing data packets.
    Transferring,
    /// Final packet of a sector sent.
    AwaitingPacketAck,
    /// Stop command sent.
    AwaitingStopAck,
    /// Upload acknowledged end to end.
    Done,
    /// Upload abandoned.
    Failed,
}

impl UploadState {
    /// Whether the session can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingStartAck => "awaiting start ack",
            Self::Transferring => "transferring",
            Self::AwaitingPacketAck => "awaiting packet ack",
            Self::AwaitingStopAck => "awaiting stop ack",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Inbound side of a running session.
struct Link {
    events: mpsc::Receiver<Event>,
    awaited_sector: watch::Sender<Option<u16>>,
    cancel: CancelToken,
}

impl Link {
    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            trace!("Dropping stale {event:?}");
        }
    }
}

/// Uploads one image over a [`Transport`].
pub struct UploadSession<'t, T: Transport> {
    transport: &'t mut T,
    config: UploadConfig,
    state: UploadState,
    sector_index: u16,
    sequence: u8,
    offset: usize,
    packets_sent: usize,
    last_progress: Option<Progress>,
}

impl<'t, T: Transport> UploadSession<'t, T> {
    /// Create an idle session over `transport`.
    pub fn new(transport: &'t mut T, config: UploadConfig) -> Self {
        Self {
            transport,
            config,
            state: UploadState::Idle,
            sector_index: 0,
            sequence: 0,
            offset: 0,
            packets_sent: 0,
            last_progress: None,
        }
    }

    /// Current status.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Last progress snapshot, if any sector was acknowledged.
    pub fn progress(&self) -> Option<Progress> {
        self.last_progress
    }

    /// Index of the sector being sent, or last sent.
    pub fn sector_index(&self) -> u16 {
        self.sector_index
    }

    /// Sequence byte of the last packet written.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Upload `image`.
    ///
    /// `progress` is called once per acknowledged sector. On any failure the
    /// session moves to [`UploadState::Failed`] and no further frames are
    /// written; cancellation additionally skips the stop command.
    pub async fn upload<F>(
        &mut self,
        image: &[u8],
        mut progress: F,
        cancel: CancelToken,
    ) -> Result<UploadSummary>
    where
        F: FnMut(&Progress),
    {
        if self.state != UploadState::Idle {
            return Err(Error::Unsupported(format!(
                "upload session is already {}",
                self.state
            )));
        }

        let outcome = self.run(image, &mut progress, cancel).await;
        match &outcome {
            Ok(_) => self.state = UploadState::Done,
            Err(Error::Cancelled) => {
                info!("Upload cancelled while {}", self.state);
                self.state = UploadState::Failed;
            },
            Err(e) => {
                warn!("Upload failed while {}: {e}", self.state);
                self.state = UploadState::Failed;
            },
        }
        outcome
    }

    async fn run<F>(
        &mut self,
        image: &[u8],
        progress: &mut F,
        cancel: CancelToken,
    ) -> Result<UploadSummary>
    where
        F: FnMut(&Progress),
    {
        self.config.validate()?;
        validate_image(image)?;
        let total = image.len();

        let (tx, events) = event_slot();
        let (awaited_sector, gate) = watch::channel(None);
        self.transport
            .subscribe(NotificationSink::new(Channel::Command, tx.clone()).gated(gate.clone()))
            .await?;
        self.transport
            .subscribe(NotificationSink::new(Channel::Firmware, tx).gated(gate))
            .await?;
        let mut link = Link {
            events,
            awaited_sector,
            cancel,
        };

        let started = Instant::now();
        info!("Uploading {total} byte {} image", self.config.kind);

        self.state = UploadState::AwaitingStartAck;
        let start = CommandFrame::start(self.config.kind.start_code(), total as u32);
        self.command(&start, Stage::Start, &mut link).await?;
        info!("Receiver accepted {}", start.code().name());

        let mut acknowledged = 0;
        for sector in sectors(image) {
            self.send_sector(&sector, &mut link).await?;
            acknowledged += 1;
            self.offset = sector.offset + sector.len();

            let snapshot = Progress::new(self.offset, total, started.elapsed());
            debug!("Sector {} acknowledged, {snapshot}", sector.index);
            self.last_progress = Some(snapshot);
            progress(&snapshot);
        }

        self.state = UploadState::AwaitingStopAck;
        self.command(&CommandFrame::stop(), Stage::Stop, &mut link)
            .await?;

        let elapsed = started.elapsed();
        info!(
            "Upload complete: {total} bytes in {:.2}s",
            elapsed.as_secs_f64()
        );
        Ok(UploadSummary {
            bytes: total,
            sectors: acknowledged,
            packets: self.packets_sent,
            elapsed,
            progress: self
                .last_progress
                .unwrap_or_else(|| Progress::new(total, total, elapsed)),
        })
    }

    async fn command(&mut self, frame: &CommandFrame, stage: Stage, link: &mut Link) -> Result<()> {
        let bytes = frame.build();
        let mut attempt = 0;
        loop {
            link.ensure_not_cancelled()?;
            link.drain();
            debug!("Sending {} command", frame.code().name());
            trace!("TX command [{}]: {bytes:02X?}", bytes.len());
            self.transport
                .write(Channel::Command, &bytes, WriteMode::WithResponse)
                .await?;

            match self.await_ack(stage, link).await {
                Err(Error::Timeout(_)) if attempt < self.config.command_retries => {
                    attempt += 1;
                    warn!(
                        "No acknowledgment for {stage}, resending (retry {attempt}/{})",
                        self.config.command_retries
                    );
                },
                other => return other,
            }
        }
    }

    async fn send_sector(&mut self, sector: &Sector<'_>, link: &mut Link) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.try_send_sector(sector, link).await {
                Err(Error::Timeout(stage)) if attempt < self.config.sector_retries => {
                    attempt += 1;
                    warn!(
                        "No acknowledgment for {stage}, resending sector (retry {attempt}/{})",
                        self.config.sector_retries
                    );
                },
                other => return other,
            }
        }
    }

    async fn try_send_sector(&mut self, sector: &Sector<'_>, link: &mut Link) -> Result<()> {
        self.state = UploadState::Transferring;
        self.sector_index = sector.index;
        link.drain();
        link.awaited_sector.send_replace(Some(sector.index));

        let outcome = match self.write_sector(sector, link).await {
            Ok(()) => self.await_ack(Stage::Sector(sector.index), link).await,
            Err(e) => Err(e),
        };
        link.awaited_sector.send_replace(None);
        outcome
    }

    async fn write_sector(&mut self, sector: &Sector<'_>, link: &mut Link) -> Result<()> {
        let stage = Stage::Sector(sector.index);
        let start_code = self.config.kind.start_code();

        for packet in sector.packets(self.config.packet_size) {
            link.ensure_not_cancelled()?;
            self.sequence = packet.sequence;
            if packet.is_last() {
                self.state = UploadState::AwaitingPacketAck;
            }

            let frame = packet.encode();
            trace!(
                "TX sector {} seq 0x{:02X} [{}]",
                packet.sector_index,
                packet.sequence,
                frame.len()
            );
            self.transport
                .write(Channel::Firmware, &frame, WriteMode::WithoutResponse)
                .await?;
            self.packets_sent += 1;

            if packet.is_last() {
                break;
            }
            // The receiver may reject the sector before its final packet.
            if let Ok(event) = link.events.try_recv() {
                match settle(stage, start_code, event) {
                    Some(AckStatus::Rejected(reason)) => {
                        warn!(
                            "Receiver rejected {stage} after packet 0x{:02X}: {reason}",
                            packet.sequence
                        );
                        return Err(Error::Nack(reason));
                    },
                    _ => trace!("Ignoring early {event:?} during {stage}"),
                }
            }
        }
        Ok(())
    }

    /// Wait for the acknowledgment of `stage`, the timeout, or cancellation.
    async fn await_ack(&self, stage: Stage, link: &mut Link) -> Result<()> {
        let start_code = self.config.kind.start_code();
        let timeout = self.config.ack_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                () = link.cancel.cancelled() => return Err(Error::Cancelled),
                event = link.events.recv() => event.ok_or_else(|| {
                    Error::Transport("notification channel closed".into())
                })?,
                () = &mut deadline => {
                    warn!("No acknowledgment for {stage} within {} ms", timeout.as_millis());
                    return Err(Error::Timeout(stage));
                },
            };

            match settle(stage, start_code, event) {
                Some(AckStatus::Ok) => return Ok(()),
                Some(AckStatus::Rejected(reason)) => {
                    warn!("Receiver rejected {stage}: {reason}");
                    return Err(Error::Nack(reason));
                },
                None => trace!("Ignoring {event:?} while awaiting {stage}"),
            }
        }
    }
}

/// Status carried by `event` if it answers `stage`.
fn settle(stage: Stage, start_code: CommandCode, event: Event) -> Option<AckStatus> {
    match (stage, event) {
        (Stage::Start, Event::CommandAck(ack)) if ack.command == start_code => Some(ack.status),
        (Stage::Stop, Event::CommandAck(ack)) if ack.command == CommandCode::Stop => {
            Some(ack.status)
        },
        (Stage::Sector(index), Event::DataAck(ack)) if ack.answers(index) => Some(ack.status),
        _ => None,
    }
}
