//! # bleota
//!
//! A library for uploading firmware to devices over Bluetooth Low Energy.
//!
//! This crate implements the sender side of a sector-based OTA protocol:
//!
//! - CRC-16/CCITT checksum engine
//! - Command frames and sector/packet framing
//! - Notification decoding (command and data acknowledgments, battery telemetry)
//! - An upload state machine with one outstanding acknowledgment, a per-ack
//!   timeout and cooperative cancellation
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `btleplug` crate
//! - **Loopback**: an in-process receiver for dry runs and tests
//!
//! ## Features
//!
//! - `native` (default): Native BLE support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use bleota::{CancelToken, UploadConfig, UploadSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut device =
//!             bleota::transport::native::BleTransport::connect(None, Duration::from_secs(5))
//!                 .await?;
//!
//!         let mut session = UploadSession::new(&mut device, UploadConfig::default());
//!         session
//!             .upload(&image, |p| println!("{p}"), CancelToken::never())
//!             .await?;
//!
//!         device.disconnect().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::native::{BleTransport, scan};
pub use {
    device::{DeviceInfo, DiscoveredDevice},
    error::{Error, Result, Stage, StatusKind},
    protocol::{
        CommandCode, CommandFrame, Event, NackReason, TransferPlan, checksum, crc16, plan,
    },
    session::{
        CancelHandle, CancelToken, OtaKind, Progress, UploadConfig, UploadSession, UploadState,
        UploadSummary, cancel_pair,
    },
    telemetry::{BatteryStatus, ChargeState},
    transport::{Channel, NotificationSink, Transport, WriteMode, loopback::LoopbackDevice},
};
