//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod crc;
pub(crate) mod info;
pub(crate) mod monitor;
pub(crate) mod plan;
pub(crate) mod scan;
pub(crate) mod upload;

use std::time::Duration;

use anyhow::Result;
use bleota::BleTransport;
use console::style;

use crate::Cli;
use crate::config::Config;
use crate::select::{DeviceOptions, ask_remember_device, select_device};

/// Scan duration from the command line or the config.
pub(crate) fn scan_duration(cli: &Cli, config: &Config) -> Duration {
    cli.scan_secs
        .map_or_else(|| config.scan_duration(), Duration::from_secs)
}

/// Scan, pick a device and connect to it.
pub(crate) async fn connect(cli: &Cli, config: &mut Config) -> Result<BleTransport> {
    let scan_duration = scan_duration(cli, config);
    let options = DeviceOptions {
        target: cli
            .device
            .clone()
            .or_else(|| config.device_target().map(str::to_string)),
        non_interactive: cli.non_interactive,
    };

    if !cli.quiet {
        eprintln!(
            "{} Scanning for {}s...",
            style("🔍").cyan(),
            scan_duration.as_secs()
        );
    }
    let devices = bleota::scan(scan_duration).await?;
    let selected = select_device(devices, &options)?;
    if selected.prompted && !cli.non_interactive {
        ask_remember_device(&selected.device, config)?;
    }

    if !cli.quiet {
        eprintln!(
            "{} Connecting to {}",
            style("🔗").cyan(),
            selected.device
        );
    }
    let transport = BleTransport::connect(Some(&selected.device.address), scan_duration).await?;
    Ok(transport)
}
