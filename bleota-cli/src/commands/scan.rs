//! Scan command implementation.

use anyhow::Result;
use bleota::DiscoveredDevice;
use console::style;

use crate::Cli;
use crate::config::Config;

fn print_devices(devices: &[DiscoveredDevice]) {
    eprintln!("{}", style("Nearby devices").bold().underlined());

    if devices.is_empty() {
        eprintln!("  {}", style("No devices found").dim());
        return;
    }

    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r:>4} dBm"))
            .unwrap_or_else(|| "   ? dBm".to_string());
        let marker = if device.is_ota {
            format!(" {}", style("[OTA]").yellow())
        } else {
            String::new()
        };
        println!("  {rssi}  {}  {}{marker}", device.address, device.name);
    }
}

/// Scan command implementation.
pub(crate) async fn cmd_scan(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let duration = super::scan_duration(cli, config);
    if !cli.quiet && !json {
        eprintln!(
            "{} Scanning for {}s...",
            style("🔍").cyan(),
            duration.as_secs()
        );
    }

    let devices = bleota::scan(duration).await?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "devices": devices,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_devices(&devices);
    Ok(())
}
