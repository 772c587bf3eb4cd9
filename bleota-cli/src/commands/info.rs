//! Device information command implementation.

use anyhow::Result;
use bleota::DeviceInfo;
use console::style;

use crate::Cli;
use crate::config::Config;

fn print_info(info: &DeviceInfo) {
    eprintln!("{}", style(&info.name).bold().underlined());

    if !info.has_details() {
        eprintln!(
            "  {}",
            style("Device Information Service not available").dim()
        );
        return;
    }

    let rows = [
        ("Model", &info.model),
        ("Serial number", &info.serial_number),
        ("Manufacturer", &info.manufacturer),
        ("Hardware", &info.hw_version),
        ("Firmware", &info.sw_version),
    ];
    for (label, value) in rows {
        if !value.is_empty() {
            println!("  {label:<14} {value}");
        }
    }
}

/// Info command implementation.
pub(crate) async fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let device = super::connect(cli, config).await?;
    let info = device.read_device_info().await;
    device.disconnect().await?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "device": info,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_info(&info);
    Ok(())
}
