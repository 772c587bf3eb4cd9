//! Device selection.
//!
//! Picks the device to talk to from a scan result:
//! - An explicit `--device` pattern (name substring or address) wins
//! - Otherwise only devices advertising the OTA service are offered
//! - Several candidates prompt via dialoguer, or fail in non-interactive mode

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    bleota::DiscoveredDevice,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::io::IsTerminal,
};

/// Options for device selection.
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    /// Name or address pattern.
    pub target: Option<String>,
    /// Fail instead of prompting.
    pub non_interactive: bool,
}

/// Result of device selection.
#[derive(Debug)]
pub struct SelectedDevice {
    /// The chosen device.
    pub device: DiscoveredDevice,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

/// Devices eligible for `options`, best first.
pub fn candidates(devices: Vec<DiscoveredDevice>, options: &DeviceOptions) -> Vec<DiscoveredDevice> {
    match &options.target {
        Some(pattern) => {
            // An exact address match is unambiguous.
            if let Some(exact) = devices
                .iter()
                .find(|d| d.address.eq_ignore_ascii_case(pattern))
            {
                return vec![exact.clone()];
            }
            devices
                .into_iter()
                .filter(|d| d.matches(pattern))
                .collect()
        },
        None => devices
            .into_iter()
            .filter(|d| d.is_ota)
            .collect(),
    }
}

/// Select a device from `devices`, prompting when several match.
pub fn select_device(
    devices: Vec<DiscoveredDevice>,
    options: &DeviceOptions,
) -> Result<SelectedDevice> {
    let mut candidates = candidates(devices, options);
    debug!("{} candidate device(s)", candidates.len());

    if candidates.len() > 1 {
        if options.non_interactive {
            return Err(CliError::Usage(format!(
                "multiple devices match ({}); pass --device NAME|ADDRESS",
                candidates.len()
            ))
            .into());
        }
        ensure_interactive_terminal()?;
        return select_device_interactive(candidates);
    }

    match candidates.pop() {
        Some(device) => {
            info!("Auto-selected device: {device}");
            Ok(SelectedDevice {
                device,
                prompted: false,
            })
        },
        None => Err(CliError::DeviceNotFound(match &options.target {
            Some(pattern) => format!("no device matching '{pattern}' found"),
            None => "no device advertising the OTA service found".to_string(),
        })
        .into()),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "multiple devices match and no terminal is available for a prompt".into(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("device selection cancelled".into()).into()
            } else {
                CliError::Usage("device prompt failed".into()).into()
            }
        },
    }
}

fn select_device_interactive(devices: Vec<DiscoveredDevice>) -> Result<SelectedDevice> {
    eprintln!(
        "{} Found {} matching devices",
        style("ℹ").blue(),
        devices.len()
    );

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = devices
        .iter()
        .map(|d| {
            let marker = if d.is_ota {
                format!(" {}", style("[OTA]").yellow())
            } else {
                String::new()
            };
            let label = format!("{}{marker}", style(d).bold());
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection.and_then(|index| devices.into_iter().nth(index)) {
        Some(device) => Ok(SelectedDevice {
            device,
            prompted: true,
        }),
        None => Err(CliError::Cancelled("device selection cancelled".into()).into()),
    }
}

/// Offer to store a prompted device as the default.
pub fn ask_remember_device(device: &DiscoveredDevice, config: &mut Config) -> Result<()> {
    if config.device.address.as_deref() == Some(device.address.as_str()) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {} by default?", device.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        let path = config.remember_device(device)?;
        eprintln!(
            "{} Saved to {}",
            style("✓").green(),
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, address: &str, is_ota: bool) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.into(),
            address: address.into(),
            rssi: Some(-60),
            is_ota,
        }
    }

    fn scan() -> Vec<DiscoveredDevice> {
        vec![
            device("Headphones", "11:11:11:11:11:11", false),
            device("OTA-Sensor-1", "22:22:22:22:22:22", true),
            device("OTA-Sensor-2", "33:33:33:33:33:33", true),
        ]
    }

    #[test]
    fn test_candidates_default_to_ota_devices() {
        let found = candidates(scan(), &DeviceOptions::default());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.is_ota));
    }

    #[test]
    fn test_candidates_by_pattern_include_non_ota() {
        let options = DeviceOptions {
            target: Some("Head".into()),
            ..DeviceOptions::default()
        };
        let found = candidates(scan(), &options);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Headphones");
    }

    #[test]
    fn test_exact_address_wins() {
        let options = DeviceOptions {
            target: Some("33:33:33:33:33:33".into()),
            ..DeviceOptions::default()
        };
        let selected = select_device(scan(), &options).unwrap();
        assert_eq!(selected.device.name, "OTA-Sensor-2");
        assert!(!selected.prompted);
    }

    #[test]
    fn test_non_interactive_multiple_is_usage_error() {
        let options = DeviceOptions {
            target: None,
            non_interactive: true,
        };
        let err = select_device(scan(), &options).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_no_match_is_device_not_found() {
        let options = DeviceOptions {
            target: Some("Kettle".into()),
            non_interactive: true,
        };
        let err = select_device(scan(), &options).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::DeviceNotFound(_))
        ));
    }
}
