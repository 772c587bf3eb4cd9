//! Device identity and discovery results.

use std::fmt;

/// Strings read from the Device Information Service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Advertised name.
    pub name: String,
    /// Model number.
    pub model: String,
    /// Serial number.
    pub serial_number: String,
    /// Manufacturer name.
    pub manufacturer: String,
    /// Hardware revision.
    pub hw_version: String,
    /// Firmware revision.
    pub sw_version: String,
}

impl DeviceInfo {
    /// Whether any Device Information Service field was read.
    pub fn has_details(&self) -> bool {
        [
            &self.model,
            &self.serial_number,
            &self.manufacturer,
            &self.hw_version,
            &self.sw_version,
        ]
        .iter()
        .any(|s| !s.is_empty())
    }
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredDevice {
    /// Advertised name (or "Unknown").
    pub name: String,
    /// Platform address or identifier.
    pub address: String,
    /// Signal strength, if reported.
    pub rssi: Option<i16>,
    /// Whether the device advertises the OTA service.
    pub is_ota: bool,
}

impl DiscoveredDevice {
    /// Whether `pattern` matches this device's name or address.
    pub fn matches(&self, pattern: &str) -> bool {
        self.name.contains(pattern)
            || self.address.eq_ignore_ascii_case(pattern)
            || self.address.contains(pattern)
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)?;
        if let Some(rssi) = self.rssi {
            write!(f, " {rssi} dBm")?;
        }
        Ok(())
    }
}
