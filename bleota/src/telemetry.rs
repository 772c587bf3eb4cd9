//! Battery telemetry notifications.
//!
//! The battery channel carries an 8-byte little-endian sample:
//!
//! ```text
//! +---------+---------+-----+-------------+
//! | Voltage | Current | SoC | Temperature |
//! +---------+---------+-----+-------------+
//! | u16 mV  | i16 mA  | u16 | u16 0.1 °C  |
//! +---------+---------+-----+-------------+
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

/// Length of a battery notification.
pub const BATTERY_FRAME_LEN: usize = 8;

/// Direction of current flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChargeState {
    /// Current flowing into the battery.
    Charging,
    /// Current flowing out of the battery.
    Discharging,
    /// No current.
    Idle,
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charging => write!(f, "Charging"),
            Self::Discharging => write!(f, "Discharging"),
            Self::Idle => write!(f, "Idle"),
        }
    }
}

/// One battery sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BatteryStatus {
    /// Battery voltage in millivolts.
    pub voltage_mv: u16,
    /// Average current in milliamps; positive while charging.
    pub average_current_ma: i16,
    /// State of charge in percent.
    pub state_of_charge: u16,
    /// Temperature in tenths of a degree Celsius.
    pub temperature_decidegrees: u16,
}

impl BatteryStatus {
    /// Parse a battery notification. Returns `None` if it is too short.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < BATTERY_FRAME_LEN {
            return None;
        }
        Some(Self {
            voltage_mv: LittleEndian::read_u16(&data[0..2]),
            average_current_ma: LittleEndian::read_i16(&data[2..4]),
            state_of_charge: LittleEndian::read_u16(&data[4..6]),
            temperature_decidegrees: LittleEndian::read_u16(&data[6..8]),
        })
    }

    /// Temperature in degrees Celsius.
    pub fn temperature_c(&self) -> f32 {
        f32::from(self.temperature_decidegrees) / 10.0
    }

    /// Current flow direction.
    pub fn charge_state(&self) -> ChargeState {
        match self.average_current_ma {
            c if c > 0 => ChargeState::Charging,
            c if c < 0 => ChargeState::Discharging,
            _ => ChargeState::Idle,
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mV, {} mA ({}), {}%, {:.1} °C",
            self.voltage_mv,
            self.average_current_ma,
            self.charge_state(),
            self.state_of_charge,
            self.temperature_c()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        // 3700 mV, +250 mA, 87 %, 30.5 °C
        let data = [0x74, 0x0E, 0xFA, 0x00, 0x57, 0x00, 0x31, 0x01];
        let status = BatteryStatus::parse(&data).unwrap();
        assert_eq!(status.voltage_mv, 3700);
        assert_eq!(status.average_current_ma, 250);
        assert_eq!(status.state_of_charge, 87);
        assert_eq!(status.temperature_decidegrees, 305);
        assert!((status.temperature_c() - 30.5).abs() < f32::EPSILON);
        assert_eq!(status.charge_state(), ChargeState::Charging);
    }

    #[test]
    fn test_negative_current_is_discharging() {
        let data = [0x00, 0x0E, 0x9C, 0xFF, 0x32, 0x00, 0xFA, 0x00];
        let status = BatteryStatus::parse(&data).unwrap();
        assert_eq!(status.average_current_ma, -100);
        assert_eq!(status.charge_state(), ChargeState::Discharging);
    }

    #[test]
    fn test_zero_current_is_idle() {
        let status = BatteryStatus::default();
        assert_eq!(status.charge_state(), ChargeState::Idle);
    }

    #[test]
    fn test_short_payload() {
        assert!(BatteryStatus::parse(&[0u8; 7]).is_none());
        assert!(BatteryStatus::parse(&[0u8; 12]).is_some());
    }

    #[test]
    fn test_display() {
        let data = [0x74, 0x0E, 0xFA, 0x00, 0x57, 0x00, 0x31, 0x01];
        let status = BatteryStatus::parse(&data).unwrap();
        assert_eq!(status.to_string(), "3700 mV, 250 mA (Charging), 87%, 30.5 °C");
    }
}
