//! Report layout tables
//!
//! A [`DeviceProfile`] describes where a controller model puts each field in
//! its input report. The decoder is built from a profile instead of global
//! constants, so several controller models can be handled side by side and a
//! custom layout can be loaded from the configuration file.

use crate::config::ConfigError;
use crate::controller::state::{Axis, Button, MotionAxis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Sixaxis input report length, report id byte included.
pub const SIXAXIS_REPORT_LEN: usize = 49;

/// Sixaxis input report id (byte 0).
pub const SIXAXIS_REPORT_ID: u8 = 0x01;

// Location of a single button bit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonBit {
    pub button: Button,
    pub byte: usize,
    pub bit: u8,
}

// Single byte stick axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisField {
    pub axis: Axis,
    pub offset: usize,
}

// Single byte pressure value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureField {
    pub button: Button,
    pub offset: usize,
}

// Big-endian 16 bit motion word, centred at 512
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionField {
    pub axis: MotionAxis,
    pub offset: usize,
}

/// Byte-offset table for one controller model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub report_len: usize,
    #[serde(default)]
    pub report_id: Option<u8>,
    pub buttons: Vec<ButtonBit>,
    pub axes: Vec<AxisField>,
    #[serde(default)]
    pub pressure: Vec<PressureField>,
    #[serde(default)]
    pub motion: Vec<MotionField>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::sixaxis()
    }
}

impl DeviceProfile {
    /// PS3 Sixaxis layout as delivered by hidraw (report id at byte 0).
    ///
    /// | bytes    | content                                                      |
    /// |----------|--------------------------------------------------------------|
    /// | 2        | select, L3, R3, start, up, right, down, left (bit 0..7)      |
    /// | 3        | L2, R2, L1, R1, triangle, circle, cross, square (bit 0..7)   |
    /// | 4        | PS (bit 0)                                                   |
    /// | 6..=9    | left x, left y, right x, right y                             |
    /// | 14..=25  | pressure: up, right, down, left, L2, R2, L1, R1, △, ○, ×, □  |
    /// | 41,43,45 | accelerometer x, y, z (big-endian)                           |
    /// | 47       | gyro z (big-endian)                                          |
    pub fn sixaxis() -> Self {
        // Bit order of bytes 2..=4 follows Button::ALL
        let buttons = Button::ALL
            .iter()
            .enumerate()
            .map(|(i, button)| ButtonBit {
                button: *button,
                byte: 2 + i / 8,
                bit: (i % 8) as u8,
            })
            .collect();

        let axes = Axis::ALL
            .iter()
            .enumerate()
            .map(|(i, axis)| AxisField {
                axis: *axis,
                offset: 6 + i,
            })
            .collect();

        let pressure = [
            Button::DPadUp,
            Button::DPadRight,
            Button::DPadDown,
            Button::DPadLeft,
            Button::L2,
            Button::R2,
            Button::L1,
            Button::R1,
            Button::Triangle,
            Button::Circle,
            Button::Cross,
            Button::Square,
        ]
        .iter()
        .enumerate()
        .map(|(i, button)| PressureField {
            button: *button,
            offset: 14 + i,
        })
        .collect();

        let motion = MotionAxis::ALL
            .iter()
            .enumerate()
            .map(|(i, axis)| MotionField {
                axis: *axis,
                offset: 41 + 2 * i,
            })
            .collect();

        Self {
            name: "PLAYSTATION(R)3 Controller".to_string(),
            report_len: SIXAXIS_REPORT_LEN,
            report_id: Some(SIXAXIS_REPORT_ID),
            buttons,
            axes,
            pressure,
            motion,
        }
    }

    /// Checks that every field fits inside the report and nothing is mapped twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| {
            Err(ConfigError::InvalidConfiguration(format!(
                "profile '{}': {}",
                self.name, msg
            )))
        };

        if self.report_len == 0 {
            return invalid("report_len must be greater than zero".to_string());
        }

        let mut seen_buttons = HashSet::new();
        for entry in &self.buttons {
            if entry.byte >= self.report_len {
                return invalid(format!(
                    "button {:?} byte {} outside report of {} bytes",
                    entry.button, entry.byte, self.report_len
                ));
            }
            if entry.bit > 7 {
                return invalid(format!("button {:?} bit {} > 7", entry.button, entry.bit));
            }
            if !seen_buttons.insert(entry.button) {
                return invalid(format!("button {:?} mapped twice", entry.button));
            }
        }

        let mut seen_axes = HashSet::new();
        for entry in &self.axes {
            if entry.offset >= self.report_len {
                return invalid(format!(
                    "axis {:?} offset {} outside report",
                    entry.axis, entry.offset
                ));
            }
            if !seen_axes.insert(entry.axis) {
                return invalid(format!("axis {:?} mapped twice", entry.axis));
            }
        }

        let mut seen_pressure = HashSet::new();
        for entry in &self.pressure {
            if entry.offset >= self.report_len {
                return invalid(format!(
                    "pressure {:?} offset {} outside report",
                    entry.button, entry.offset
                ));
            }
            if !seen_pressure.insert(entry.button) {
                return invalid(format!("pressure {:?} mapped twice", entry.button));
            }
        }

        let mut seen_motion = HashSet::new();
        for entry in &self.motion {
            if entry.offset + 1 >= self.report_len {
                return invalid(format!(
                    "motion {:?} word at {} outside report",
                    entry.axis, entry.offset
                ));
            }
            if !seen_motion.insert(entry.axis) {
                return invalid(format!("motion {:?} mapped twice", entry.axis));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixaxis_profile_is_valid() {
        let profile = DeviceProfile::sixaxis();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.buttons.len(), Button::COUNT);
        assert_eq!(profile.pressure.len(), 12);
    }

    #[test]
    fn test_sixaxis_dpad_up_location() {
        let profile = DeviceProfile::sixaxis();
        let up = profile
            .buttons
            .iter()
            .find(|b| b.button == Button::DPadUp)
            .unwrap();
        assert_eq!((up.byte, up.bit), (2, 4));
        let ps = profile
            .buttons
            .iter()
            .find(|b| b.button == Button::Ps)
            .unwrap();
        assert_eq!((ps.byte, ps.bit), (4, 0));
    }

    #[test]
    fn test_offset_outside_report_rejected() {
        let mut profile = DeviceProfile::sixaxis();
        profile.axes[0].offset = 49;
        assert!(matches!(
            profile.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_duplicate_button_rejected() {
        let mut profile = DeviceProfile::sixaxis();
        let first = profile.buttons[0].clone();
        profile.buttons.push(first);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_motion_word_must_fit() {
        let mut profile = DeviceProfile::sixaxis();
        profile.motion[3].offset = 48;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_profile_toml_roundtrip() {
        let profile = DeviceProfile::sixaxis();
        let text = toml::to_string(&profile).unwrap();
        let parsed: DeviceProfile = toml::from_str(&text).unwrap();
        assert_eq!(parsed, profile);
    }
}
