//! Raw HID report decoding
//!
//! [`ReportDecoder::decode`] is a pure function from one fixed-length input
//! report to a [`ControllerState`]. It performs no I/O and keeps no state
//! between calls.

use crate::config::ConfigError;
use crate::controller::profile::DeviceProfile;
use crate::controller::state::ControllerState;
use tracing::debug;

/// Centre value of a motion sensor word.
const MOTION_CENTRE: f32 = 512.0;

// Decode errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed report: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Malformed report: expected report id {expected:#04x}, got {actual:#04x}")]
    UnexpectedReportId { expected: u8, actual: u8 },
}

/// Decoder bound to one validated [`DeviceProfile`].
#[derive(Debug, Clone)]
pub struct ReportDecoder {
    profile: DeviceProfile,
}

impl ReportDecoder {
    pub fn new(profile: DeviceProfile) -> Result<Self, ConfigError> {
        profile.validate()?;
        debug!(
            "Created report decoder for '{}' ({} byte reports)",
            profile.name, profile.report_len
        );
        Ok(Self { profile })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Expected report length in bytes.
    pub fn report_len(&self) -> usize {
        self.profile.report_len
    }

    pub fn decode(&self, raw: &[u8]) -> Result<ControllerState, DecodeError> {
        if raw.len() != self.profile.report_len {
            return Err(DecodeError::WrongLength {
                expected: self.profile.report_len,
                actual: raw.len(),
            });
        }
        if let Some(expected) = self.profile.report_id {
            if raw[0] != expected {
                return Err(DecodeError::UnexpectedReportId {
                    expected,
                    actual: raw[0],
                });
            }
        }

        let mut state = ControllerState::default();

        for entry in &self.profile.buttons {
            state.set_pressed(entry.button, raw[entry.byte] & (1 << entry.bit) != 0);
        }
        for entry in &self.profile.axes {
            state.set_axis(entry.axis, normalize_axis(raw[entry.offset]));
        }
        for entry in &self.profile.pressure {
            state.set_pressure(entry.button, normalize_pressure(raw[entry.offset]));
        }
        for entry in &self.profile.motion {
            let word = u16::from_be_bytes([raw[entry.offset], raw[entry.offset + 1]]);
            state.set_motion(entry.axis, normalize_motion(word));
        }

        Ok(state)
    }
}

/// Maps a stick byte to `[-1.0, 1.0]` with 128 as centre.
///
/// The lower half spans 128 steps and the upper half 127, so both full
/// deflections land exactly on -1.0 and 1.0.
///
/// Values above centre therefore read slightly higher than a plain
/// `(raw - 128) / 128`, by up to 1/127 (0.8%) near full deflection:
/// raw 192 gives 0.504 rather than 0.5. Values at or below centre match it
/// exactly.
pub fn normalize_axis(raw: u8) -> f32 {
    let offset = raw as f32 - 128.0;
    let span = if offset > 0.0 { 127.0 } else { 128.0 };
    (offset / span).clamp(-1.0, 1.0)
}

/// Maps a pressure byte to `[0.0, 1.0]`.
pub fn normalize_pressure(raw: u8) -> f32 {
    raw as f32 / 255.0
}

/// Maps a motion word (10 bit, centred at 512) to `[-1.0, 1.0]`.
pub fn normalize_motion(raw: u16) -> f32 {
    ((raw as f32 - MOTION_CENTRE) / MOTION_CENTRE).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::profile::SIXAXIS_REPORT_ID;
    use crate::controller::state::{Axis, Button, MotionAxis};
    use proptest::prelude::*;

    fn neutral_report() -> Vec<u8> {
        let mut raw = vec![0u8; 49];
        raw[0] = SIXAXIS_REPORT_ID;
        for offset in 6..=9 {
            raw[offset] = 128;
        }
        for offset in [41, 43, 45, 47] {
            raw[offset..offset + 2].copy_from_slice(&512u16.to_be_bytes());
        }
        raw
    }

    // Builds a report from a state using the profile table
    fn encode(profile: &DeviceProfile, state: &ControllerState) -> Vec<u8> {
        let mut raw = neutral_report();
        for entry in &profile.buttons {
            if state.is_pressed(entry.button) {
                raw[entry.byte] |= 1 << entry.bit;
            }
        }
        for entry in &profile.axes {
            let value = state.axis(entry.axis);
            let span = if value > 0.0 { 127.0 } else { 128.0 };
            raw[entry.offset] = (128.0 + value * span).round() as u8;
        }
        for entry in &profile.pressure {
            raw[entry.offset] = (state.pressure(entry.button) * 255.0).round() as u8;
        }
        for entry in &profile.motion {
            let word = (512.0 + state.motion(entry.axis) * 512.0).round() as u16;
            raw[entry.offset..entry.offset + 2].copy_from_slice(&word.to_be_bytes());
        }
        raw
    }

    fn decoder() -> ReportDecoder {
        ReportDecoder::new(DeviceProfile::sixaxis()).unwrap()
    }

    #[test]
    fn test_dpad_up_only() {
        let mut raw = neutral_report();
        raw[2] = 1 << 4;
        let state = decoder().decode(&raw).unwrap();
        assert!(state.is_pressed(Button::DPadUp));
        for button in Button::ALL.iter().filter(|b| **b != Button::DPadUp) {
            assert!(!state.is_pressed(*button), "{:?} should be released", button);
        }
    }

    #[test]
    fn test_centred_stick() {
        let state = decoder().decode(&neutral_report()).unwrap();
        assert_eq!(state.axis(Axis::LeftStickX), 0.0);
    }

    #[test]
    fn test_full_deflection() {
        let mut raw = neutral_report();
        raw[6] = 255;
        raw[7] = 0;
        let state = decoder().decode(&raw).unwrap();
        assert_eq!(state.axis(Axis::LeftStickX), 1.0);
        assert_eq!(state.axis(Axis::LeftStickY), -1.0);
    }

    #[test]
    fn test_half_deflection_uses_half_range() {
        // Upper half divides by 127, lower half by 128
        assert!((normalize_axis(192) - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(normalize_axis(64), -0.5);
        assert!(normalize_axis(192) - 0.5 < 1.0 / 127.0);
    }

    #[test]
    fn test_pressure_and_motion() {
        let mut raw = neutral_report();
        raw[24] = 255;
        raw[14] = 51;
        raw[41..43].copy_from_slice(&1023u16.to_be_bytes());
        let state = decoder().decode(&raw).unwrap();
        assert_eq!(state.pressure(Button::Cross), 1.0);
        assert!((state.pressure(Button::DPadUp) - 0.2).abs() < 1e-6);
        assert_eq!(state.pressure(Button::Select), 0.0);
        assert!(state.motion(MotionAxis::AccelX) > 0.99);
        assert_eq!(state.motion(MotionAxis::AccelY), 0.0);
    }

    #[test]
    fn test_wrong_length() {
        let err = decoder().decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::WrongLength {
                expected: 49,
                actual: 10
            }
        );
    }

    #[test]
    fn test_wrong_report_id() {
        let mut raw = neutral_report();
        raw[0] = 0x11;
        assert!(matches!(
            decoder().decode(&raw),
            Err(DecodeError::UnexpectedReportId {
                expected: 0x01,
                actual: 0x11
            })
        ));
    }

    #[test]
    fn test_profile_without_motion_leaves_zero() {
        let mut profile = DeviceProfile::sixaxis();
        profile.motion.clear();
        let decoder = ReportDecoder::new(profile).unwrap();
        let mut raw = neutral_report();
        raw[45..47].copy_from_slice(&0u16.to_be_bytes());
        let state = decoder.decode(&raw).unwrap();
        assert_eq!(state.motion(MotionAxis::AccelZ), 0.0);
    }

    #[test]
    fn test_encoded_state_decodes_back() {
        let profile = DeviceProfile::sixaxis();
        let mut expected = ControllerState::default();
        expected.set_pressed(Button::Triangle, true);
        expected.set_pressed(Button::Ps, true);
        expected.set_axis(Axis::RightStickX, -0.5);
        expected.set_axis(Axis::LeftStickY, 1.0);
        expected.set_pressure(Button::Triangle, 0.6);
        expected.set_motion(MotionAxis::GyroZ, 0.25);

        let decoded = decoder().decode(&encode(&profile, &expected)).unwrap();
        assert_eq!(decoded.pressed(), expected.pressed());
        for axis in Axis::ALL {
            assert!((decoded.axis(axis) - expected.axis(axis)).abs() < 1e-2);
        }
        for button in Button::ALL {
            assert!((decoded.pressure(button) - expected.pressure(button)).abs() < 1e-2);
        }
        for axis in MotionAxis::ALL {
            assert!((decoded.motion(axis) - expected.motion(axis)).abs() < 1e-2);
        }
    }

    proptest! {
        #[test]
        fn decode_is_deterministic(body in proptest::collection::vec(any::<u8>(), 48)) {
            let mut raw = vec![SIXAXIS_REPORT_ID];
            raw.extend(body);
            let decoder = decoder();
            let first = decoder.decode(&raw).unwrap();
            let second = decoder.decode(&raw).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn axis_always_in_range(raw in any::<u8>()) {
            let value = normalize_axis(raw);
            prop_assert!((-1.0..=1.0).contains(&value));
        }
    }
}
