//! Optional stick calibration
//!
//! Sits between the decoder and the tracker. Each stick axis tracks its own
//! centre and observed range, then maps the decoded value through a centre
//! dead zone and an outer hot zone so the full `[-1.0, 1.0]` range stays
//! reachable on sticks that move inside a circle.

use crate::config::ConfigError;
use crate::controller::state::{Axis, ControllerState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_CENTRE: f32 = 0.0;
const DEFAULT_MIN: f32 = -0.8;
const DEFAULT_MAX: f32 = 0.8;

/// Calibration settings, shared by all four stick axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Fraction of each half range around the centre that reads as 0.0
    pub dead_zone: f32,
    /// Fraction of each half range at the extremes that reads as ±1.0
    pub hot_zone: f32,
    /// Inversion per axis, in left x, left y, right x, right y order
    pub invert: [bool; Axis::COUNT],
    /// START resets the calibration, SELECT centres the sticks
    pub bind_default_buttons: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            dead_zone: 0.05,
            hot_zone: 0.0,
            invert: [false; Axis::COUNT],
            bind_default_buttons: false,
        }
    }
}

impl CalibrationSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("dead_zone", self.dead_zone), ("hot_zone", self.hot_zone)] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "calibration.{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        if self.dead_zone + self.hot_zone >= 1.0 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "calibration.dead_zone + calibration.hot_zone must stay below 1, got {}",
                self.dead_zone + self.hot_zone
            )));
        }
        Ok(())
    }
}

// Per-axis calibration data
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisRange {
    centre: f32,
    min: f32,
    max: f32,
    value: f32,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self {
            centre: DEFAULT_CENTRE,
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            value: DEFAULT_CENTRE,
        }
    }
}

impl AxisRange {
    fn observe(&mut self, value: f32) {
        self.value = value;
        if value > self.max {
            self.max = value;
        } else if value < self.min {
            self.min = value;
        }
    }

    fn corrected(&self, dead_zone: f32, hot_zone: f32) -> f32 {
        let high_range = self.max - self.centre;
        let high_start = self.centre + dead_zone * high_range;
        let high_end = self.max - hot_zone * high_range;

        let low_range = self.centre - self.min;
        let low_start = self.centre - dead_zone * low_range;
        let low_end = self.min + hot_zone * low_range;

        if self.value > high_start {
            if self.value >= high_end {
                1.0
            } else {
                (self.value - high_start) / (high_end - high_start)
            }
        } else if self.value < low_start {
            if self.value <= low_end {
                -1.0
            } else {
                (self.value - low_start) / (low_start - low_end)
            }
        } else {
            0.0
        }
    }
}

/// Applies [`CalibrationSettings`] to decoded states.
#[derive(Debug, Clone)]
pub struct AxisCalibrator {
    settings: CalibrationSettings,
    ranges: [AxisRange; Axis::COUNT],
}

impl AxisCalibrator {
    pub fn new(settings: CalibrationSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        debug!("Creating axis calibrator with settings: {:?}", settings);
        Ok(Self {
            settings,
            ranges: [AxisRange::default(); Axis::COUNT],
        })
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Records the decoded stick values and rewrites them with corrected ones.
    pub fn apply(&mut self, state: &mut ControllerState) {
        for axis in Axis::ALL {
            let range = &mut self.ranges[axis.index()];
            range.observe(state.axis(axis));
            let corrected = range.corrected(self.settings.dead_zone, self.settings.hot_zone);
            let corrected = if self.settings.invert[axis.index()] {
                -corrected
            } else {
                corrected
            };
            state.set_axis(axis, corrected);
        }
    }

    /// Uses the last observed value of each axis as its new centre.
    pub fn set_axis_centres(&mut self) {
        for range in &mut self.ranges {
            range.centre = range.value;
        }
        info!("Axis centres set to current stick positions");
    }

    /// Restores the default centre and range on every axis.
    pub fn reset(&mut self) {
        for range in &mut self.ranges {
            let value = range.value;
            *range = AxisRange {
                value,
                ..AxisRange::default()
            };
        }
        info!("Axis calibration reset");
    }
}
