//! Change detection between consecutive controller states
//!
//! The tracker keeps the last *reported* state as its baseline. Analog values
//! that drift inside the deadzone of the reported value are not reported and
//! do not move the baseline, so slow jitter can never accumulate into an event
//! storm.

use crate::config::ConfigError;
use crate::controller::state::{Axis, Button, ControllerState, MotionAxis};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Tracker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub axis_deadzone: f32,
    pub pressure_deadzone: f32,
    pub motion_deadzone: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            axis_deadzone: 0.05,
            pressure_deadzone: 0.05,
            motion_deadzone: 0.05,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("axis_deadzone", self.axis_deadzone),
            ("pressure_deadzone", self.pressure_deadzone),
            ("motion_deadzone", self.motion_deadzone),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "tracker.{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

// Direction of a button change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonChange {
    Pressed,
    Released,
}

/// Fields that changed in one tracking cycle, each list in canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub buttons: Vec<(Button, ButtonChange)>,
    pub axes: Vec<(Axis, f32)>,
    pub pressure: Vec<(Button, f32)>,
    pub motion: Vec<(MotionAxis, f32)>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
            && self.axes.is_empty()
            && self.pressure.is_empty()
            && self.motion.is_empty()
    }

    /// Number of individual field changes.
    pub fn len(&self) -> usize {
        self.buttons.len() + self.axes.len() + self.pressure.len() + self.motion.len()
    }

    pub fn was_pressed(&self, button: Button) -> bool {
        self.buttons
            .iter()
            .any(|(b, change)| *b == button && *change == ButtonChange::Pressed)
    }
}

/// Holds the last reported state and turns new states into deltas.
#[derive(Debug, Clone)]
pub struct StateTracker {
    settings: TrackerSettings,
    reported: ControllerState,
}

impl StateTracker {
    pub fn new(settings: TrackerSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        debug!("Creating state tracker with settings: {:?}", settings);
        Ok(Self {
            settings,
            reported: ControllerState::default(),
        })
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Baseline the next update is compared against.
    pub fn reported(&self) -> &ControllerState {
        &self.reported
    }

    /// Compares `next` against the reported baseline and moves the baseline
    /// for every field that is reported.
    pub fn update(&mut self, next: &ControllerState) -> StateDelta {
        let mut delta = StateDelta::default();

        for button in Button::ALL {
            let was = self.reported.is_pressed(button);
            let now = next.is_pressed(button);
            if was != now {
                let change = if now {
                    ButtonChange::Pressed
                } else {
                    ButtonChange::Released
                };
                delta.buttons.push((button, change));
                self.reported.set_pressed(button, now);
            }
        }

        for axis in Axis::ALL {
            let value = next.axis(axis);
            if exceeds(self.reported.axis(axis), value, self.settings.axis_deadzone) {
                delta.axes.push((axis, value));
                self.reported.set_axis(axis, value);
            }
        }

        for button in Button::ALL {
            let value = next.pressure(button);
            if exceeds(
                self.reported.pressure(button),
                value,
                self.settings.pressure_deadzone,
            ) {
                delta.pressure.push((button, value));
                self.reported.set_pressure(button, value);
            }
        }

        for axis in MotionAxis::ALL {
            let value = next.motion(axis);
            if exceeds(self.reported.motion(axis), value, self.settings.motion_deadzone) {
                delta.motion.push((axis, value));
                self.reported.set_motion(axis, value);
            }
        }

        if !delta.is_empty() {
            debug!("Tracked {} changed fields", delta.len());
        }
        delta
    }

    /// Forgets the reported baseline, e.g. after the controller reconnects.
    pub fn reset(&mut self) {
        self.reported = ControllerState::default();
    }
}

fn exceeds(reported: f32, next: f32, deadzone: f32) -> bool {
    let diff = (next - reported).abs();
    diff > 0.0 && diff >= deadzone
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stick(value: f32) -> ControllerState {
        let mut state = ControllerState::default();
        state.set_axis(Axis::LeftStickX, value);
        state
    }

    fn tracker() -> StateTracker {
        StateTracker::new(TrackerSettings::default()).unwrap()
    }

    #[test]
    fn test_small_axis_move_is_ignored() {
        let mut tracker = tracker();
        tracker.update(&stick(0.50));
        let delta = tracker.update(&stick(0.53));
        assert!(delta.axes.is_empty());
    }

    #[test]
    fn test_large_axis_move_is_reported() {
        let mut tracker = tracker();
        tracker.update(&stick(0.50));
        let delta = tracker.update(&stick(0.60));
        assert_eq!(delta.axes, vec![(Axis::LeftStickX, 0.60)]);
    }

    #[test]
    fn test_baseline_is_last_reported_value() {
        let mut tracker = tracker();
        tracker.update(&stick(0.50));
        // Creeping in 0.03 steps: 0.53 is absorbed, 0.56 is 0.06 from 0.50
        assert!(tracker.update(&stick(0.53)).axes.is_empty());
        assert_eq!(tracker.update(&stick(0.56)).axes, vec![(Axis::LeftStickX, 0.56)]);
        assert_eq!(tracker.reported().axis(Axis::LeftStickX), 0.56);
    }

    #[test]
    fn test_button_press_is_reported_once() {
        let mut tracker = tracker();
        let mut pressed = ControllerState::default();
        pressed.set_pressed(Button::Cross, true);

        let first = tracker.update(&pressed);
        assert_eq!(first.buttons, vec![(Button::Cross, ButtonChange::Pressed)]);
        assert!(tracker.update(&pressed).buttons.is_empty());

        let released = tracker.update(&ControllerState::default());
        assert_eq!(released.buttons, vec![(Button::Cross, ButtonChange::Released)]);
    }

    #[test]
    fn test_buttons_in_canonical_order() {
        let mut tracker = tracker();
        let mut state = ControllerState::default();
        state.set_pressed(Button::Ps, true);
        state.set_pressed(Button::Select, true);
        state.set_pressed(Button::Circle, true);
        let delta = tracker.update(&state);
        let order: Vec<_> = delta.buttons.iter().map(|(b, _)| *b).collect();
        assert_eq!(order, vec![Button::Select, Button::Circle, Button::Ps]);
    }

    #[test]
    fn test_pressure_deadzone() {
        let mut tracker = StateTracker::new(TrackerSettings {
            pressure_deadzone: 0.2,
            ..Default::default()
        })
        .unwrap();
        let mut state = ControllerState::default();
        state.set_pressure(Button::L2, 0.1);
        assert!(tracker.update(&state).pressure.is_empty());
        state.set_pressure(Button::L2, 0.3);
        assert_eq!(tracker.update(&state).pressure, vec![(Button::L2, 0.3)]);
    }

    #[test]
    fn test_zero_deadzone_reports_any_change_only() {
        let mut tracker = StateTracker::new(TrackerSettings {
            axis_deadzone: 0.0,
            ..Default::default()
        })
        .unwrap();
        assert!(tracker.update(&stick(0.0)).is_empty());
        assert_eq!(tracker.update(&stick(0.01)).axes.len(), 1);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        for bad in [-0.1, 1.0, 1.5] {
            let settings = TrackerSettings {
                axis_deadzone: bad,
                ..Default::default()
            };
            assert!(matches!(
                StateTracker::new(settings),
                Err(ConfigError::InvalidConfiguration(_))
            ));
        }
        let settings = TrackerSettings {
            pressure_deadzone: 1.0,
            ..Default::default()
        };
        assert!(StateTracker::new(settings).is_err());
    }

    proptest! {
        #[test]
        fn deadzone_boundary(start in -0.9f32..0.9, step in 0.0f32..0.1) {
            let mut tracker = tracker();
            tracker.update(&stick(start));
            let baseline = tracker.reported().axis(Axis::LeftStickX);
            let next = stick(start + step);
            let diff = (next.axis(Axis::LeftStickX) - baseline).abs();
            let delta = tracker.update(&next);
            if diff < 0.05 {
                prop_assert!(delta.axes.is_empty());
            } else {
                prop_assert_eq!(delta.axes.len(), 1);
            }
        }

        #[test]
        fn held_button_never_repeats(frames in 2usize..20) {
            let mut tracker = tracker();
            let mut state = ControllerState::default();
            state.set_pressed(Button::R1, true);
            let mut presses = 0;
            for _ in 0..frames {
                presses += tracker
                    .update(&state)
                    .buttons
                    .iter()
                    .filter(|(_, change)| *change == ButtonChange::Pressed)
                    .count();
            }
            prop_assert_eq!(presses, 1);
        }
    }
}
