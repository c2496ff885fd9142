//! Typed controller state
//!
//! [`ControllerState`] is the value every other stage of the pipeline works on.
//! Every button, axis and motion key is always present: fields a device does
//! not report stay at `false` / `0.0`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

// Button type, declared in canonical dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Select,
    LeftStick,
    RightStick,
    Start,
    DPadUp,
    DPadRight,
    DPadDown,
    DPadLeft,
    L2,
    R2,
    L1,
    R1,
    Triangle,
    Circle,
    Cross,
    Square,
    Ps,
}

impl Button {
    pub const COUNT: usize = 17;

    /// All buttons in canonical order.
    pub const ALL: [Button; Button::COUNT] = [
        Button::Select,
        Button::LeftStick,
        Button::RightStick,
        Button::Start,
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
        Button::Ps,
    ];

    /// Position of this button in [`Button::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

// Analog stick axis, declared in canonical dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
}

impl Axis {
    pub const COUNT: usize = 4;

    pub const ALL: [Axis; Axis::COUNT] = [
        Axis::LeftStickX,
        Axis::LeftStickY,
        Axis::RightStickX,
        Axis::RightStickY,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

// Motion sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAxis {
    AccelX,
    AccelY,
    AccelZ,
    GyroZ,
}

impl MotionAxis {
    pub const COUNT: usize = 4;

    pub const ALL: [MotionAxis; MotionAxis::COUNT] = [
        MotionAxis::AccelX,
        MotionAxis::AccelY,
        MotionAxis::AccelZ,
        MotionAxis::GyroZ,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Compact set of buttons, one bit per [`Button`] in canonical order.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ButtonSet: u32 {
        const SELECT = 1 << 0;
        const LEFT_STICK = 1 << 1;
        const RIGHT_STICK = 1 << 2;
        const START = 1 << 3;
        const DPAD_UP = 1 << 4;
        const DPAD_RIGHT = 1 << 5;
        const DPAD_DOWN = 1 << 6;
        const DPAD_LEFT = 1 << 7;
        const L2 = 1 << 8;
        const R2 = 1 << 9;
        const L1 = 1 << 10;
        const R1 = 1 << 11;
        const TRIANGLE = 1 << 12;
        const CIRCLE = 1 << 13;
        const CROSS = 1 << 14;
        const SQUARE = 1 << 15;
        const PS = 1 << 16;
    }
}

impl From<Button> for ButtonSet {
    fn from(button: Button) -> Self {
        Self::from_bits_retain(1 << button.index())
    }
}

impl FromIterator<Button> for ButtonSet {
    fn from_iter<I: IntoIterator<Item = Button>>(iter: I) -> Self {
        iter.into_iter().map(ButtonSet::from).collect()
    }
}

impl ButtonSet {
    /// Number of buttons in the set.
    pub fn len(&self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Iterates members in canonical order.
    pub fn buttons(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL
            .into_iter()
            .filter(|b| self.contains(ButtonSet::from(*b)))
    }
}

/// Snapshot of everything the controller reports.
///
/// Buttons are pressed/released flags. Stick axes are normalized to
/// `[-1.0, 1.0]`, pressure to `[0.0, 1.0]` and motion channels to `[-1.0, 1.0]`.
/// Buttons without a pressure sensor keep a pressure of `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    buttons: [bool; Button::COUNT],
    axes: [f32; Axis::COUNT],
    pressure: [f32; Button::COUNT],
    motion: [f32; MotionAxis::COUNT],
}

impl ControllerState {
    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons[button.index()]
    }

    pub fn set_pressed(&mut self, button: Button, pressed: bool) {
        self.buttons[button.index()] = pressed;
    }

    pub fn axis(&self, axis: Axis) -> f32 {
        self.axes[axis.index()]
    }

    pub fn set_axis(&mut self, axis: Axis, value: f32) {
        self.axes[axis.index()] = value.clamp(-1.0, 1.0);
    }

    pub fn pressure(&self, button: Button) -> f32 {
        self.pressure[button.index()]
    }

    pub fn set_pressure(&mut self, button: Button, value: f32) {
        self.pressure[button.index()] = value.clamp(0.0, 1.0);
    }

    pub fn motion(&self, axis: MotionAxis) -> f32 {
        self.motion[axis.index()]
    }

    pub fn set_motion(&mut self, axis: MotionAxis, value: f32) {
        self.motion[axis.index()] = value.clamp(-1.0, 1.0);
    }

    /// Currently pressed buttons.
    pub fn pressed(&self) -> ButtonSet {
        Button::ALL
            .into_iter()
            .filter(|b| self.is_pressed(*b))
            .collect()
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x1={:.2}, y1={:.2}, x2={:.2}, y2={:.2}, buttons={:?}",
            self.axis(Axis::LeftStickX),
            self.axis(Axis::LeftStickY),
            self.axis(Axis::RightStickX),
            self.axis(Axis::RightStickY),
            self.pressed().buttons().collect::<Vec<_>>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, button) in Button::ALL.iter().enumerate() {
            assert_eq!(button.index(), i);
        }
        for (i, axis) in Axis::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
    }

    #[test]
    fn test_default_state_is_neutral() {
        let state = ControllerState::default();
        assert!(state.pressed().is_empty());
        for axis in Axis::ALL {
            assert_eq!(state.axis(axis), 0.0);
        }
        for button in Button::ALL {
            assert_eq!(state.pressure(button), 0.0);
        }
    }

    #[test]
    fn test_setters_clamp() {
        let mut state = ControllerState::default();
        state.set_axis(Axis::RightStickY, 3.0);
        state.set_pressure(Button::Cross, -0.5);
        state.set_motion(MotionAxis::AccelZ, -7.0);
        assert_eq!(state.axis(Axis::RightStickY), 1.0);
        assert_eq!(state.pressure(Button::Cross), 0.0);
        assert_eq!(state.motion(MotionAxis::AccelZ), -1.0);
    }

    #[test]
    fn test_button_set() {
        let mut set: ButtonSet = [Button::Circle, Button::Select].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(Button::Circle.into()));
        assert_eq!(
            set.buttons().collect::<Vec<_>>(),
            vec![Button::Select, Button::Circle]
        );
        set.remove(Button::Circle.into());
        assert!(!set.contains(ButtonSet::CIRCLE));
        assert_eq!(set, ButtonSet::SELECT);
        assert_eq!(set.bits(), 1);
    }

    #[test]
    fn test_named_flags_follow_canonical_order() {
        let named: Vec<ButtonSet> = ButtonSet::all().iter().collect();
        let derived: Vec<ButtonSet> = Button::ALL.into_iter().map(ButtonSet::from).collect();
        assert_eq!(named, derived);
        assert_eq!(ButtonSet::from(Button::Ps), ButtonSet::PS);
    }
}
