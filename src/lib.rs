//! Sixaxis controller input
//!
//! Decodes PS3 Sixaxis HID reports, tracks controller state across frames
//! and delivers button, stick, pressure and motion changes to listeners.

pub mod config;
pub mod controller;

pub use config::{ConfigError, SessionConfig};
