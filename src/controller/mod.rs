//! Controller subsystem for Sixaxis input reports
//!
//! Every report runs through the same pipeline:
//!
//! 1. [`report_decoder`] - Raw bytes to a [`ControllerState`] snapshot
//! 2. [`calibration`] - Optional stick centring and range correction
//! 3. [`state_tracker`] - Deadzone filtered differences between snapshots
//! 4. [`event_dispatcher`] - Fan-out of changes to subscribed listeners
//! 5. [`device_session`] - Transport lifecycle, read loop and reconnects
//!
//! # Architecture
//!
//! ```text
//! Transport ──► ReportDecoder ──► StateTracker ──► EventDispatcher ──► Listeners
//!  (hidraw)     (ControllerState)  (StateDelta)     (ControllerEvent)
//! ```
//!
//! A [`DeviceSession`] owns one pipeline and runs it on a tokio task. The
//! pipeline itself is synchronous and can be driven directly through
//! [`ReportPipeline::process`].

pub mod calibration;
pub mod device_session;
pub mod event_dispatcher;
pub mod listeners;
pub mod pipeline;
pub mod profile;
pub mod report_decoder;
pub mod state;
pub mod state_tracker;
pub mod transport;

pub use calibration::{AxisCalibrator, CalibrationSettings};
pub use device_session::{
    DeviceSession, ReconnectSettings, SessionError, SessionNotice, SessionStatus,
};
pub use event_dispatcher::{
    ControllerEvent, EventDispatcher, EventKind, EventKinds, InputChange, Listener,
    ListenerError, ListenerHandle,
};
pub use listeners::{
    ButtonHandler, ChannelListener, FilteredListener, FnListener, LogListener, PressLatch,
};
pub use pipeline::{CalibrationCommand, ReportPipeline};
pub use profile::DeviceProfile;
pub use report_decoder::{DecodeError, ReportDecoder};
pub use state::{Axis, Button, ButtonSet, ControllerState, MotionAxis};
pub use state_tracker::{ButtonChange, StateDelta, StateTracker, TrackerSettings};
pub use transport::{HidrawTransport, Transport};
