//! One frame from raw bytes to delivered events
//!
//! ```text
//! raw ──► ReportDecoder ──► AxisCalibrator ──► StateTracker ──► EventDispatcher
//!                           (optional)     │
//!                                          └──► watch::Sender<ControllerState>
//! ```
//!
//! A frame that fails to decode is dropped before it reaches the tracker, so
//! the reported baseline only ever moves on good frames.

use crate::config::{ConfigError, SessionConfig};
use crate::controller::calibration::AxisCalibrator;
use crate::controller::event_dispatcher::{EventDispatcher, ListenerError};
use crate::controller::report_decoder::{DecodeError, ReportDecoder};
use crate::controller::state::{Button, ControllerState};
use crate::controller::state_tracker::{StateDelta, StateTracker};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

// Calibration requests sent to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    CentreAxes,
    Reset,
}

#[derive(Debug)]
pub struct ReportPipeline {
    decoder: ReportDecoder,
    tracker: StateTracker,
    calibrator: Option<AxisCalibrator>,
    dispatcher: Arc<EventDispatcher>,
    state_sender: watch::Sender<ControllerState>,
    frames: u64,
    dropped: u64,
}

impl ReportPipeline {
    pub fn new(
        config: &SessionConfig,
        dispatcher: Arc<EventDispatcher>,
    ) -> Result<Self, ConfigError> {
        let decoder = ReportDecoder::new(config.device.profile.clone())?;
        let tracker = StateTracker::new(config.tracker.clone())?;
        let calibrator = config
            .calibration
            .clone()
            .map(AxisCalibrator::new)
            .transpose()?;
        let (state_sender, _) = watch::channel(ControllerState::default());

        Ok(Self {
            decoder,
            tracker,
            calibrator,
            dispatcher,
            state_sender,
            frames: 0,
            dropped: 0,
        })
    }

    /// Receiver for the latest decoded state.
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_sender.subscribe()
    }

    pub fn decoder(&self) -> &ReportDecoder {
        &self.decoder
    }

    /// Good frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames rejected by the decoder so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Runs one report through the pipeline.
    ///
    /// A decode error drops the frame and leaves all state untouched.
    /// Listener failures do not stop delivery and are returned as a batch.
    pub fn process(&mut self, raw: &[u8]) -> Result<Vec<ListenerError>, DecodeError> {
        let mut state = match self.decoder.decode(raw) {
            Ok(state) => state,
            Err(e) => {
                self.dropped += 1;
                warn!("Dropping frame: {}", e);
                return Err(e);
            }
        };
        self.frames += 1;

        if let Some(calibrator) = self.calibrator.as_mut() {
            calibrator.apply(&mut state);
        }
        self.state_sender.send_replace(state);

        let delta = self.tracker.update(&state);
        if delta.is_empty() {
            return Ok(Vec::new());
        }
        self.apply_default_bindings(&delta);
        Ok(self.dispatcher.dispatch(&delta))
    }

    pub fn apply_command(&mut self, command: CalibrationCommand) {
        match self.calibrator.as_mut() {
            Some(calibrator) => match command {
                CalibrationCommand::CentreAxes => calibrator.set_axis_centres(),
                CalibrationCommand::Reset => calibrator.reset(),
            },
            None => debug!("Ignoring {:?}: calibration is disabled", command),
        }
    }

    fn apply_default_bindings(&mut self, delta: &StateDelta) {
        let bound = self
            .calibrator
            .as_ref()
            .is_some_and(|c| c.settings().bind_default_buttons);
        if !bound {
            return;
        }
        if delta.was_pressed(Button::Start) {
            self.apply_command(CalibrationCommand::Reset);
        }
        if delta.was_pressed(Button::Select) {
            self.apply_command(CalibrationCommand::CentreAxes);
        }
    }
}
