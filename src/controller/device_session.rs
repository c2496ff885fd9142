//! Device session: owns a transport and runs the read loop
//!
//! The loop is a statum machine:
//!
//! ```text
//!            open ok                  transient read error
//! Connecting ──────► Connected ───────────────────────────► Reconnecting
//!     │                  ▲                                      │
//!     │ open error       └────────── reopen ok ─────────────────┘
//!     ▼                                                         │ attempts exhausted
//! Disconnected ◄────────────────────────────────────────────────┘
//! ```
//!
//! `close()` cancels whatever state the loop is in and always ends in
//! `Disconnected`.

use crate::config::{ConfigError, SessionConfig};
use crate::controller::event_dispatcher::{
    EventDispatcher, EventKinds, Listener, ListenerError, ListenerHandle,
};
use crate::controller::listeners::ButtonHandler;
use crate::controller::pipeline::{CalibrationCommand, ReportPipeline};
use crate::controller::report_decoder::DecodeError;
use crate::controller::state::{Button, ControllerState};
use crate::controller::transport::Transport;
use chrono::Local;
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 8;

/// How a session recovers from a lost device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Reopen attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt, doubled on each further attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts
    pub max_backoff_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl ReconnectSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "reconnect.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "reconnect.initial_backoff_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before the given attempt, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }
}

/// Connection state as seen from outside the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }
}

// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidConfiguration(#[from] ConfigError),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Connection lost after {attempts} reconnect attempts: {cause}")]
    ConnectionLost { attempts: u32, cause: String },

    #[error("Session is already open")]
    AlreadyOpen,

    #[error("Session has been closed")]
    Closed,

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

/// Outcomes the read loop reports without stopping.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    DroppedFrame(DecodeError),
    ListenerFailures(Vec<ListenerError>),
    Reconnecting { attempt: u32, cause: String },
    Reconnected { attempts: u32 },
    ConnectionLost { attempts: u32, cause: String },
}

/// Read failures that are worth a reconnect.
pub fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Unsupported
    )
}

// Reopen failures that end a reconnect cycle early
fn is_fatal_reopen(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    )
}

// Why the link went down
#[derive(Debug, Clone)]
pub struct LinkFailure {
    cause: String,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting(LinkFailure),
}

#[machine]
#[derive(Debug)]
pub struct SessionDriver<S: LinkState> {
    transport: Box<dyn Transport>,
    pipeline: ReportPipeline,
    reconnect: ReconnectSettings,
    status: Arc<watch::Sender<SessionStatus>>,
    notices: mpsc::Sender<SessionNotice>,
    commands: mpsc::Receiver<CalibrationCommand>,
    cancel: CancellationToken,
}

// What woke the connected loop
enum Step {
    Report(Vec<u8>),
    ReadFailed(io::Error),
    Command(CalibrationCommand),
    Cancelled,
}

// How a reconnect cycle ended
enum Reconnect {
    Restored(SessionDriver<Connected>),
    Lost(SessionDriver<Reconnecting>, SessionError),
    Cancelled(SessionDriver<Reconnecting>),
}

impl<S: LinkState> SessionDriver<S> {
    fn set_status(&self, status: SessionStatus) {
        debug!("Session status: {:?}", status);
        self.status.send_replace(status);
    }

    fn notify(&self, notice: SessionNotice) {
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(notice)) => {
                warn!("Notice channel full, dropping {:?}", notice);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Notice receiver gone");
            }
        }
    }

    // Releases the transport and hands back the pipeline
    async fn shutdown(mut self) -> ReportPipeline {
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close {}: {}", self.transport.describe(), e);
        }
        self.set_status(SessionStatus::Disconnected);
        info!("Session on {} shut down", self.transport.describe());
        self.pipeline
    }
}

impl SessionDriver<Connecting> {
    fn create(
        transport: Box<dyn Transport>,
        pipeline: ReportPipeline,
        reconnect: ReconnectSettings,
        status: Arc<watch::Sender<SessionStatus>>,
        notices: mpsc::Sender<SessionNotice>,
        commands: mpsc::Receiver<CalibrationCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(transport, pipeline, reconnect, status, notices, commands, cancel)
    }

    // On failure the pipeline comes back so the session can be opened again
    async fn connect(
        mut self,
    ) -> Result<SessionDriver<Connected>, (SessionError, ReportPipeline)> {
        let name = self.transport.describe();
        self.set_status(SessionStatus::Connecting);
        info!("Opening {}", name);

        match self.transport.open().await {
            Ok(()) => {
                info!("Connected to {}", name);
                self.set_status(SessionStatus::Connected);
                Ok(self.transition())
            }
            Err(e) => {
                error!("Failed to open {}: {}", name, e);
                let pipeline = self.shutdown().await;
                Err((
                    SessionError::TransportUnavailable(format!("{}: {}", name, e)),
                    pipeline,
                ))
            }
        }
    }
}

impl SessionDriver<Connected> {
    async fn next_step(&mut self) -> Step {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            Some(command) = self.commands.recv() => Step::Command(command),
            result = self.transport.read_report() => match result {
                Ok(raw) => Step::Report(raw),
                Err(e) => Step::ReadFailed(e),
            },
        }
    }

    fn handle_report(&mut self, raw: &[u8]) {
        match self.pipeline.process(raw) {
            Ok(failures) if failures.is_empty() => {}
            Ok(failures) => self.notify(SessionNotice::ListenerFailures(failures)),
            Err(e) => self.notify(SessionNotice::DroppedFrame(e)),
        }
    }

    fn begin_reconnect(self, cause: io::Error) -> SessionDriver<Reconnecting> {
        warn!(
            "Read from {} failed: {}, reconnecting",
            self.transport.describe(),
            cause
        );
        self.transition_with(LinkFailure {
            cause: cause.to_string(),
        })
    }
}

impl SessionDriver<Reconnecting> {
    async fn reconnect(mut self) -> Reconnect {
        let mut cause = self
            .get_state_data()
            .map(|failure| failure.cause.clone())
            .unwrap_or_default();
        let max_attempts = self.reconnect.max_attempts;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            self.set_status(SessionStatus::Reconnecting { attempt: attempts });
            self.notify(SessionNotice::Reconnecting {
                attempt: attempts,
                cause: cause.clone(),
            });

            let delay = self.reconnect.backoff(attempts);
            info!(
                "Reconnect attempt {}/{} in {} ms",
                attempts,
                max_attempts,
                delay.as_millis()
            );
            let cancelled = tokio::select! {
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                return Reconnect::Cancelled(self);
            }

            if let Err(e) = self.transport.close().await {
                debug!("Close before reopen failed: {}", e);
            }
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.transport.open() => Some(result),
            };
            match opened {
                None => return Reconnect::Cancelled(self),
                Some(Ok(())) => {
                    info!(
                        "Reconnected to {} after {} attempts",
                        self.transport.describe(),
                        attempts
                    );
                    self.set_status(SessionStatus::Connected);
                    self.notify(SessionNotice::Reconnected { attempts });
                    return Reconnect::Restored(self.transition());
                }
                Some(Err(e)) => {
                    warn!("Reconnect attempt {} failed: {}", attempts, e);
                    cause = e.to_string();
                    if is_fatal_reopen(&e) {
                        break;
                    }
                }
            }
        }

        error!("Giving up on {} after {} attempts", self.transport.describe(), attempts);
        Reconnect::Lost(self, SessionError::ConnectionLost { attempts, cause })
    }
}

// Read loop throughput, logged every 10 seconds
struct LoopStats {
    reports: u64,
    since: chrono::DateTime<Local>,
}

impl LoopStats {
    const INTERVAL_SECS: i64 = 10;

    fn new() -> Self {
        Self {
            reports: 0,
            since: Local::now(),
        }
    }

    fn record(&mut self) {
        self.reports += 1;
        let now = Local::now();
        let elapsed = now - self.since;
        if elapsed > chrono::Duration::seconds(Self::INTERVAL_SECS) {
            let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
            info!(
                "Session stats: {} reports in {:.1} seconds ({:.2}/sec)",
                self.reports,
                seconds,
                self.reports as f64 / seconds
            );
            self.reports = 0;
            self.since = now;
        }
    }
}

async fn run_session(
    mut driver: SessionDriver<Connected>,
) -> (ReportPipeline, Result<(), SessionError>) {
    info!("Starting read loop on {}", driver.transport.describe());
    let mut stats = LoopStats::new();

    loop {
        match driver.next_step().await {
            Step::Report(raw) => {
                driver.handle_report(&raw);
                stats.record();
            }
            Step::Command(command) => {
                debug!("Applying {:?}", command);
                driver.pipeline.apply_command(command);
            }
            Step::Cancelled => {
                info!("Read loop cancelled");
                return (driver.shutdown().await, Ok(()));
            }
            Step::ReadFailed(e) if is_transient(&e) => {
                match driver.begin_reconnect(e).reconnect().await {
                    Reconnect::Restored(restored) => driver = restored,
                    Reconnect::Cancelled(stopped) => {
                        info!("Reconnect cancelled");
                        return (stopped.shutdown().await, Ok(()));
                    }
                    Reconnect::Lost(lost, err) => {
                        if let SessionError::ConnectionLost { attempts, cause } = &err {
                            lost.notify(SessionNotice::ConnectionLost {
                                attempts: *attempts,
                                cause: cause.clone(),
                            });
                        }
                        return (lost.shutdown().await, Err(err));
                    }
                }
            }
            Step::ReadFailed(e) => {
                error!(
                    "Fatal read error on {}: {}",
                    driver.transport.describe(),
                    e
                );
                let cause = e.to_string();
                driver.notify(SessionNotice::ConnectionLost {
                    attempts: 0,
                    cause: cause.clone(),
                });
                let pipeline = driver.shutdown().await;
                return (pipeline, Err(SessionError::ConnectionLost { attempts: 0, cause }));
            }
        }
    }
}

/// One controller, one transport, one read loop.
///
/// Listeners can be added before or after [`DeviceSession::open`]. Each
/// session has its own dispatcher, tracker and channels, so several
/// sessions can run side by side.
///
/// # Examples
///
/// ```no_run
/// use sixaxis::config::SessionConfig;
/// use sixaxis::controller::{DeviceSession, EventKinds, HidrawTransport, LogListener};
///
/// # async fn run() -> Result<(), sixaxis::controller::SessionError> {
/// let mut session = DeviceSession::new(SessionConfig::default())?;
/// session.subscribe(EventKinds::all(), LogListener::default());
/// session.open(HidrawTransport::new("/dev/hidraw0")).await?;
/// // ...
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceSession {
    config: SessionConfig,
    dispatcher: Arc<EventDispatcher>,
    // Present while the read loop is not running
    pipeline: Option<ReportPipeline>,
    state_receiver: watch::Receiver<ControllerState>,
    status: Arc<watch::Sender<SessionStatus>>,
    notice_sender: mpsc::Sender<SessionNotice>,
    notice_receiver: Option<mpsc::Receiver<SessionNotice>>,
    command_sender: Option<mpsc::Sender<CalibrationCommand>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<(ReportPipeline, Result<(), SessionError>)>>,
    closed: bool,
}

impl DeviceSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let dispatcher = Arc::new(EventDispatcher::new());
        let pipeline = ReportPipeline::new(&config, dispatcher.clone())?;
        let state_receiver = pipeline.subscribe_state();
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        let (notice_sender, notice_receiver) = mpsc::channel(config.notice_capacity);
        debug!(
            "Created session for {} with {} byte reports",
            pipeline.decoder().profile().name,
            pipeline.decoder().report_len()
        );

        Ok(Self {
            config,
            dispatcher,
            pipeline: Some(pipeline),
            state_receiver,
            status: Arc::new(status),
            notice_sender,
            notice_receiver: Some(notice_receiver),
            command_sender: None,
            cancel: CancellationToken::new(),
            task: None,
            closed: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the transport and starts the read loop.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(&mut self, transport: impl Transport + 'static) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(SessionError::AlreadyOpen);
        }
        // Reclaim the pipeline from a loop that ended on its own
        if self.task.is_some() {
            if let Err(e) = self.join().await {
                debug!("Previous read loop ended with: {}", e);
            }
        }
        let pipeline = self.pipeline.take().ok_or_else(|| {
            SessionError::TaskFailed("read loop did not return its pipeline".to_string())
        })?;

        let (command_sender, command_receiver) = mpsc::channel(COMMAND_CAPACITY);
        let driver = SessionDriver::<Connecting>::create(
            Box::new(transport),
            pipeline,
            self.config.reconnect.clone(),
            self.status.clone(),
            self.notice_sender.clone(),
            command_receiver,
            self.cancel.clone(),
        );

        match driver.connect().await {
            Ok(connected) => {
                self.command_sender = Some(command_sender);
                let task = tokio::spawn(run_session(connected));
                debug!("Read loop spawned: {:?}", task);
                self.task = Some(task);
                Ok(())
            }
            Err((err, pipeline)) => {
                self.pipeline = Some(pipeline);
                Err(err)
            }
        }
    }

    /// Waits for the read loop to end and returns how it ended.
    ///
    /// Returns immediately if the loop is not running. The task handle stays
    /// in place until the loop has finished, so dropping this future leaves
    /// the loop reachable for a later `join` or `close`.
    pub async fn join(&mut self) -> Result<(), SessionError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        self.command_sender = None;
        match joined {
            Ok((pipeline, result)) => {
                self.pipeline = Some(pipeline);
                result
            }
            Err(e) => {
                error!("Read loop task failed: {}", e);
                self.status.send_replace(SessionStatus::Disconnected);
                Err(SessionError::TaskFailed(e.to_string()))
            }
        }
    }

    /// Stops the read loop, releases the transport and removes all listeners.
    ///
    /// The session cannot be opened again afterwards. Returns the loop's
    /// error if it had already ended with one.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        info!("Closing session");
        self.cancel.cancel();
        let result = self.join().await;
        let removed = self.dispatcher.clear();
        debug!("Removed {} listeners", removed);
        self.closed = true;
        self.status.send_replace(SessionStatus::Disconnected);
        result
    }

    pub fn subscribe(
        &self,
        kinds: impl Into<EventKinds>,
        listener: impl Listener + 'static,
    ) -> ListenerHandle {
        self.dispatcher.subscribe(kinds, listener)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    /// Calls `handler` whenever one of `buttons` is pressed.
    pub fn on_press<F>(
        &self,
        buttons: impl IntoIterator<Item = Button>,
        handler: F,
    ) -> ListenerHandle
    where
        F: FnMut(Button) -> color_eyre::Result<()> + Send + 'static,
    {
        self.dispatcher
            .subscribe(EventKinds::BUTTONS, ButtonHandler::new(buttons, handler))
    }

    /// Shared dispatcher, for subscribing from other threads.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    /// Latest decoded state.
    pub fn state(&self) -> ControllerState {
        *self.state_receiver.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_receiver.clone()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Takes the notice receiver. Only the first call returns it.
    pub fn notices(&mut self) -> Option<mpsc::Receiver<SessionNotice>> {
        self.notice_receiver.take()
    }

    /// Treats the current stick positions as centre.
    pub fn centre_axes(&mut self) {
        self.calibrate(CalibrationCommand::CentreAxes);
    }

    /// Forgets learned stick ranges and centres.
    pub fn reset_calibration(&mut self) {
        self.calibrate(CalibrationCommand::Reset);
    }

    fn calibrate(&mut self, command: CalibrationCommand) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.apply_command(command);
            return;
        }
        if let Some(sender) = &self.command_sender {
            if let Err(e) = sender.try_send(command) {
                warn!("Failed to queue {:?}: {}", command, e);
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
