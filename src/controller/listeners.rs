//! Ready-made [`Listener`] implementations.

use crate::controller::event_dispatcher::{ControllerEvent, InputChange, Listener};
use crate::controller::state::{Button, ButtonSet};
use color_eyre::eyre::eyre;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, Level};

/// Wraps a closure.
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: FnMut(&ControllerEvent) -> color_eyre::Result<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Listener for FnListener<F>
where
    F: FnMut(&ControllerEvent) -> color_eyre::Result<()> + Send,
{
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        (self.0)(event)
    }
}

/// Forwards events into a bounded tokio channel for another task or thread.
///
/// Uses `try_send`, so a slow consumer never stalls the read loop; a full or
/// closed channel is reported as a listener failure instead.
pub struct ChannelListener {
    sender: mpsc::Sender<ControllerEvent>,
}

impl ChannelListener {
    pub fn new(sender: mpsc::Sender<ControllerEvent>) -> Self {
        Self { sender }
    }

    /// Creates the listener together with the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        debug!("Created event channel with buffer capacity {}", capacity);
        (Self::new(sender), receiver)
    }
}

impl Listener for ChannelListener {
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        self.sender
            .try_send(event.clone())
            .map_err(|e| eyre!("Failed to forward event: {}", e))
    }
}

/// Writes every event to the tracing log.
pub struct LogListener {
    level: Level,
}

impl LogListener {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl Default for LogListener {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl Listener for LogListener {
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        if self.level == Level::TRACE {
            trace!("Controller event: {}", event);
        } else if self.level == Level::DEBUG {
            debug!("Controller event: {}", event);
        } else {
            info!("Controller event: {}", event);
        }
        Ok(())
    }
}

/// Passes on only the events accepted by a predicate.
pub struct FilteredListener {
    predicate: Box<dyn Fn(&ControllerEvent) -> bool + Send>,
    inner: Box<dyn Listener>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl Fn(&ControllerEvent) -> bool + Send + 'static,
        inner: impl Listener + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner: Box::new(inner),
        }
    }
}

impl Listener for FilteredListener {
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        if (self.predicate)(event) {
            self.inner.on_event(event)
        } else {
            Ok(())
        }
    }
}

/// Calls a handler with the button whenever one of `buttons` is pressed.
pub struct ButtonHandler<F> {
    buttons: ButtonSet,
    handler: F,
}

impl<F> ButtonHandler<F>
where
    F: FnMut(Button) -> color_eyre::Result<()> + Send,
{
    pub fn new(buttons: impl IntoIterator<Item = Button>, handler: F) -> Self {
        Self {
            buttons: buttons.into_iter().collect(),
            handler,
        }
    }
}

impl<F> Listener for ButtonHandler<F>
where
    F: FnMut(Button) -> color_eyre::Result<()> + Send,
{
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        match event.change {
            InputChange::ButtonPressed(button) if self.buttons.contains(button.into()) => {
                (self.handler)(button)
            }
            _ => Ok(()),
        }
    }
}

/// Remembers every button pressed since the last [`PressLatch::take`].
#[derive(Clone, Default)]
pub struct PressLatch {
    pressed: Arc<Mutex<ButtonSet>>,
}

impl PressLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buttons pressed since the previous call and clears the record.
    pub fn take(&self) -> ButtonSet {
        let mut pressed = self.pressed.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pressed)
    }

    pub fn peek(&self) -> ButtonSet {
        *self.pressed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Listener for PressLatch {
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
        if let InputChange::ButtonPressed(button) = event.change {
            self.pressed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(button.into());
        }
        Ok(())
    }
}
