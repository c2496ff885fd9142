//! Event fan-out to registered listeners
//!
//! The dispatcher turns a [`StateDelta`] into [`ControllerEvent`]s and hands
//! them to every listener whose [`EventKinds`] match.
//!
//! # Ordering
//!
//! Events go out buttons first, then stick axes, then pressure, then motion,
//! each group in canonical order. Every listener sees an event (in
//! subscription order) before the next event is delivered.
//!
//! # Failures
//!
//! A listener that returns an error or panics never blocks delivery to the
//! others. All failures of one `dispatch` call come back as a list of
//! [`ListenerError`]s once every listener has been attempted.
//!
//! # Threading
//!
//! `subscribe` / `unsubscribe` may be called from any thread. `dispatch`
//! works on a copy of the registration list taken when it starts, so a change
//! made meanwhile applies from the next `dispatch` on.

use crate::controller::state::{Axis, Button, MotionAxis};
use crate::controller::state_tracker::{ButtonChange, StateDelta};
use bitflags::bitflags;
use chrono::{DateTime, Local};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

bitflags! {
    /// Event groups a listener subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventKinds: u8 {
        const BUTTONS = 1 << 0;
        const AXES = 1 << 1;
        const PRESSURE = 1 << 2;
        const MOTION = 1 << 3;
    }
}

impl Default for EventKinds {
    fn default() -> Self {
        EventKinds::all()
    }
}

// Kind of a single event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ButtonPressed,
    ButtonReleased,
    AxisChanged,
    PressureChanged,
    MotionChanged,
}

impl EventKind {
    /// Subscription group this kind belongs to.
    pub fn group(self) -> EventKinds {
        match self {
            EventKind::ButtonPressed | EventKind::ButtonReleased => EventKinds::BUTTONS,
            EventKind::AxisChanged => EventKinds::AXES,
            EventKind::PressureChanged => EventKinds::PRESSURE,
            EventKind::MotionChanged => EventKinds::MOTION,
        }
    }
}

impl From<EventKind> for EventKinds {
    fn from(kind: EventKind) -> Self {
        kind.group()
    }
}

impl FromIterator<EventKind> for EventKinds {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(EventKinds::empty(), |acc, kind| acc | kind.group())
    }
}

// Changed field and its new value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputChange {
    ButtonPressed(Button),
    ButtonReleased(Button),
    AxisChanged { axis: Axis, value: f32 },
    PressureChanged { button: Button, value: f32 },
    MotionChanged { axis: MotionAxis, value: f32 },
}

impl InputChange {
    pub fn kind(&self) -> EventKind {
        match self {
            InputChange::ButtonPressed(_) => EventKind::ButtonPressed,
            InputChange::ButtonReleased(_) => EventKind::ButtonReleased,
            InputChange::AxisChanged { .. } => EventKind::AxisChanged,
            InputChange::PressureChanged { .. } => EventKind::PressureChanged,
            InputChange::MotionChanged { .. } => EventKind::MotionChanged,
        }
    }
}

/// One delivered change with the time it was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerEvent {
    pub change: InputChange,
    pub timestamp: DateTime<Local>,
}

impl ControllerEvent {
    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.timestamp.format("%H:%M:%S.%3f");
        match self.change {
            InputChange::ButtonPressed(button) => write!(f, "{:?} pressed at {}", button, at),
            InputChange::ButtonReleased(button) => write!(f, "{:?} released at {}", button, at),
            InputChange::AxisChanged { axis, value } => {
                write!(f, "{:?} = {:.3} at {}", axis, value, at)
            }
            InputChange::PressureChanged { button, value } => {
                write!(f, "{:?} pressure = {:.3} at {}", button, value, at)
            }
            InputChange::MotionChanged { axis, value } => {
                write!(f, "{:?} = {:.3} at {}", axis, value, at)
            }
        }
    }
}

/// Receives controller events.
///
/// Returning an error marks this delivery as failed; the dispatcher keeps
/// going and reports it afterwards.
pub trait Listener: Send {
    fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()>;
}

/// Opaque registration id returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// A listener failed while handling one event.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{handle} failed on {event}: {message}")]
pub struct ListenerError {
    pub handle: ListenerHandle,
    pub event: ControllerEvent,
    pub message: String,
}

type SharedListener = Arc<Mutex<Box<dyn Listener>>>;

#[derive(Clone)]
struct Registration {
    handle: ListenerHandle,
    kinds: EventKinds,
    listener: SharedListener,
}

/// Listener registry and synchronous event delivery.
pub struct EventDispatcher {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Registration>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            registrations: Mutex::new(Vec::new()),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener for the given event groups.
    pub fn subscribe(
        &self,
        kinds: impl Into<EventKinds>,
        listener: impl Listener + 'static,
    ) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kinds = kinds.into();
        self.registrations().push(Registration {
            handle,
            kinds,
            listener: Arc::new(Mutex::new(Box::new(listener))),
        });
        debug!("Subscribed {} for {:?}", handle, kinds);
        handle
    }

    /// Removes a registration. Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut registrations = self.registrations();
        let before = registrations.len();
        registrations.retain(|r| r.handle != handle);
        let removed = registrations.len() != before;
        if removed {
            debug!("Unsubscribed {}", handle);
        }
        removed
    }

    /// Removes every registration, returning how many there were.
    pub fn clear(&self) -> usize {
        let removed = self.registrations().drain(..).count();
        debug!("Cleared {} listeners", removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.registrations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expands a delta into events in delivery order.
    pub fn events_for(delta: &StateDelta) -> Vec<ControllerEvent> {
        let timestamp = Local::now();
        let buttons = delta.buttons.iter().map(|(button, change)| match change {
            ButtonChange::Pressed => InputChange::ButtonPressed(*button),
            ButtonChange::Released => InputChange::ButtonReleased(*button),
        });
        let axes = delta
            .axes
            .iter()
            .map(|(axis, value)| InputChange::AxisChanged {
                axis: *axis,
                value: *value,
            });
        let pressure = delta
            .pressure
            .iter()
            .map(|(button, value)| InputChange::PressureChanged {
                button: *button,
                value: *value,
            });
        let motion = delta
            .motion
            .iter()
            .map(|(axis, value)| InputChange::MotionChanged {
                axis: *axis,
                value: *value,
            });

        buttons
            .chain(axes)
            .chain(pressure)
            .chain(motion)
            .map(|change| ControllerEvent { change, timestamp })
            .collect()
    }

    /// Delivers every change in `delta`; returns the failures collected on the way.
    pub fn dispatch(&self, delta: &StateDelta) -> Vec<ListenerError> {
        if delta.is_empty() {
            return Vec::new();
        }
        let snapshot: Vec<Registration> = self.registrations().clone();
        let mut failures = Vec::new();

        for event in Self::events_for(delta) {
            let group = event.kind().group();
            for registration in snapshot.iter().filter(|r| r.kinds.intersects(group)) {
                if let Err(message) = deliver(&registration.listener, &event) {
                    warn!("{} failed on {}: {}", registration.handle, event, message);
                    failures.push(ListenerError {
                        handle: registration.handle,
                        event: event.clone(),
                        message,
                    });
                }
            }
        }

        failures
    }
}

fn deliver(listener: &SharedListener, event: &ControllerEvent) -> Result<(), String> {
    let mut guard = listener.lock().unwrap_or_else(PoisonError::into_inner);
    match panic::catch_unwind(AssertUnwindSafe(|| guard.on_event(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(report)) => Err(format!("{:#}", report)),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("listener panicked: {}", reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    // Records every change it sees
    struct Recorder(Arc<Mutex<Vec<(&'static str, InputChange)>>>, &'static str);

    impl Listener for Recorder {
        fn on_event(&mut self, event: &ControllerEvent) -> color_eyre::Result<()> {
            self.0.lock().unwrap().push((self.1, event.change));
            Ok(())
        }
    }

    struct Failing;

    impl Listener for Failing {
        fn on_event(&mut self, _event: &ControllerEvent) -> color_eyre::Result<()> {
            Err(eyre!("broken sink"))
        }
    }

    struct Panicking;

    impl Listener for Panicking {
        fn on_event(&mut self, _event: &ControllerEvent) -> color_eyre::Result<()> {
            panic!("listener exploded");
        }
    }

    fn mixed_delta() -> StateDelta {
        StateDelta {
            buttons: vec![
                (Button::Start, ButtonChange::Pressed),
                (Button::Cross, ButtonChange::Released),
            ],
            axes: vec![(Axis::LeftStickX, 0.6)],
            pressure: vec![(Button::Cross, 0.0)],
            motion: vec![(MotionAxis::AccelZ, 0.2)],
        }
    }

    #[test]
    fn test_delivery_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKinds::all(), Recorder(log.clone(), "a"));
        dispatcher.subscribe(EventKinds::all(), Recorder(log.clone(), "b"));

        let failures = dispatcher.dispatch(&mixed_delta());
        assert!(failures.is_empty());

        let log = log.lock().unwrap();
        let expected = [
            InputChange::ButtonPressed(Button::Start),
            InputChange::ButtonReleased(Button::Cross),
            InputChange::AxisChanged {
                axis: Axis::LeftStickX,
                value: 0.6,
            },
            InputChange::PressureChanged {
                button: Button::Cross,
                value: 0.0,
            },
            InputChange::MotionChanged {
                axis: MotionAxis::AccelZ,
                value: 0.2,
            },
        ];
        assert_eq!(log.len(), expected.len() * 2);
        for (i, change) in expected.iter().enumerate() {
            assert_eq!(log[2 * i], ("a", *change));
            assert_eq!(log[2 * i + 1], ("b", *change));
        }
    }

    #[test]
    fn test_kind_filter() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKinds::AXES, Recorder(log.clone(), "axes"));
        dispatcher.subscribe(EventKind::ButtonPressed, Recorder(log.clone(), "buttons"));

        dispatcher.dispatch(&mixed_delta());

        let log = log.lock().unwrap();
        let axes = log.iter().filter(|(who, _)| *who == "axes").count();
        let buttons = log.iter().filter(|(who, _)| *who == "buttons").count();
        assert_eq!(axes, 1);
        // Button group covers presses and releases
        assert_eq!(buttons, 2);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        let failing = dispatcher.subscribe(EventKinds::BUTTONS, Failing);
        let panicking = dispatcher.subscribe(EventKinds::BUTTONS, Panicking);
        dispatcher.subscribe(EventKinds::BUTTONS, Recorder(log.clone(), "ok"));

        let delta = StateDelta {
            buttons: vec![(Button::Circle, ButtonChange::Pressed)],
            ..Default::default()
        };
        let failures = dispatcher.dispatch(&delta);

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].handle, failing);
        assert!(failures[0].message.contains("broken sink"));
        assert_eq!(failures[1].handle, panicking);
        assert!(failures[1].message.contains("listener exploded"));
        assert_eq!(
            failures[0].event.change,
            InputChange::ButtonPressed(Button::Circle)
        );
    }

    #[test]
    fn test_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        let handle = dispatcher.subscribe(EventKinds::all(), Recorder(log.clone(), "a"));
        assert!(dispatcher.unsubscribe(handle));
        assert!(!dispatcher.unsubscribe(handle));
        dispatcher.dispatch(&mixed_delta());
        assert!(log.lock().unwrap().is_empty());
    }

    // Unsubscribes its sibling on the first event it sees
    struct Unsubscriber {
        dispatcher: Arc<EventDispatcher>,
        target: Arc<Mutex<Option<ListenerHandle>>>,
    }

    impl Listener for Unsubscriber {
        fn on_event(&mut self, _event: &ControllerEvent) -> color_eyre::Result<()> {
            if let Some(handle) = self.target.lock().unwrap().take() {
                self.dispatcher.unsubscribe(handle);
            }
            Ok(())
        }
    }

    #[test]
    fn test_unsubscribe_during_dispatch_applies_next_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(EventDispatcher::new());
        let target = Arc::new(Mutex::new(None));
        dispatcher.subscribe(
            EventKinds::all(),
            Unsubscriber {
                dispatcher: dispatcher.clone(),
                target: target.clone(),
            },
        );
        let victim = dispatcher.subscribe(EventKinds::all(), Recorder(log.clone(), "victim"));
        *target.lock().unwrap() = Some(victim);

        dispatcher.dispatch(&mixed_delta());
        assert_eq!(log.lock().unwrap().len(), 5);
        assert_eq!(dispatcher.len(), 1);

        dispatcher.dispatch(&mixed_delta());
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_clear() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKinds::all(), Failing);
        dispatcher.subscribe(EventKinds::all(), Failing);
        assert_eq!(dispatcher.clear(), 2);
        assert!(dispatcher.is_empty());
        assert!(dispatcher.dispatch(&mixed_delta()).is_empty());
    }

    #[test]
    fn test_kinds_from_iter() {
        let kinds: EventKinds = [EventKind::AxisChanged, EventKind::ButtonReleased]
            .into_iter()
            .collect();
        assert_eq!(kinds, EventKinds::AXES | EventKinds::BUTTONS);
    }
}
