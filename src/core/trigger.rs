//! Trigger detector
//!
//! Two monitor scopes are needed to see the trigger everywhere: a global one
//! for events sent to other applications and a local one for the host's own
//! windows. The handlers run on the system's delivery thread and only forward
//! matching input into the event queue; debouncing happens on the queue side.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::hotkey::{Chord, PointerGesture};
use super::permission::PermissionGate;
use crate::shared::error::OverlayResult;
use crate::shared::events::{EventSender, OverlayEvent};
use crate::shared::settings::TriggerSettings;
use crate::shared::types::{InputEvent, Point};
use crate::system::platform::{Disposition, EventKind, EventTap, MonitorScope, Subscription};

/// What fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Key chord; the overlay opens at the current pointer location.
    Chord,
    /// Pointer gesture at this location.
    Pointer(Point),
}

/// Parsed, immutable snapshot of the binding shared with delivery-side handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub chord: Chord,
    pub gesture: Option<PointerGesture>,
    pub debounce: Duration,
}

impl Binding {
    pub fn from_settings(settings: &TriggerSettings) -> OverlayResult<Self> {
        let chord = settings.hotkey.parse::<Chord>()?;
        let gesture = match &settings.pointer_gesture {
            Some(gesture) => Some(gesture.parse::<PointerGesture>()?),
            None => None,
        };
        Ok(Self {
            chord,
            gesture,
            debounce: settings.debounce(),
        })
    }

    pub fn matches(&self, event: &InputEvent) -> bool {
        self.chord.matches(event) || self.gesture.map_or(false, |g| g.matches(event))
    }
}

pub struct TriggerDetector {
    binding: Arc<Binding>,
    events: EventSender,
    subscriptions: Vec<Subscription>,
    global: bool,
    armed_until: Option<Instant>,
    rearm_token: u64,
    rearm_task: Option<JoinHandle<()>>,
}

impl TriggerDetector {
    pub fn new(settings: &TriggerSettings, events: EventSender) -> OverlayResult<Self> {
        Ok(Self {
            binding: Arc::new(Binding::from_settings(settings)?),
            events,
            subscriptions: Vec::new(),
            global: false,
            armed_until: None,
            rearm_token: 0,
            rearm_task: None,
        })
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn is_running(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Whether the global monitors are installed (permission was granted at start).
    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn start(&mut self, tap: &dyn EventTap, gate: &PermissionGate) -> OverlayResult<()> {
        self.stop();

        let mut scopes = vec![MonitorScope::Local];
        if gate.has_permission() {
            scopes.push(MonitorScope::Global);
        } else {
            tracing::warn!("Accessibility permission missing; trigger only works while this app is focused");
        }

        for scope in scopes {
            match self.install(tap, scope) {
                Ok(()) => self.global |= scope == MonitorScope::Global,
                Err(e) if scope == MonitorScope::Local => {
                    self.stop();
                    return Err(e);
                }
                Err(e) => tracing::warn!("Global trigger monitor unavailable, staying local: {}", e),
            }
        }

        tracing::info!(
            "Trigger detector started: {} ({})",
            self.binding.chord,
            if self.global { "global" } else { "local only" }
        );
        Ok(())
    }

    fn install(&mut self, tap: &dyn EventTap, scope: MonitorScope) -> OverlayResult<()> {
        let mut installed = Vec::new();

        let binding = self.binding.clone();
        let events = self.events.clone();
        let keys = tap.monitor(
            scope,
            EventKind::KeyDown,
            Box::new(move |event| {
                if binding.chord.matches(event) {
                    events.publish(OverlayEvent::TriggerInput(*event));
                    // Keep the chord from reaching the host's own key window
                    Disposition::Consume
                } else {
                    Disposition::Pass
                }
            }),
        )?;
        installed.push(keys);

        if self.binding.gesture.is_some() {
            let binding = self.binding.clone();
            let events = self.events.clone();
            let pointer = tap.monitor(
                scope,
                EventKind::PointerDown,
                Box::new(move |event| {
                    if binding.gesture.map_or(false, |g| g.matches(event)) {
                        events.publish(OverlayEvent::TriggerInput(*event));
                    }
                    Disposition::Pass
                }),
            )?;
            installed.push(pointer);
        }

        self.subscriptions.extend(installed);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.subscriptions.is_empty() {
            tracing::debug!("Stopping trigger detector ({} monitors)", self.subscriptions.len());
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        if let Some(task) = self.rearm_task.take() {
            task.abort();
        }
        self.armed_until = None;
        self.global = false;
    }

    /// Debounce a forwarded event. Returns the trigger for the first qualifying
    /// event of a window and `None` for the rest of the burst.
    pub fn process(&mut self, event: &InputEvent, now: Instant) -> Option<Trigger> {
        // The binding may have changed while the event sat in the queue
        if !self.binding.matches(event) {
            return None;
        }

        if self.is_armed(now) {
            tracing::debug!("Trigger swallowed inside debounce window");
            return None;
        }

        self.arm(now);
        match *event {
            InputEvent::PointerDown { location, .. } => Some(Trigger::Pointer(location)),
            InputEvent::KeyDown { .. } => Some(Trigger::Chord),
        }
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        self.armed_until.map_or(false, |until| now < until)
    }

    fn arm(&mut self, now: Instant) {
        let window = self.binding.debounce;
        self.armed_until = Some(now + window);
        self.rearm_token += 1;

        if let Some(task) = self.rearm_task.take() {
            task.abort();
        }
        let token = self.rearm_token;
        let events = self.events.clone();
        self.rearm_task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            events.publish(OverlayEvent::TriggerRearm { token });
        }));
    }

    /// Timer side of the debounce. Tokens from superseded windows are ignored.
    pub fn rearm(&mut self, token: u64) {
        if token == self.rearm_token {
            self.armed_until = None;
            self.rearm_task = None;
        }
    }

    /// Switch to a new binding. An unparsable binding keeps the current one.
    pub fn rebind(&mut self, settings: &TriggerSettings, tap: &dyn EventTap, gate: &PermissionGate) {
        let binding = match Binding::from_settings(settings) {
            Ok(binding) => binding,
            Err(e) => {
                tracing::warn!("Keeping trigger {}: {}", self.binding.chord, e);
                return;
            }
        };
        if *self.binding == binding {
            return;
        }

        tracing::info!("Rebinding trigger: {} -> {}", self.binding.chord, binding.chord);
        let was_running = self.is_running();
        self.stop();
        self.binding = Arc::new(binding);

        if was_running {
            if let Err(e) = self.start(tap, gate) {
                tracing::error!("Failed to restart trigger detector: {}", e);
            }
        }
    }
}

impl Drop for TriggerDetector {
    fn drop(&mut self) {
        if let Some(task) = self.rearm_task.take() {
            task.abort();
        }
    }
}
