//! Overlay lifecycle manager
//!
//! Owns the single overlay instance. All methods run on the event-queue
//! consumer; observers and timers only post tagged events back to it, so a
//! message from an earlier cycle can be recognized and dropped.
//!
//! States: `Hidden -> Showing -> Visible -> Hidden`.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::focus::FocusRetry;
use super::hotkey::{Chord, PointerGesture};
use super::paste::{ActiveInjection, PendingActivation};
use super::placement::{resolve, PlacementConfig};
use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::events::{EventSender, OverlayEvent};
use crate::shared::settings::{FocusSettings, OverlaySettings, PasteSettings};
use crate::shared::types::{
    CloseCallback, ContentHandle, InputEvent, OverlayContent, OverlayHandle, PanelStyle, Point, ProcessRef, Rect,
    Size, WindowId,
};
use crate::system::platform::{Disposition, EventKind, MonitorScope, Platform, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Hidden,
    Showing,
    Visible,
}

struct OverlayInstance {
    handle: OverlayHandle,
    window: WindowId,
    // Held so the provider's view lives exactly as long as the panel
    _content: ContentHandle,
    on_close: Option<CloseCallback>,
}

pub struct OverlayManager {
    pub(super) platform: Platform,
    pub(super) events: EventSender,
    placement: PlacementConfig,
    focus_settings: FocusSettings,
    pub(super) paste_settings: PasteSettings,
    close_key: Chord,
    trigger_gesture: Option<PointerGesture>,

    state: OverlayState,
    instance: Option<OverlayInstance>,
    pub(super) source: Option<ProcessRef>,
    cycle: u64,
    observers: Vec<Subscription>,
    focus: Option<FocusRetry>,

    pub(super) pending: Option<PendingActivation>,
    pub(super) injection: Option<ActiveInjection>,
    pub(super) wait_seq: u64,
    pub(super) injection_lock: Arc<tokio::sync::Mutex<()>>,
}

impl OverlayManager {
    pub fn new(platform: Platform, settings: &OverlaySettings, events: EventSender) -> OverlayResult<Self> {
        Ok(Self {
            platform,
            events,
            placement: PlacementConfig::from(&settings.placement),
            focus_settings: settings.focus.clone(),
            paste_settings: settings.paste.clone(),
            close_key: settings.close_key.parse()?,
            trigger_gesture: None,
            state: OverlayState::Hidden,
            instance: None,
            source: None,
            cycle: 0,
            observers: Vec::new(),
            focus: None,
            pending: None,
            injection: None,
            wait_seq: 0,
            injection_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.state == OverlayState::Visible
    }

    pub fn source_process(&self) -> Option<&ProcessRef> {
        self.source.as_ref()
    }

    pub fn current_handle(&self) -> Option<OverlayHandle> {
        self.instance.as_ref().map(|i| i.handle)
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Clicks matching the trigger gesture are left to the trigger detector
    /// instead of counting as a click outside.
    pub fn set_trigger_gesture(&mut self, gesture: Option<PointerGesture>) {
        self.trigger_gesture = gesture;
    }

    pub fn show(&mut self, point: Point, size: Size, content: OverlayContent) -> OverlayResult<OverlayHandle> {
        self.cancel_pending_paste();
        if self.state != OverlayState::Hidden {
            tracing::debug!("Replacing the visible overlay");
            self.teardown();
        }

        self.state = OverlayState::Showing;
        self.cycle += 1;
        let cycle = self.cycle;

        // Captured before anything is drawn; the host itself is never a paste target
        let host = self.platform.workspace.host_process();
        self.source = self
            .platform
            .workspace
            .frontmost_process()
            .filter(|p| !p.same_identity(&host));

        let displays = self.platform.displays.displays();
        let placement = resolve(point, size, &displays, &self.placement);
        let frame = placement.frame(size);

        let OverlayContent { view, on_close } = content;
        let window = match self.platform.windows.create_panel(frame, PanelStyle::overlay(), &view) {
            Ok(window) => window,
            Err(e) => {
                tracing::error!("Failed to create overlay panel: {}", e);
                self.source = None;
                self.state = OverlayState::Hidden;
                return Err(e);
            }
        };

        let handle = OverlayHandle { id: Uuid::new_v4(), frame };
        self.instance = Some(OverlayInstance {
            handle,
            window,
            _content: view,
            on_close,
        });

        self.install_observers(cycle, frame);
        self.state = OverlayState::Visible;
        tracing::info!(
            "Overlay shown at ({:.0}, {:.0}) {}x{} over {}",
            frame.origin.x,
            frame.origin.y,
            frame.size.width,
            frame.size.height,
            self.source.as_ref().map_or_else(|| "no source app".to_string(), |p| p.to_string())
        );

        self.begin_focus(cycle, window);
        Ok(handle)
    }

    /// Hide the overlay. Also cancels any paste still waiting for its target
    /// or still typing into it.
    pub fn hide(&mut self) {
        self.cancel_pending_paste();
        if self.state == OverlayState::Hidden {
            return;
        }
        self.teardown();
        tracing::info!("Overlay hidden");
    }

    /// Tear down the current cycle without touching a pending paste.
    pub(super) fn teardown(&mut self) {
        for observer in self.observers.drain(..) {
            observer.dispose();
        }
        self.focus = None;

        if let Some(instance) = self.instance.take() {
            self.platform.windows.destroy_panel(instance.window);
            if let Some(on_close) = instance.on_close {
                on_close();
            }
        }

        self.source = None;
        self.state = OverlayState::Hidden;
    }

    /// Restart the bounded focus retry for the current cycle.
    pub fn request_focus(&mut self) {
        if !self.is_visible() {
            return;
        }
        if let Some(window) = self.instance.as_ref().map(|i| i.window) {
            self.begin_focus(self.cycle, window);
        }
    }

    fn begin_focus(&mut self, cycle: u64, window: WindowId) {
        self.focus = None;
        if self.platform.windows.focus_primary_field(window) {
            return;
        }

        let max_attempts = self.focus_settings.max_attempts;
        if max_attempts <= 1 {
            tracing::warn!("{}", OverlayError::FocusAcquisition(max_attempts));
            return;
        }
        tracing::debug!("Primary field not focused yet, retrying");
        self.focus = Some(FocusRetry::spawn(
            cycle,
            max_attempts,
            Duration::from_millis(self.focus_settings.retry_interval_ms),
            self.events.clone(),
        ));
    }

    fn on_focus_attempt(&mut self, cycle: u64, attempt: u32) {
        let retrying = self.focus.as_ref().map_or(false, |f| f.cycle() == cycle);
        if !retrying || cycle != self.cycle || !self.is_visible() {
            return;
        }
        let window = match self.instance.as_ref() {
            Some(instance) => instance.window,
            None => return,
        };

        if self.platform.windows.focus_primary_field(window) {
            tracing::debug!("Primary field focused on attempt {}", attempt);
            self.focus = None;
        } else if attempt >= self.focus_settings.max_attempts {
            // Still usable: the user can click into the field
            tracing::warn!("{}", OverlayError::FocusAcquisition(attempt));
            self.focus = None;
        }
    }

    fn install_observers(&mut self, cycle: u64, frame: Rect) {
        let events = self.events.clone();
        let close_key = self.close_key;
        let close = self.platform.events.monitor(
            MonitorScope::Local,
            EventKind::KeyDown,
            Box::new(move |event| {
                if close_key.matches(event) {
                    events.publish(OverlayEvent::CloseKey { cycle });
                    Disposition::Consume
                } else {
                    Disposition::Pass
                }
            }),
        );

        let mut observers = vec![close];
        for scope in [MonitorScope::Global, MonitorScope::Local] {
            let events = self.events.clone();
            let gesture = self.trigger_gesture;
            observers.push(self.platform.events.monitor(
                scope,
                EventKind::PointerDown,
                Box::new(move |event| {
                    if let InputEvent::PointerDown { location, .. } = *event {
                        let is_trigger = gesture.map_or(false, |g| g.matches(event));
                        if !is_trigger && !frame.contains(location) {
                            events.publish(OverlayEvent::PointerDown { cycle, location });
                        }
                    }
                    Disposition::Pass
                }),
            ));
        }

        let events = self.events.clone();
        observers.push(self.platform.workspace.observe_activations(
            "overlay-dismissal",
            Box::new(move |process| {
                events.publish(OverlayEvent::AppActivated { cycle, process });
            }),
        ));

        for observer in observers {
            match observer {
                Ok(subscription) => self.observers.push(subscription),
                // Other escape paths stay available
                Err(e) => tracing::warn!("Dismissal observer not installed: {}", e),
            }
        }
    }

    /// Queue events addressed to the manager. Anything tagged with an old
    /// cycle or wait id is dropped.
    pub fn handle_event(&mut self, event: OverlayEvent) {
        match event {
            OverlayEvent::CloseKey { cycle } => {
                if self.is_current(cycle) {
                    tracing::debug!("Close key pressed");
                    self.hide();
                }
            }
            OverlayEvent::PointerDown { cycle, location } => {
                let outside = self
                    .current_handle()
                    .map_or(false, |h| !h.frame.contains(location));
                if self.is_current(cycle) && outside {
                    tracing::debug!("Click outside overlay at ({:.0}, {:.0})", location.x, location.y);
                    self.hide();
                }
            }
            OverlayEvent::AppActivated { cycle, process } => {
                if self.is_current(cycle) && self.dismisses(&process) {
                    tracing::debug!("Dismissing overlay: {} became active", process);
                    self.hide();
                }
            }
            OverlayEvent::FocusAttempt { cycle, attempt } => self.on_focus_attempt(cycle, attempt),
            OverlayEvent::ActivationObserved { wait_id, process } => self.on_activation_observed(wait_id, process),
            OverlayEvent::ActivationTimedOut { wait_id } => self.on_activation_timeout(wait_id),
            OverlayEvent::InjectionFinished { wait_id, result } => self.on_injection_finished(wait_id, result),
            other => tracing::debug!("Overlay manager ignoring {:?}", other),
        }
    }

    fn is_current(&self, cycle: u64) -> bool {
        cycle == self.cycle && self.is_visible()
    }

    /// Switching to the host or back to the source keeps the overlay open.
    fn dismisses(&self, process: &ProcessRef) -> bool {
        let host = self.platform.workspace.host_process();
        if process.same_identity(&host) {
            return false;
        }
        !self.source.as_ref().map_or(false, |s| s.same_identity(process))
    }
}

impl Drop for OverlayManager {
    fn drop(&mut self) {
        self.hide();
    }
}
