//! Platform seams
//!
//! The overlay core never calls AppKit directly. Each concern it needs from the
//! desktop is a small trait here; the macOS adapters implement them and the
//! test fake records what the core asked for.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::shared::error::OverlayResult;
use crate::shared::types::{ContentHandle, Display, InputEvent, PanelStyle, Point, ProcessRef, Rect, WindowId};

/// Which processes an event monitor sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorScope {
    /// Events delivered to other applications. Observe-only, needs accessibility permission.
    Global,
    /// Events delivered to the host process. Can consume.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    KeyDown,
    PointerDown,
}

/// What a local monitor does with the event after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Pass,
    Consume,
}

pub type InputHandler = Box<dyn Fn(&InputEvent) -> Disposition + Send + Sync + 'static>;
pub type ActivationHandler = Box<dyn Fn(ProcessRef) + Send + Sync + 'static>;

/// An installed observer. Dropping it removes the observer.
pub struct Subscription {
    label: String,
    dispose: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dispose(mut self) {
        self.run_dispose();
    }

    fn run_dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            tracing::debug!("Removing observer: {}", self.label);
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

/// Shared stop signal for one injection. Tripped from the queue consumer,
/// polled by the synthesizer between keystrokes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait WindowServer: Send + Sync {
    /// Create and order front a panel at `frame` (global top-left coordinates).
    fn create_panel(&self, frame: Rect, style: PanelStyle, content: &ContentHandle) -> OverlayResult<WindowId>;

    fn destroy_panel(&self, window: WindowId);

    /// Try once to make the content's primary field first responder.
    fn focus_primary_field(&self, window: WindowId) -> bool;
}

pub trait Workspace: Send + Sync {
    /// The process the overlay runs in.
    fn host_process(&self) -> ProcessRef;

    fn frontmost_process(&self) -> Option<ProcessRef>;

    /// Ask the system to bring `pid` to the foreground. Completion is
    /// reported through `observe_activations`, not by this call.
    fn activate(&self, pid: i32) -> OverlayResult<()>;

    fn observe_activations(&self, label: &str, handler: ActivationHandler) -> OverlayResult<Subscription>;
}

pub trait EventTap: Send + Sync {
    fn monitor(&self, scope: MonitorScope, kind: EventKind, handler: InputHandler) -> OverlayResult<Subscription>;
}

pub trait InputSynthesizer: Send + Sync {
    /// Post the platform paste shortcut (Cmd+V).
    fn paste_shortcut(&self) -> OverlayResult<()>;

    /// Type `text` as individual key events. Stops before the next character
    /// once `cancel` is tripped and returns `PasteCancelled`.
    fn type_text(&self, text: &str, cancel: &CancelFlag) -> OverlayResult<()>;
}

pub trait Clipboard: Send + Sync {
    fn read_text(&self) -> OverlayResult<Option<String>>;
}

pub trait AccessibilityPermission: Send + Sync {
    fn is_trusted(&self) -> bool;

    /// Show the system prompt and return the status right after.
    fn prompt(&self) -> bool;

    fn settings_url(&self) -> &'static str {
        "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility"
    }
}

pub trait Displays: Send + Sync {
    fn displays(&self) -> Vec<Display>;

    fn pointer_location(&self) -> Option<Point>;
}

/// Every platform seam the core uses, shared between the service, the
/// manager and the orchestrator.
#[derive(Clone)]
pub struct Platform {
    pub windows: Arc<dyn WindowServer>,
    pub workspace: Arc<dyn Workspace>,
    pub events: Arc<dyn EventTap>,
    pub input: Arc<dyn InputSynthesizer>,
    pub clipboard: Arc<dyn Clipboard>,
    pub permission: Arc<dyn AccessibilityPermission>,
    pub displays: Arc<dyn Displays>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Platform(..)")
    }
}
