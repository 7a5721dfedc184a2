use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Point in global screen coordinates (top-left origin, y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn left(&self) -> f64 {
        self.origin.x
    }

    pub fn top(&self) -> f64 {
        self.origin.y
    }

    pub fn right(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn bottom(&self) -> f64 {
        self.origin.y + self.size.height
    }

    /// Half-open containment: the right and bottom edges belong to the neighbour.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left() && p.x < self.right() && p.y >= self.top() && p.y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.top() >= self.top()
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// One attached display. `visible_frame` excludes the menu bar and Dock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Display {
    pub id: u32,
    pub frame: Rect,
    pub visible_frame: Rect,
    pub is_primary: bool,
}

/// Identity of a running application.
///
/// Two references name the same process when their pids match; the bundle id
/// and name are informational (names are localized and not unique).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRef {
    pub pid: i32,
    pub bundle_id: Option<String>,
    pub name: String,
}

impl ProcessRef {
    pub fn new(pid: i32, bundle_id: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            pid,
            bundle_id: bundle_id.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn same_identity(&self, other: &ProcessRef) -> bool {
        self.pid == other.pid
    }
}

impl fmt::Display for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bundle_id {
            Some(bundle) => write!(f, "{} ({}) PID {}", self.name, bundle, self.pid),
            None => write!(f, "{} PID {}", self.name, self.pid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub control: bool,
    pub alt: bool,
    pub shift: bool,
    pub command: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        control: false,
        alt: false,
        shift: false,
        command: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// macOS virtual key code (kVK_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

/// Low-level input observed by an event monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyDown {
        key: KeyCode,
        modifiers: Modifiers,
    },
    PointerDown {
        location: Point,
        button: PointerButton,
        modifiers: Modifiers,
    },
}

/// Handle returned by `show`, identifying one overlay cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayHandle {
    pub id: Uuid,
    pub frame: Rect,
}

/// Platform window identifier handed out by a `WindowServer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// Window attributes the overlay panel is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelStyle {
    pub always_on_top: bool,
    pub all_spaces: bool,
    pub non_activating: bool,
}

impl PanelStyle {
    pub fn overlay() -> Self {
        Self {
            always_on_top: true,
            all_spaces: true,
            non_activating: true,
        }
    }
}

/// Opaque rendered content supplied by the content provider.
///
/// The core never looks inside; the platform window server downcasts it to
/// whatever native view type it understands.
#[derive(Clone)]
pub struct ContentHandle(Arc<dyn Any + Send + Sync>);

impl ContentHandle {
    pub fn new<T: Any + Send + Sync>(view: T) -> Self {
        Self(Arc::new(view))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentHandle(..)")
    }
}

pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// What a content provider hands to `show` for one cycle.
pub struct OverlayContent {
    pub view: ContentHandle,
    pub on_close: Option<CloseCallback>,
}

impl OverlayContent {
    pub fn new(view: ContentHandle) -> Self {
        Self { view, on_close: None }
    }

    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for OverlayContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayContent")
            .field("view", &self.view)
            .field("has_close_callback", &self.on_close.is_some())
            .finish()
    }
}
