//! In-memory desktop for unit tests.
//!
//! Implements every platform trait, records what the core asked for, and lets
//! a test deliver input and activation notifications the way the system would.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::types::{
    ContentHandle, Display, InputEvent, KeyCode, Modifiers, PanelStyle, Point, PointerButton, ProcessRef, Rect, WindowId,
};
use crate::system::platform::{
    AccessibilityPermission, ActivationHandler, CancelFlag, Clipboard, Disposition, Displays, EventKind, EventTap,
    InputHandler, InputSynthesizer, MonitorScope, Platform, Subscription, WindowServer, Workspace,
};

pub const HOST_PID: i32 = 1;

pub fn host() -> ProcessRef {
    ProcessRef::new(HOST_PID, Some("com.tool-suite.cursor-overlay"), "Cursor Overlay")
}

pub fn text_edit() -> ProcessRef {
    ProcessRef::new(100, Some("com.apple.TextEdit"), "TextEdit")
}

pub fn safari() -> ProcessRef {
    ProcessRef::new(200, Some("com.apple.Safari"), "Safari")
}

pub fn terminal() -> ProcessRef {
    ProcessRef::new(300, Some("com.apple.Terminal"), "Terminal")
}

pub fn key(code: u16, modifiers: Modifiers) -> InputEvent {
    InputEvent::KeyDown {
        key: KeyCode(code),
        modifiers,
    }
}

pub fn click(x: f64, y: f64) -> InputEvent {
    InputEvent::PointerDown {
        location: Point::new(x, y),
        button: PointerButton::Left,
        modifiers: Modifiers::NONE,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeWindow {
    pub id: WindowId,
    pub frame: Rect,
    pub style: PanelStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Injection {
    PasteShortcut,
    Typed(String),
}

struct Monitor {
    scope: MonitorScope,
    kind: EventKind,
    handler: Arc<InputHandler>,
}

struct State {
    next_id: u64,
    windows: Vec<FakeWindow>,
    windows_created: usize,
    fail_window_creation: bool,
    focus_results: VecDeque<bool>,
    focus_default: bool,
    focus_calls: usize,
    frontmost: Option<ProcessRef>,
    known_processes: BTreeMap<i32, ProcessRef>,
    activation_brings_front: bool,
    activation_requests: Vec<i32>,
    activation_observers: BTreeMap<u64, (String, Arc<ActivationHandler>)>,
    monitors: BTreeMap<u64, Monitor>,
    injections: Vec<Injection>,
    clipboard: Option<String>,
    trusted: bool,
    prompts: usize,
    displays: Vec<Display>,
    pointer: Option<Point>,
}

/// Lets a test hold typing mid-text, the way a slow terminal would.
#[derive(Default)]
struct TypingHold {
    after: Option<usize>,
    held: bool,
    released: bool,
}

pub struct FakeDesktop {
    state: Arc<Mutex<State>>,
    typing: Arc<(Mutex<TypingHold>, Condvar)>,
}

impl FakeDesktop {
    /// TextEdit frontmost, one 1440x900 display, permission granted, focus succeeds.
    pub fn new() -> Arc<Self> {
        let mut known_processes = BTreeMap::new();
        for process in [host(), text_edit(), safari(), terminal()] {
            known_processes.insert(process.pid, process);
        }

        let state = State {
            next_id: 1,
            windows: Vec::new(),
            windows_created: 0,
            fail_window_creation: false,
            focus_results: VecDeque::new(),
            focus_default: true,
            focus_calls: 0,
            frontmost: Some(text_edit()),
            known_processes,
            activation_brings_front: false,
            activation_requests: Vec::new(),
            activation_observers: BTreeMap::new(),
            monitors: BTreeMap::new(),
            injections: Vec::new(),
            clipboard: Some("hello".to_string()),
            trusted: true,
            prompts: 0,
            displays: vec![Display {
                id: 1,
                frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
                visible_frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
                is_primary: true,
            }],
            pointer: Some(Point::new(400.0, 400.0)),
        };

        Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
            typing: Arc::new((Mutex::new(TypingHold::default()), Condvar::new())),
        })
    }

    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            windows: self.clone(),
            workspace: self.clone(),
            events: self.clone(),
            input: self.clone(),
            clipboard: self.clone(),
            permission: self.clone(),
            displays: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Setup

    pub fn set_trusted(&self, trusted: bool) {
        self.lock().trusted = trusted;
    }

    pub fn set_frontmost(&self, process: Option<ProcessRef>) {
        let mut state = self.lock();
        if let Some(p) = &process {
            state.known_processes.insert(p.pid, p.clone());
        }
        state.frontmost = process;
    }

    pub fn set_activation_brings_front(&self, enabled: bool) {
        self.lock().activation_brings_front = enabled;
    }

    pub fn set_clipboard(&self, text: Option<&str>) {
        self.lock().clipboard = text.map(str::to_string);
    }

    pub fn fail_window_creation(&self, fail: bool) {
        self.lock().fail_window_creation = fail;
    }

    /// Results returned by the next focus attempts, then `default` forever.
    pub fn script_focus(&self, results: &[bool], default: bool) {
        let mut state = self.lock();
        state.focus_results = results.iter().copied().collect();
        state.focus_default = default;
    }

    pub fn set_pointer(&self, point: Option<Point>) {
        self.lock().pointer = point;
    }

    /// Block `type_text` after `count` characters until `resume_typing`.
    pub fn hold_typing_after(&self, count: usize) {
        *self.typing.0.lock().unwrap() = TypingHold {
            after: Some(count),
            ..TypingHold::default()
        };
    }

    pub fn typing_held(&self) -> bool {
        self.typing.0.lock().unwrap().held
    }

    pub fn resume_typing(&self) {
        let (hold, resumed) = &*self.typing;
        hold.lock().unwrap().released = true;
        resumed.notify_all();
    }

    fn wait_if_held(&self, typed: usize) {
        let (hold, resumed) = &*self.typing;
        let mut hold = hold.lock().unwrap();
        if hold.after != Some(typed) {
            return;
        }
        hold.held = true;
        while !hold.released {
            hold = resumed.wait(hold).unwrap();
        }
    }

    // System side

    /// Deliver an event to every monitor of `scope` and `kind`, in install order.
    pub fn deliver(&self, scope: MonitorScope, event: InputEvent) -> Vec<Disposition> {
        let kind = match event {
            InputEvent::KeyDown { .. } => EventKind::KeyDown,
            InputEvent::PointerDown { .. } => EventKind::PointerDown,
        };
        let handlers: Vec<Arc<InputHandler>> = self
            .lock()
            .monitors
            .values()
            .filter(|m| m.scope == scope && m.kind == kind)
            .map(|m| m.handler.clone())
            .collect();

        handlers.iter().map(|handler| handler(&event)).collect()
    }

    /// Make `process` frontmost and notify activation observers.
    pub fn activate_app(&self, process: ProcessRef) {
        let handlers: Vec<Arc<ActivationHandler>> = {
            let mut state = self.lock();
            state.known_processes.insert(process.pid, process.clone());
            state.frontmost = Some(process.clone());
            state.activation_observers.values().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            handler(process.clone());
        }
    }

    // Inspection

    pub fn open_windows(&self) -> Vec<FakeWindow> {
        self.lock().windows.clone()
    }

    pub fn windows_created(&self) -> usize {
        self.lock().windows_created
    }

    pub fn monitor_count(&self, scope: MonitorScope, kind: EventKind) -> usize {
        self.lock()
            .monitors
            .values()
            .filter(|m| m.scope == scope && m.kind == kind)
            .count()
    }

    pub fn total_monitors(&self) -> usize {
        self.lock().monitors.len()
    }

    pub fn activation_observer_labels(&self) -> Vec<String> {
        self.lock()
            .activation_observers
            .values()
            .map(|(label, _)| label.clone())
            .collect()
    }

    pub fn activation_requests(&self) -> Vec<i32> {
        self.lock().activation_requests.clone()
    }

    pub fn injections(&self) -> Vec<Injection> {
        self.lock().injections.clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.lock().prompts
    }

    pub fn focus_calls(&self) -> usize {
        self.lock().focus_calls
    }

    fn next_id(state: &mut State) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

impl WindowServer for FakeDesktop {
    fn create_panel(&self, frame: Rect, style: PanelStyle, _content: &ContentHandle) -> OverlayResult<WindowId> {
        let mut state = self.lock();
        if state.fail_window_creation {
            return Err(OverlayError::Window("panel creation refused".to_string()));
        }
        let id = WindowId(Self::next_id(&mut state));
        state.windows.push(FakeWindow { id, frame, style });
        state.windows_created += 1;
        Ok(id)
    }

    fn destroy_panel(&self, window: WindowId) {
        self.lock().windows.retain(|w| w.id != window);
    }

    fn focus_primary_field(&self, _window: WindowId) -> bool {
        let mut state = self.lock();
        state.focus_calls += 1;
        let default = state.focus_default;
        state.focus_results.pop_front().unwrap_or(default)
    }
}

impl Workspace for FakeDesktop {
    fn host_process(&self) -> ProcessRef {
        host()
    }

    fn frontmost_process(&self) -> Option<ProcessRef> {
        self.lock().frontmost.clone()
    }

    fn activate(&self, pid: i32) -> OverlayResult<()> {
        let mut state = self.lock();
        state.activation_requests.push(pid);
        if state.activation_brings_front {
            let process = state
                .known_processes
                .get(&pid)
                .cloned()
                .ok_or_else(|| OverlayError::System(format!("no process with PID {}", pid)))?;
            state.frontmost = Some(process);
        }
        Ok(())
    }

    fn observe_activations(&self, label: &str, handler: ActivationHandler) -> OverlayResult<Subscription> {
        let id = {
            let mut state = self.lock();
            let id = Self::next_id(&mut state);
            state
                .activation_observers
                .insert(id, (label.to_string(), Arc::new(handler)));
            id
        };
        let shared = self.state.clone();
        Ok(Subscription::new(label, move || {
            if let Ok(mut state) = shared.lock() {
                state.activation_observers.remove(&id);
            }
        }))
    }
}

impl EventTap for FakeDesktop {
    fn monitor(&self, scope: MonitorScope, kind: EventKind, handler: InputHandler) -> OverlayResult<Subscription> {
        let id = {
            let mut state = self.lock();
            let id = Self::next_id(&mut state);
            state.monitors.insert(
                id,
                Monitor {
                    scope,
                    kind,
                    handler: Arc::new(handler),
                },
            );
            id
        };
        let shared = self.state.clone();
        Ok(Subscription::new(format!("{:?} {:?}", scope, kind), move || {
            if let Ok(mut state) = shared.lock() {
                state.monitors.remove(&id);
            }
        }))
    }
}

impl InputSynthesizer for FakeDesktop {
    fn paste_shortcut(&self) -> OverlayResult<()> {
        self.lock().injections.push(Injection::PasteShortcut);
        Ok(())
    }

    fn type_text(&self, text: &str, cancel: &CancelFlag) -> OverlayResult<()> {
        let index = {
            let mut state = self.lock();
            state.injections.push(Injection::Typed(String::new()));
            state.injections.len() - 1
        };
        for (count, ch) in text.chars().enumerate() {
            if cancel.is_cancelled() {
                return Err(OverlayError::PasteCancelled);
            }
            if let Some(Injection::Typed(typed)) = self.lock().injections.get_mut(index) {
                typed.push(ch);
            }
            self.wait_if_held(count + 1);
        }
        Ok(())
    }
}

impl Clipboard for FakeDesktop {
    fn read_text(&self) -> OverlayResult<Option<String>> {
        Ok(self.lock().clipboard.clone())
    }
}

impl AccessibilityPermission for FakeDesktop {
    fn is_trusted(&self) -> bool {
        self.lock().trusted
    }

    fn prompt(&self) -> bool {
        let mut state = self.lock();
        state.prompts += 1;
        state.trusted
    }
}

impl Displays for FakeDesktop {
    fn displays(&self) -> Vec<Display> {
        self.lock().displays.clone()
    }

    fn pointer_location(&self) -> Option<Point> {
        self.lock().pointer
    }
}
