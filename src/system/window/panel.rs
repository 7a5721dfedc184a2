//! Floating Panel implementation for macOS
//!
//! The overlay window is a real NSPanel subclass that:
//! - appears over fullscreen applications and on every Space
//! - does not activate the host app when shown (`orderFrontRegardless`)
//! - can still become key, so its primary field can take keyboard focus
//!
//! Every method here touches AppKit and must run on the main thread;
//! `PanelWindowServer` takes care of that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use cocoa::appkit::NSWindowCollectionBehavior;
use cocoa::base::{id, nil, NO, YES};
use cocoa::foundation::{NSPoint, NSRect, NSSize, NSUInteger};
use objc::declare::ClassDecl;
use objc::runtime::{Class, Object, Sel, BOOL};
use objc::{class, msg_send, sel, sel_impl};
use once_cell::sync::OnceCell;

use super::coords::flip_rect;
use super::handle::NativeView;
use super::nswindow::{primary_screen_height, run_on_main_thread};
use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::types::{ContentHandle, PanelStyle, Rect, WindowId};
use crate::system::platform::WindowServer;

// Window levels
const NS_FLOATING_WINDOW_LEVEL: i64 = 3;
const NS_SCREEN_SAVER_WINDOW_LEVEL: i64 = 1000;

// NSWindowStyleMask
const NS_BORDERLESS_WINDOW_MASK: NSUInteger = 0;
const NS_NONACTIVATING_PANEL_MASK: NSUInteger = 1 << 7;

// NSBackingStoreBuffered
const NS_BACKING_STORE_BUFFERED: NSUInteger = 2;

const PANEL_CLASS_NAME: &str = "CursorOverlayPanel";

static PANEL_CLASS: OnceCell<&'static Class> = OnceCell::new();

extern "C" fn can_become_key_window(_this: &Object, _sel: Sel) -> BOOL {
    YES
}

/// Borderless panels refuse key status by default; this subclass accepts it.
fn panel_class() -> &'static Class {
    PANEL_CLASS.get_or_init(|| {
        let superclass = class!(NSPanel);
        match ClassDecl::new(PANEL_CLASS_NAME, superclass) {
            Some(mut decl) => {
                unsafe {
                    decl.add_method(
                        sel!(canBecomeKeyWindow),
                        can_become_key_window as extern "C" fn(&Object, Sel) -> BOOL,
                    );
                }
                decl.register()
            }
            // Already registered by another copy of the library
            None => Class::get(PANEL_CLASS_NAME).unwrap_or(superclass),
        }
    })
}

/// Owned NSPanel. Released on drop.
pub struct FloatingPanel {
    panel: id,
}

// Only ever messaged on the main thread; moved across threads as an owner.
unsafe impl Send for FloatingPanel {}

impl FloatingPanel {
    /// Create the panel at `frame` (Cocoa coordinates), hidden.
    ///
    /// # Safety
    /// Main thread only.
    pub unsafe fn new(frame: NSRect, style: PanelStyle) -> OverlayResult<Self> {
        let mut style_mask = NS_BORDERLESS_WINDOW_MASK;
        if style.non_activating {
            style_mask |= NS_NONACTIVATING_PANEL_MASK;
        }

        let panel: id = msg_send![panel_class(), alloc];
        let panel: id = msg_send![panel, initWithContentRect: frame
                                            styleMask: style_mask
                                            backing: NS_BACKING_STORE_BUFFERED
                                            defer: NO];
        if panel == nil {
            return Err(OverlayError::Window("NSPanel initialisation returned nil".to_string()));
        }

        // We own the panel through this struct, not through -close
        let _: () = msg_send![panel, setReleasedWhenClosed: NO];

        let _: () = msg_send![panel, setBecomesKeyOnlyIfNeeded: NO];
        let _: () = msg_send![panel, setFloatingPanel: YES];
        let _: () = msg_send![panel, setWorksWhenModal: YES];
        let _: () = msg_send![panel, setHidesOnDeactivate: NO];

        let _: () = msg_send![panel, setOpaque: NO];
        let clear_color: id = msg_send![class!(NSColor), clearColor];
        let _: () = msg_send![panel, setBackgroundColor: clear_color];
        let _: () = msg_send![panel, setHasShadow: YES];

        let level = if style.always_on_top {
            NS_SCREEN_SAVER_WINDOW_LEVEL
        } else {
            NS_FLOATING_WINDOW_LEVEL
        };
        let _: () = msg_send![panel, setLevel: level];

        let mut behavior = NSWindowCollectionBehavior::NSWindowCollectionBehaviorFullScreenAuxiliary;
        if style.all_spaces {
            behavior |= NSWindowCollectionBehavior::NSWindowCollectionBehaviorCanJoinAllSpaces;
        }
        let _: () = msg_send![panel, setCollectionBehavior: behavior];

        let _: () = msg_send![panel, setAcceptsMouseMovedEvents: YES];
        let _: () = msg_send![panel, setIgnoresMouseEvents: NO];

        tracing::debug!(
            "Created panel at ({}, {}) size {}x{}, level {}",
            frame.origin.x,
            frame.origin.y,
            frame.size.width,
            frame.size.height,
            level
        );

        Ok(Self { panel })
    }

    /// # Safety
    /// Main thread only; `view` must be a valid `NSView`.
    pub unsafe fn set_content_view(&self, view: id) {
        let _: () = msg_send![self.panel, setContentView: view];
    }

    /// Order front without activating the host app.
    ///
    /// # Safety
    /// Main thread only.
    pub unsafe fn show(&self) {
        let _: () = msg_send![self.panel, orderFrontRegardless];

        let is_visible: bool = msg_send![self.panel, isVisible];
        if !is_visible {
            tracing::warn!("Panel not visible after orderFrontRegardless");
        }
    }

    /// # Safety
    /// Main thread only.
    pub unsafe fn hide(&self) {
        let _: () = msg_send![self.panel, orderOut: nil];
    }

    /// One attempt at putting the keyboard focus in the content.
    ///
    /// Targets the panel's `initialFirstResponder` when the content set one,
    /// the content view otherwise.
    ///
    /// # Safety
    /// Main thread only.
    pub unsafe fn focus_primary_field(&self) -> bool {
        focus_first_responder(self.panel)
    }

    pub fn as_id(&self) -> id {
        self.panel
    }
}

/// # Safety
/// Main thread only; `panel` must be a live NSPanel.
unsafe fn focus_first_responder(panel: id) -> bool {
    let _: () = msg_send![panel, makeKeyWindow];

    let mut target: id = msg_send![panel, initialFirstResponder];
    if target == nil {
        target = msg_send![panel, contentView];
    }
    if target == nil {
        return false;
    }

    let accepted: BOOL = msg_send![panel, makeFirstResponder: target];
    let is_key: BOOL = msg_send![panel, isKeyWindow];
    accepted == YES && is_key == YES
}

impl Drop for FloatingPanel {
    fn drop(&mut self) {
        unsafe {
            let _: () = msg_send![self.panel, orderOut: nil];
            let _: () = msg_send![self.panel, release];
        }
    }
}

/// `WindowServer` that hands out one `FloatingPanel` per overlay cycle.
pub struct PanelWindowServer {
    panels: Mutex<HashMap<WindowId, FloatingPanel>>,
    next_id: AtomicU64,
}

impl PanelWindowServer {
    pub fn new() -> Self {
        Self {
            panels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn panels(&self) -> MutexGuard<'_, HashMap<WindowId, FloatingPanel>> {
        match self.panels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Panel registry mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for PanelWindowServer {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowServer for PanelWindowServer {
    fn create_panel(&self, frame: Rect, style: PanelStyle, content: &ContentHandle) -> OverlayResult<WindowId> {
        let content = content.clone();

        let panel = run_on_main_thread(move || -> OverlayResult<FloatingPanel> {
            let view = content
                .downcast_ref::<NativeView>()
                .ok_or_else(|| OverlayError::Window("Overlay content is not a NativeView".to_string()))?;

            unsafe {
                let cocoa = flip_rect(frame, primary_screen_height());
                let rect = NSRect::new(
                    NSPoint::new(cocoa.origin.x, cocoa.origin.y),
                    NSSize::new(cocoa.size.width, cocoa.size.height),
                );

                let panel = FloatingPanel::new(rect, style)?;
                panel.set_content_view(view.as_id());
                panel.show();
                Ok(panel)
            }
        })??;

        let window = WindowId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.panels().insert(window, panel);
        tracing::debug!("Registered panel {:?}", window);
        Ok(window)
    }

    fn destroy_panel(&self, window: WindowId) {
        let Some(panel) = self.panels().remove(&window) else {
            tracing::debug!("destroy_panel: {:?} already gone", window);
            return;
        };

        // Released on the main thread
        if let Err(e) = run_on_main_thread(move || drop(panel)) {
            tracing::error!("Failed to release panel {:?}: {}", window, e);
        }
    }

    fn focus_primary_field(&self, window: WindowId) -> bool {
        let panels = self.panels();
        let Some(panel) = panels.get(&window) else {
            return false;
        };

        // The registry lock is held across the main-thread hop so the panel
        // cannot be released underneath; no main-thread path takes this lock.
        let panel_ptr = panel.as_id() as usize;
        let focused = run_on_main_thread(move || unsafe { focus_first_responder(panel_ptr as id) });

        match focused {
            Ok(focused) => focused,
            Err(e) => {
                tracing::warn!("Focus attempt failed: {}", e);
                false
            }
        }
    }
}
