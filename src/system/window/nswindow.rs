//! AppKit plumbing shared by the macOS adapters
//!
//! All AppKit/Cocoa calls MUST run on the main thread. The overlay core runs
//! on tokio workers, so every adapter goes through `run_on_main_thread`.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use block::ConcreteBlock;
use cocoa::base::{id, nil};
use cocoa::foundation::{NSRect, NSString, NSUInteger};
use objc::{class, msg_send, sel, sel_impl};

use super::coords::{flip_point, flip_rect};
use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::types::{Display, Point, Rect};
use crate::system::platform::Displays;

// NSApplicationActivationPolicy
const NS_APPLICATION_ACTIVATION_POLICY_ACCESSORY: i64 = 1;

/// Execute a closure on the main thread and wait for its result.
///
/// Runs inline when already on the main thread. Otherwise the closure is
/// queued on `NSOperationQueue.mainQueue` and the caller blocks until it ran.
pub fn run_on_main_thread<F, R>(f: F) -> OverlayResult<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let is_main_thread = unsafe {
        let current_thread: id = msg_send![class!(NSThread), currentThread];
        let is_main: bool = msg_send![current_thread, isMainThread];
        is_main
    };

    if is_main_thread {
        return Ok(f());
    }

    let (tx, rx) = mpsc::channel();

    // The block is Fn; the FnOnce is taken out of the slot on first call
    let slot = Arc::new(Mutex::new(Some(f)));

    unsafe {
        let block = ConcreteBlock::new(move || {
            let mut guard = match slot.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(f) = guard.take() {
                let _ = tx.send(f());
            }
        });
        let block = block.copy();

        let main_queue: id = msg_send![class!(NSOperationQueue), mainQueue];
        let _: () = msg_send![main_queue, addOperationWithBlock: &*block];
    }

    rx.recv()
        .map_err(|_| OverlayError::System("Main thread dropped the operation".to_string()))
}

/// Run as an accessory app: no Dock icon, and activating the overlay never
/// switches Spaces away from a fullscreen app.
pub fn set_app_activation_policy_accessory() -> OverlayResult<()> {
    run_on_main_thread(|| unsafe {
        let ns_app: id = msg_send![class!(NSApplication), sharedApplication];
        if ns_app == nil {
            return Err(OverlayError::System("Failed to get NSApplication".to_string()));
        }

        let current_policy: i64 = msg_send![ns_app, activationPolicy];
        if current_policy == NS_APPLICATION_ACTIVATION_POLICY_ACCESSORY {
            return Ok(());
        }

        let success: bool = msg_send![ns_app, setActivationPolicy: NS_APPLICATION_ACTIVATION_POLICY_ACCESSORY];
        if success {
            tracing::debug!("Activation policy set to Accessory (was {})", current_policy);
            Ok(())
        } else {
            Err(OverlayError::System("Failed to set activation policy to Accessory".to_string()))
        }
    })?
}

pub(crate) fn ns_rect_to_rect(rect: NSRect) -> Rect {
    Rect::new(rect.origin.x, rect.origin.y, rect.size.width, rect.size.height)
}

/// Height of the menu-bar display, the reference for coordinate flipping.
///
/// # Safety
/// Main thread only.
pub(crate) unsafe fn primary_screen_height() -> f64 {
    let screens: id = msg_send![class!(NSScreen), screens];
    if screens == nil {
        return 0.0;
    }
    let count: NSUInteger = msg_send![screens, count];
    if count == 0 {
        return 0.0;
    }
    let primary: id = msg_send![screens, objectAtIndex: 0 as NSUInteger];
    let frame: NSRect = msg_send![primary, frame];
    frame.size.height
}

/// Current pointer position in global top-left coordinates.
///
/// # Safety
/// Main thread only.
pub(crate) unsafe fn current_mouse_location() -> Point {
    let location: cocoa::foundation::NSPoint = msg_send![class!(NSEvent), mouseLocation];
    flip_point(Point::new(location.x, location.y), primary_screen_height())
}

/// # Safety
/// Main thread only.
unsafe fn collect_screens() -> Vec<Display> {
    let screens: id = msg_send![class!(NSScreen), screens];
    if screens == nil {
        return Vec::new();
    }
    let count: NSUInteger = msg_send![screens, count];
    let primary_height = primary_screen_height();

    let number_key = NSString::alloc(nil).init_str("NSScreenNumber");
    let mut displays = Vec::with_capacity(count as usize);

    for i in 0..count {
        let screen: id = msg_send![screens, objectAtIndex: i];
        let frame: NSRect = msg_send![screen, frame];
        let visible: NSRect = msg_send![screen, visibleFrame];

        let description: id = msg_send![screen, deviceDescription];
        let number: id = if description == nil { nil } else { msg_send![description, objectForKey: number_key] };
        let display_id: u32 = if number == nil {
            i as u32
        } else {
            msg_send![number, unsignedIntValue]
        };

        displays.push(Display {
            id: display_id,
            frame: flip_rect(ns_rect_to_rect(frame), primary_height),
            visible_frame: flip_rect(ns_rect_to_rect(visible), primary_height),
            is_primary: i == 0,
        });
    }

    let _: () = msg_send![number_key, release];
    displays
}

/// `Displays` backed by `NSScreen` and the system pointer.
pub struct ScreenLayout;

impl Displays for ScreenLayout {
    fn displays(&self) -> Vec<Display> {
        match run_on_main_thread(|| unsafe { collect_screens() }) {
            Ok(displays) => displays,
            Err(e) => {
                tracing::error!("Failed to enumerate screens: {}", e);
                Vec::new()
            }
        }
    }

    fn pointer_location(&self) -> Option<Point> {
        use mouse_position::mouse_position::Mouse;

        // CoreGraphics reports global top-left coordinates already
        match Mouse::get_mouse_position() {
            Mouse::Position { x, y } => Some(Point::new(x as f64, y as f64)),
            Mouse::Error => {
                tracing::warn!("mouse_position failed, asking AppKit instead");
                run_on_main_thread(|| unsafe { current_mouse_location() }).ok()
            }
        }
    }
}
