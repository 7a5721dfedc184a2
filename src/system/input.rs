//! NSEvent monitors
//!
//! Global monitors see events headed for other applications (observe-only,
//! gated by accessibility permission). Local monitors see events headed for
//! this process and may swallow them by returning nil.

use std::panic::{self, AssertUnwindSafe};

use block::ConcreteBlock;
use cocoa::base::{id, nil, YES};
use cocoa::foundation::NSUInteger;
use objc::runtime::BOOL;
use objc::{class, msg_send, sel, sel_impl};

use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::types::{InputEvent, KeyCode, Modifiers, PointerButton};
use crate::system::platform::{Disposition, EventKind, EventTap, InputHandler, MonitorScope, Subscription};
use crate::system::window::handle::SafeObjcHandle;
use crate::system::window::nswindow::{current_mouse_location, run_on_main_thread};

// NSEventMask
const NS_EVENT_MASK_LEFT_MOUSE_DOWN: NSUInteger = 1 << 1;
const NS_EVENT_MASK_RIGHT_MOUSE_DOWN: NSUInteger = 1 << 3;
const NS_EVENT_MASK_KEY_DOWN: NSUInteger = 1 << 10;
const NS_EVENT_MASK_OTHER_MOUSE_DOWN: NSUInteger = 1 << 25;

// NSEventModifierFlags
const NS_SHIFT_KEY_MASK: NSUInteger = 1 << 17;
const NS_CONTROL_KEY_MASK: NSUInteger = 1 << 18;
const NS_ALTERNATE_KEY_MASK: NSUInteger = 1 << 19;
const NS_COMMAND_KEY_MASK: NSUInteger = 1 << 20;

fn event_mask(kind: EventKind) -> NSUInteger {
    match kind {
        EventKind::KeyDown => NS_EVENT_MASK_KEY_DOWN,
        EventKind::PointerDown => {
            NS_EVENT_MASK_LEFT_MOUSE_DOWN | NS_EVENT_MASK_RIGHT_MOUSE_DOWN | NS_EVENT_MASK_OTHER_MOUSE_DOWN
        }
    }
}

fn modifiers_from_flags(flags: NSUInteger) -> Modifiers {
    Modifiers {
        control: flags & NS_CONTROL_KEY_MASK != 0,
        alt: flags & NS_ALTERNATE_KEY_MASK != 0,
        shift: flags & NS_SHIFT_KEY_MASK != 0,
        command: flags & NS_COMMAND_KEY_MASK != 0,
    }
}

/// `-[NSEvent buttonNumber]`: 0 left, 1 right, anything else is "other".
fn button_from_number(number: i64) -> PointerButton {
    match number {
        0 => PointerButton::Left,
        1 => PointerButton::Right,
        _ => PointerButton::Middle,
    }
}

/// # Safety
/// Main thread only; `event` must be nil or a valid NSEvent.
unsafe fn translate(event: id, kind: EventKind) -> Option<InputEvent> {
    if event == nil {
        return None;
    }

    let flags: NSUInteger = msg_send![event, modifierFlags];
    let modifiers = modifiers_from_flags(flags);

    match kind {
        EventKind::KeyDown => {
            // Auto-repeat of a held chord is not a new trigger
            let repeat: BOOL = msg_send![event, isARepeat];
            if repeat == YES {
                return None;
            }
            let code: u16 = msg_send![event, keyCode];
            Some(InputEvent::KeyDown {
                key: KeyCode(code),
                modifiers,
            })
        }
        EventKind::PointerDown => {
            let number: i64 = msg_send![event, buttonNumber];
            Some(InputEvent::PointerDown {
                location: current_mouse_location(),
                button: button_from_number(number),
                modifiers,
            })
        }
    }
}

/// Run a monitor callback without letting a panic unwind into AppKit.
fn guarded<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(|| objc::rc::autoreleasepool(f))) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("Event monitor callback panicked");
            fallback
        }
    }
}

/// # Safety
/// Main thread only.
unsafe fn install(scope: MonitorScope, kind: EventKind, handler: InputHandler) -> Option<SafeObjcHandle> {
    let mask = event_mask(kind);

    let monitor: id = match scope {
        MonitorScope::Global => {
            let block = ConcreteBlock::new(move |event: id| {
                guarded((), || {
                    if let Some(input) = translate(event, kind) {
                        // Global monitors cannot consume
                        let _ = handler(&input);
                    }
                })
            });
            let block = block.copy();
            msg_send![class!(NSEvent), addGlobalMonitorForEventsMatchingMask: mask handler: &*block]
        }
        MonitorScope::Local => {
            let block = ConcreteBlock::new(move |event: id| -> id {
                guarded(event, || match translate(event, kind) {
                    Some(input) if handler(&input) == Disposition::Consume => nil,
                    _ => event,
                })
            });
            let block = block.copy();
            msg_send![class!(NSEvent), addLocalMonitorForEventsMatchingMask: mask handler: &*block]
        }
    };

    SafeObjcHandle::retain(monitor)
}

/// `EventTap` backed by `+[NSEvent add{Global,Local}MonitorForEventsMatchingMask:handler:]`.
pub struct NSEventTap;

impl EventTap for NSEventTap {
    fn monitor(&self, scope: MonitorScope, kind: EventKind, handler: InputHandler) -> OverlayResult<Subscription> {
        let monitor = run_on_main_thread(move || unsafe { install(scope, kind, handler) })?
            .ok_or_else(|| OverlayError::System(format!("NSEvent refused the {:?} {:?} monitor", scope, kind)))?;

        let label = format!("nsevent-{:?}-{:?}", scope, kind).to_lowercase();
        Ok(Subscription::new(label, move || {
            let removed = run_on_main_thread(move || unsafe {
                let _: () = msg_send![class!(NSEvent), removeMonitor: monitor.as_id()];
                drop(monitor);
            });
            if let Err(e) = removed {
                tracing::error!("Failed to remove event monitor: {}", e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_flags() {
        let flags = NS_COMMAND_KEY_MASK | NS_SHIFT_KEY_MASK | 0x100;
        let modifiers = modifiers_from_flags(flags);
        assert!(modifiers.command);
        assert!(modifiers.shift);
        assert!(!modifiers.control);
        assert!(!modifiers.alt);

        assert!(modifiers_from_flags(0).is_empty());
    }

    #[test]
    fn test_pointer_mask_covers_every_button() {
        let mask = event_mask(EventKind::PointerDown);
        assert_eq!(mask & NS_EVENT_MASK_KEY_DOWN, 0);
        assert_ne!(mask & NS_EVENT_MASK_LEFT_MOUSE_DOWN, 0);
        assert_ne!(mask & NS_EVENT_MASK_RIGHT_MOUSE_DOWN, 0);
        assert_ne!(mask & NS_EVENT_MASK_OTHER_MOUSE_DOWN, 0);
    }

    #[test]
    fn test_button_numbers() {
        assert_eq!(button_from_number(0), PointerButton::Left);
        assert_eq!(button_from_number(1), PointerButton::Right);
        assert_eq!(button_from_number(2), PointerButton::Middle);
        assert_eq!(button_from_number(4), PointerButton::Middle);
    }
}
