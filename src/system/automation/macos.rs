use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use block::ConcreteBlock;
use cocoa::base::{id, nil, BOOL, NO};
use cocoa::foundation::{NSString, NSUInteger};
use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation, CGKeyCode};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use objc::rc::autoreleasepool;
use objc::{class, msg_send, sel, sel_impl};
use once_cell::sync::Lazy;

use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::types::ProcessRef;
use crate::system::platform::{
    AccessibilityPermission, ActivationHandler, CancelFlag, Clipboard, InputSynthesizer, Subscription, Workspace,
};
use crate::system::window::handle::SafeObjcHandle;
use crate::system::window::nswindow::run_on_main_thread;

// Key codes for macOS (ANSI standard)
const K_VK_ANSI_V: CGKeyCode = 0x09;
const K_VK_RETURN: CGKeyCode = 0x24;
const K_VK_TAB: CGKeyCode = 0x30;

// NSApplicationActivateIgnoringOtherApps
const NS_APPLICATION_ACTIVATE_IGNORING_OTHER_APPS: NSUInteger = 1 << 1;

/// Gap between synthetic keystrokes when typing; terminals drop input posted
/// faster than their read loop.
const TYPING_INTERVAL: Duration = Duration::from_millis(4);

const DID_ACTIVATE_APPLICATION: &str = "NSWorkspaceDidActivateApplicationNotification";
const APPLICATION_KEY: &str = "NSWorkspaceApplicationKey";

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: core_foundation::dictionary::CFDictionaryRef) -> bool;
}

static HOST_PROCESS: Lazy<ProcessRef> = Lazy::new(|| {
    autoreleasepool(|| unsafe {
        let app: id = msg_send![class!(NSRunningApplication), currentApplication];
        process_ref(app).unwrap_or_else(|| ProcessRef::new(std::process::id() as i32, None, "host"))
    })
});

/// # Safety
/// `nsstring` must be nil or a valid NSString.
unsafe fn get_nsstring(nsstring: id) -> Option<String> {
    if nsstring == nil {
        return None;
    }
    let ptr = NSString::UTF8String(nsstring);
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// # Safety
/// `app` must be nil or a valid NSRunningApplication.
unsafe fn process_ref(app: id) -> Option<ProcessRef> {
    if app == nil {
        return None;
    }
    let pid: i32 = msg_send![app, processIdentifier];
    let bundle_id = get_nsstring(msg_send![app, bundleIdentifier]);
    let name = get_nsstring(msg_send![app, localizedName]).unwrap_or_else(|| "Unknown".to_string());
    Some(ProcessRef {
        pid,
        bundle_id,
        name,
    })
}

/// The application named by an `NSWorkspaceDidActivateApplicationNotification`.
///
/// # Safety
/// `notification` must be nil or a valid NSNotification.
unsafe fn activated_process(notification: id) -> Option<ProcessRef> {
    if notification == nil {
        return None;
    }
    let user_info: id = msg_send![notification, userInfo];
    if user_info == nil {
        return None;
    }
    let key = NSString::alloc(nil).init_str(APPLICATION_KEY);
    let app: id = msg_send![user_info, objectForKey: key];
    let _: () = msg_send![key, release];
    process_ref(app)
}

/// `Workspace` backed by `NSWorkspace` and `NSRunningApplication`.
pub struct NativeWorkspace;

impl Workspace for NativeWorkspace {
    fn host_process(&self) -> ProcessRef {
        HOST_PROCESS.clone()
    }

    fn frontmost_process(&self) -> Option<ProcessRef> {
        autoreleasepool(|| unsafe {
            let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
            let front_app: id = msg_send![workspace, frontmostApplication];
            process_ref(front_app)
        })
    }

    fn activate(&self, pid: i32) -> OverlayResult<()> {
        autoreleasepool(|| unsafe {
            let app: id = msg_send![class!(NSRunningApplication), runningApplicationWithProcessIdentifier: pid];
            if app == nil {
                return Err(OverlayError::System(format!("No running application with PID {}", pid)));
            }

            let accepted: BOOL = msg_send![app, activateWithOptions: NS_APPLICATION_ACTIVATE_IGNORING_OTHER_APPS];
            if accepted == NO {
                return Err(OverlayError::System(format!("PID {} refused activation", pid)));
            }
            Ok(())
        })
    }

    fn observe_activations(&self, label: &str, handler: ActivationHandler) -> OverlayResult<Subscription> {
        let observer = run_on_main_thread(move || unsafe {
            let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
            let center: id = msg_send![workspace, notificationCenter];
            let main_queue: id = msg_send![class!(NSOperationQueue), mainQueue];
            let name = NSString::alloc(nil).init_str(DID_ACTIVATE_APPLICATION);

            let block = ConcreteBlock::new(move |notification: id| {
                // Never unwind across the FFI boundary
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    autoreleasepool(|| {
                        if let Some(process) = activated_process(notification) {
                            handler(process);
                        }
                    })
                }));
                if outcome.is_err() {
                    tracing::error!("Activation observer panicked");
                }
            });
            let block = block.copy();

            let observer: id = msg_send![center, addObserverForName: name
                                                             object: nil
                                                              queue: main_queue
                                                         usingBlock: &*block];
            let _: () = msg_send![name, release];
            SafeObjcHandle::retain(observer)
        })?
        .ok_or_else(|| OverlayError::System("Notification center refused the activation observer".to_string()))?;

        Ok(Subscription::new(label, move || {
            let removed = run_on_main_thread(move || unsafe {
                let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
                let center: id = msg_send![workspace, notificationCenter];
                let _: () = msg_send![center, removeObserver: observer.as_id()];
                drop(observer);
            });
            if let Err(e) = removed {
                tracing::error!("Failed to remove activation observer: {}", e);
            }
        }))
    }
}

/// `AccessibilityPermission` backed by `AXIsProcessTrusted[WithOptions]`.
pub struct AccessibilityTrust;

impl AccessibilityPermission for AccessibilityTrust {
    fn is_trusted(&self) -> bool {
        unsafe { AXIsProcessTrusted() }
    }

    fn prompt(&self) -> bool {
        use core_foundation::base::TCFType;
        use core_foundation::boolean::CFBoolean;
        use core_foundation::dictionary::CFDictionary;
        use core_foundation::string::CFString;

        let key = CFString::from_static_string("AXTrustedCheckOptionPrompt");
        let value = CFBoolean::true_value();
        let options = CFDictionary::from_CFType_pairs(&[(key.as_CFType(), value.as_CFType())]);

        unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
    }
}

/// Post a key down/up pair with `flags` to the HID event tap.
fn simulate_keypress(key_code: CGKeyCode, flags: CGEventFlags) -> OverlayResult<()> {
    let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| OverlayError::System("Failed to create CGEventSource".to_string()))?;

    let key_down = CGEvent::new_keyboard_event(source.clone(), key_code, true)
        .map_err(|_| OverlayError::System("Failed to create key down event".to_string()))?;
    key_down.set_flags(flags);
    key_down.post(CGEventTapLocation::HID);

    let key_up = CGEvent::new_keyboard_event(source, key_code, false)
        .map_err(|_| OverlayError::System("Failed to create key up event".to_string()))?;
    key_up.set_flags(flags);
    key_up.post(CGEventTapLocation::HID);

    Ok(())
}

/// Post one character as a keyboard event carrying the unicode string.
fn type_character(source: &CGEventSource, ch: char) -> OverlayResult<()> {
    let mut buf = [0u8; 4];
    let text = ch.encode_utf8(&mut buf);

    for key_down in [true, false] {
        let event = CGEvent::new_keyboard_event(source.clone(), 0, key_down)
            .map_err(|_| OverlayError::System("Failed to create keyboard event".to_string()))?;
        event.set_flags(CGEventFlags::CGEventFlagNull);
        event.set_string(text);
        event.post(CGEventTapLocation::HID);
    }
    Ok(())
}

/// `InputSynthesizer` posting CoreGraphics keyboard events.
pub struct KeyboardSynthesizer;

impl InputSynthesizer for KeyboardSynthesizer {
    fn paste_shortcut(&self) -> OverlayResult<()> {
        simulate_keypress(K_VK_ANSI_V, CGEventFlags::CGEventFlagCommand)
    }

    fn type_text(&self, text: &str, cancel: &CancelFlag) -> OverlayResult<()> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| OverlayError::System("Failed to create CGEventSource".to_string()))?;

        let mut typed = 0usize;
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            if cancel.is_cancelled() {
                tracing::info!("Typing stopped after {} characters", typed);
                return Err(OverlayError::PasteCancelled);
            }
            match ch {
                // CRLF types a single Return
                '\r' if chars.peek() == Some(&'\n') => continue,
                '\r' | '\n' => simulate_keypress(K_VK_RETURN, CGEventFlags::CGEventFlagNull)?,
                '\t' => simulate_keypress(K_VK_TAB, CGEventFlags::CGEventFlagNull)?,
                _ => type_character(&source, ch)?,
            }
            typed += 1;
            thread::sleep(TYPING_INTERVAL);
        }

        tracing::debug!("Typed {} characters", typed);
        Ok(())
    }
}

/// `Clipboard` backed by `cli-clipboard` (reads NSPasteboard without activating the app).
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn read_text(&self) -> OverlayResult<Option<String>> {
        use cli_clipboard::{ClipboardContext, ClipboardProvider};

        let mut ctx = ClipboardContext::new()
            .map_err(|e| OverlayError::System(format!("Clipboard unavailable: {}", e)))?;

        match ctx.get_contents() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                // No string flavour on the pasteboard (image, file, empty)
                tracing::debug!("Clipboard has no text: {}", e);
                Ok(None)
            }
        }
    }
}
