//! Desktop integration
//!
//! `platform` holds the traits the core is written against. The remaining
//! modules are the macOS implementations of those traits.

pub mod platform;
pub mod window;

#[cfg(target_os = "macos")]
pub mod automation;
#[cfg(target_os = "macos")]
pub mod input;

pub use platform::{
    AccessibilityPermission, CancelFlag, Clipboard, Displays, Disposition, EventKind, EventTap, InputSynthesizer,
    MonitorScope, Platform, Subscription, WindowServer, Workspace,
};

/// The platform backed by AppKit, CoreGraphics and the Accessibility API.
///
/// Every AppKit call the adapters make is marshalled to the main thread, so
/// the main thread must be running the Cocoa run loop.
#[cfg(target_os = "macos")]
pub fn macos_platform() -> Platform {
    use std::sync::Arc;

    Platform {
        windows: Arc::new(window::PanelWindowServer::new()),
        workspace: Arc::new(automation::NativeWorkspace),
        events: Arc::new(input::NSEventTap),
        input: Arc::new(automation::KeyboardSynthesizer),
        clipboard: Arc::new(automation::SystemClipboard),
        permission: Arc::new(automation::AccessibilityTrust),
        displays: Arc::new(window::ScreenLayout),
    }
}
