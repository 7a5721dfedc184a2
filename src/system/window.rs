//! Overlay panel and screen geometry
//!
//! - `coords`: Cocoa (bottom-left) to global top-left conversion
//! - `handle`: retained Objective-C pointers and the native view payload
//! - `nswindow`: main-thread dispatch, activation policy, screens and pointer
//! - `panel`: the floating NSPanel and the `WindowServer` built on it

pub mod coords;

#[cfg(target_os = "macos")]
pub mod handle;
#[cfg(target_os = "macos")]
pub mod nswindow;
#[cfg(target_os = "macos")]
pub mod panel;

#[cfg(target_os = "macos")]
pub use handle::{NativeView, SafeObjcHandle};
#[cfg(target_os = "macos")]
pub use nswindow::{run_on_main_thread, set_app_activation_policy_accessory, ScreenLayout};
#[cfg(target_os = "macos")]
pub use panel::{FloatingPanel, PanelWindowServer};
