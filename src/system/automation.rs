//! Workspace, accessibility, clipboard and synthetic input on macOS.

mod macos;

pub use macos::{AccessibilityTrust, KeyboardSynthesizer, NativeWorkspace, SystemClipboard};
