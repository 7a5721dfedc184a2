//! Retained Objective-C handles
//!
//! Pointers that outlive the callback they came from (panels, monitors,
//! notification observers, content views) are held through `SafeObjcHandle`
//! so the object stays alive exactly as long as Rust holds it.

use cocoa::base::{id, nil};
use objc::runtime::{objc_release, objc_retain};

use super::nswindow::run_on_main_thread;
use crate::shared::types::ContentHandle;

/// Owning reference to an Objective-C object.
///
/// # Safety
/// Send + Sync only because every message sent through it goes via
/// `run_on_main_thread` for AppKit objects; the retain count itself is atomic.
pub struct SafeObjcHandle {
    ptr: id,
}

unsafe impl Send for SafeObjcHandle {}
unsafe impl Sync for SafeObjcHandle {}

impl SafeObjcHandle {
    /// Retain `ptr` (a +0 reference, e.g. returned by a getter or a monitor
    /// registration). Returns `None` for nil.
    ///
    /// # Safety
    /// `ptr` must be nil or a valid Objective-C object.
    pub unsafe fn retain(ptr: id) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        let _: id = objc_retain(ptr);
        Some(Self { ptr })
    }

    /// Take over a +1 reference (from `alloc`/`init`, `new`, `copy`).
    ///
    /// # Safety
    /// `ptr` must be nil or a valid object the caller owns.
    pub unsafe fn from_owned(ptr: id) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(Self { ptr })
    }

    pub fn as_id(&self) -> id {
        self.ptr
    }
}

impl Drop for SafeObjcHandle {
    fn drop(&mut self) {
        unsafe {
            objc_release(self.ptr);
        }
    }
}

/// An `NSView` supplied by the content provider.
///
/// Wrap it in a `ContentHandle` with [`NativeView::into_content`]; the panel
/// window server downcasts the handle back to this type and installs the view
/// as the panel's content view.
///
/// The last reference may be dropped on a tokio worker; the release is sent
/// to the main thread so the view is never deallocated off it.
pub struct NativeView(Option<SafeObjcHandle>);

impl NativeView {
    /// # Safety
    /// `view` must be nil or a valid `NSView`.
    pub unsafe fn new(view: id) -> Option<Self> {
        SafeObjcHandle::retain(view).map(|handle| Self(Some(handle)))
    }

    pub fn as_id(&self) -> id {
        self.0.as_ref().map_or(nil, SafeObjcHandle::as_id)
    }

    pub fn into_content(self) -> ContentHandle {
        ContentHandle::new(self)
    }
}

impl Drop for NativeView {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = run_on_main_thread(move || drop(handle)) {
                tracing::error!("Failed to release native view: {}", e);
            }
        }
    }
}
