// Module declarations - these are re-exported from their respective modules
pub mod shared;
pub mod core;
pub mod system;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use crate::core::{ContentProvider, OverlayClient, OverlayManager, OverlayService, OverlayState, PermissionGate};
pub use crate::shared::settings::{OverlaySettings, SettingsStore};
pub use crate::shared::types::{ContentHandle, OverlayContent, OverlayHandle, Point, ProcessRef, Rect, Size};
pub use crate::shared::{OverlayError, OverlayResult};
pub use crate::system::Platform;

#[cfg(target_os = "macos")]
pub use crate::system::window::NativeView;

/// Run the overlay until the service shuts down.
///
/// Must be called from the main thread: it parks that thread in the Cocoa run
/// loop (AppKit work from the adapters is dispatched there) and drives the
/// overlay service on a tokio runtime in the background.
#[cfg(target_os = "macos")]
pub fn run(provider: Arc<dyn ContentProvider>) -> OverlayResult<()> {
    use cocoa::base::id;
    use objc::{class, msg_send, sel, sel_impl};
    use std::time::Duration;

    let on_main_thread = unsafe {
        let current_thread: id = msg_send![class!(NSThread), currentThread];
        let is_main: bool = msg_send![current_thread, isMainThread];
        is_main
    };
    if !on_main_thread {
        return Err(OverlayError::System("run() must be called from the main thread".to_string()));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cursor-overlay")
        .build()?;

    let store = Arc::new(SettingsStore::open_default()?);
    let loaded = runtime.block_on(store.load());
    shared::logging::init(store.current().debug_logging);
    match loaded {
        Ok(_) => tracing::info!("Settings loaded from {}", store.path().display()),
        Err(e) => tracing::warn!("Failed to load settings, using defaults: {}", e),
    }

    // CRITICAL: Accessory mode before any panel is shown, or activating the
    // overlay switches Spaces away from fullscreen apps
    if let Err(e) = system::window::set_app_activation_policy_accessory() {
        tracing::warn!("Failed to set Accessory mode: {}", e);
    }

    let service = OverlayService::from_store(system::macos_platform(), store, provider)?;

    runtime.spawn(async move {
        if let Err(e) = service.run().await {
            tracing::error!("Overlay service failed: {}", e);
        }
        stop_application();
    });

    unsafe {
        let ns_app: id = msg_send![class!(NSApplication), sharedApplication];
        let _: () = msg_send![ns_app, run];
    }

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

/// Leave `-[NSApplication run]`. `stop:` only takes effect once another event
/// is processed, so an empty application-defined event is posted behind it.
#[cfg(target_os = "macos")]
fn stop_application() {
    use cocoa::base::{id, nil, YES};
    use cocoa::foundation::{NSPoint, NSUInteger};
    use objc::{class, msg_send, sel, sel_impl};

    // NSEventTypeApplicationDefined
    const NS_APPLICATION_DEFINED: NSUInteger = 15;

    let stopped = system::window::run_on_main_thread(|| unsafe {
        let ns_app: id = msg_send![class!(NSApplication), sharedApplication];
        let _: () = msg_send![ns_app, stop: nil];

        let event: id = msg_send![class!(NSEvent), otherEventWithType: NS_APPLICATION_DEFINED
                                                               location: NSPoint::new(0.0, 0.0)
                                                          modifierFlags: 0 as NSUInteger
                                                              timestamp: 0.0f64
                                                           windowNumber: 0i64
                                                                context: nil
                                                                subtype: 0i16
                                                                  data1: 0i64
                                                                  data2: 0i64];
        let _: () = msg_send![ns_app, postEvent: event atStart: YES];
    });
    if let Err(e) = stopped {
        tracing::error!("Failed to stop the run loop: {}", e);
    }
}

#[cfg(not(target_os = "macos"))]
pub fn run(_provider: Arc<dyn ContentProvider>) -> OverlayResult<()> {
    Err(OverlayError::System("The cursor overlay is only available on macOS".to_string()))
}
