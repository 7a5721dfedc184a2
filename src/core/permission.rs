//! Permission gate
//!
//! Global key/pointer monitors only deliver events from other processes once
//! the host is trusted for accessibility. Without it the overlay keeps working
//! with host-local monitors and a visible warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::shared::error::{OverlayError, OverlayResult};
use crate::system::platform::AccessibilityPermission;

pub const PERMISSION_WARNING: &str =
    "Accessibility access is off. The overlay trigger only works while this app is focused. \
     Enable it in System Settings > Privacy & Security > Accessibility.";

pub struct PermissionGate {
    backend: Arc<dyn AccessibilityPermission>,
    /// The system prompt is shown once, at onboarding. Seeded from the
    /// persisted settings so a later launch never asks again.
    prompted: AtomicBool,
    denial_logged: AtomicBool,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn AccessibilityPermission>, already_prompted: bool) -> Self {
        Self {
            backend,
            prompted: AtomicBool::new(already_prompted),
            denial_logged: AtomicBool::new(false),
        }
    }

    pub fn has_permission(&self) -> bool {
        self.backend.is_trusted()
    }

    /// Whether onboarding has shown the system prompt, in this or an earlier run.
    pub fn was_prompted(&self) -> bool {
        self.prompted.load(Ordering::SeqCst)
    }

    /// Returns the current status. Prompts only while untrusted and only if
    /// onboarding has not prompted before.
    pub fn request_permission(&self) -> bool {
        if self.backend.is_trusted() {
            return true;
        }

        if self.prompted.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::info!("Requesting accessibility permission");
        let granted = self.backend.prompt();
        if !granted {
            tracing::warn!("Accessibility permission not granted yet; user must enable it in System Settings");
        }
        granted
    }

    pub fn open_settings_pane(&self) -> OverlayResult<()> {
        let url = self.backend.settings_url();
        tracing::info!("Opening accessibility settings: {}", url);
        opener::open(url).map_err(|e| OverlayError::System(format!("Failed to open settings pane: {}", e)))
    }

    /// User-visible warning while permission is missing.
    pub fn warning(&self) -> Option<&'static str> {
        if self.has_permission() {
            None
        } else {
            Some(PERMISSION_WARNING)
        }
    }

    /// `PermissionDenied` when untrusted. The denial is logged the first time only.
    pub fn check(&self) -> OverlayResult<()> {
        if self.has_permission() {
            return Ok(());
        }

        let err = OverlayError::PermissionDenied("global event monitoring requires accessibility access".to_string());
        if !self.denial_logged.swap(true, Ordering::SeqCst) {
            tracing::warn!("{}", err);
        }
        Err(err)
    }
}
