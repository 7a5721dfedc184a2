//! Overlay core
//!
//! Platform-independent logic for the cursor overlay. Everything here talks to
//! the desktop through the traits in `system::platform`.
//!
//! - `permission`: global event observation capability
//! - `placement`: where the panel goes relative to the pointer
//! - `hotkey`: binding string parsing
//! - `trigger`: trigger detection and debounce
//! - `focus`: bounded focus retries
//! - `overlay`: the single overlay instance and its lifecycle
//! - `paste`: hide, reactivate the source app, inject the clipboard
//! - `service`: the event loop that owns all of the above

pub mod permission;
pub mod placement;
pub mod hotkey;
pub mod trigger;
pub mod focus;
pub mod overlay;
pub mod paste;
pub mod service;

pub use overlay::{OverlayManager, OverlayState};
pub use permission::PermissionGate;
pub use placement::{resolve, Placement, PlacementConfig};
pub use service::{ContentProvider, OverlayClient, OverlayService};
pub use trigger::{Trigger, TriggerDetector};
