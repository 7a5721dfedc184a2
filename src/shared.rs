pub mod types;
pub mod settings;
pub mod error;
pub mod events;
pub mod logging;

// Re-export the error pair for convenience
pub use error::{OverlayError, OverlayResult};
