use thiserror::Error;
use serde::Serialize;

/// Everything in the overlay core is recoverable; none of these end the process.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum OverlayError {
    /// Global event observation is not allowed; detection narrows to the host process.
    #[error("Permission Denied: {0}")]
    PermissionDenied(String),

    /// The requested size cannot fit the display. Resolved by clamping, kept for logs.
    #[error("Placement Overflow: {0}")]
    PlacementOverflow(String),

    /// The paste target never came to the foreground; the paste is abandoned.
    #[error("Activation Timeout: PID {pid} not frontmost after {waited_ms}ms")]
    ActivationTimeout { pid: i32, waited_ms: u64 },

    /// The overlay stays visible but its primary field never took focus.
    #[error("Focus Error: primary field not focused after {0} attempts")]
    FocusAcquisition(u32),

    /// A newer cycle took over before the injection finished.
    #[error("Paste cancelled")]
    PasteCancelled,

    #[error("Window Error: {0}")]
    Window(String),

    #[error("System Error: {0}")]
    System(String),

    #[error("Settings Error: {0}")]
    Settings(String),

    #[error("Invalid Hotkey: {0}")]
    InvalidHotkey(String),

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Overlay service is not running")]
    ServiceStopped,
}

impl From<std::io::Error> for OverlayError {
    fn from(err: std::io::Error) -> Self {
        OverlayError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        OverlayError::Settings(format!("Serialization error: {}", err))
    }
}

pub type OverlayResult<T> = Result<T, OverlayError>;
