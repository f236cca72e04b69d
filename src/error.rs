//! # Error Types
//!
//! Custom error types for Etch Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Etch Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload or printer profile parse errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial ports could be opened
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Controller read/open errors
    #[error("Controller error: {0}")]
    Controller(String),

    /// Requested controller is not attached
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    /// Raw axis sample outside the advertised range
    #[error("Axis {axis} value {value} is out of range")]
    AxisOutOfRange { axis: &'static str, value: i32 },

    /// The motion device refused to accept work
    #[error("Printer is not operational")]
    DeviceNotOperational,

    /// Activation requested without an id
    #[error("No controller ID provided")]
    MissingControllerId,

    /// A different controller already owns the running session
    #[error("Controller {0} is already active")]
    SessionActive(String),

    /// A detached loop thread from an earlier session has not exited yet
    #[error("Controller thread for {0} is still stopping")]
    SessionStopping(String),

    /// Device command could not be delivered
    #[error("Command error: {0}")]
    Command(String),

    /// Printer profile could not be read or is unusable
    #[error("Printer profile error: {0}")]
    Profile(String),
}

/// Result type alias for Etch Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
