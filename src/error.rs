//! Custom error types for selection-text-prompter.
//!
//! Startup problems (bad hotkeys, OS registration, config) are [`StpError`];
//! network delivery has its own [`DispatchError`] so that cancellation stays
//! a distinct outcome instead of a generic failure.

use std::io;
use thiserror::Error;

/// Main error type for selection-text-prompter operations.
#[derive(Error, Debug)]
pub enum StpError {
    /// The hotkey string could not be parsed.
    #[error("invalid hotkey '{spec}': {reason}")]
    InvalidHotkey { spec: String, reason: String },

    /// The OS refused to register or install a hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// Hotkey installation did not report back in time.
    #[error("timed out after {0:?} installing hotkeys")]
    HotkeyTimeout(std::time::Duration),

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Extra request fields were not a JSON object.
    #[error("invalid extra config: {0}")]
    InvalidExtraConfig(String),

    /// Clipboard access failed.
    #[error("clipboard error: {0}")]
    Clipboard(String),

    /// Synthetic copy/paste keystroke failed.
    #[error("input simulation error: {0}")]
    Input(String),

    /// Platform-specific operation is not supported.
    #[error("operation not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Request delivery failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal outcome of a failed [`send_with_retry`](crate::dispatch::send_with_retry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The job's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    #[error("API endpoint empty")]
    EmptyEndpoint,

    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Endpoint answered with a non-2xx status.
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for selection-text-prompter operations.
pub type Result<T> = std::result::Result<T, StpError>;

impl StpError {
    /// Create a new InvalidHotkey error.
    pub fn invalid_hotkey(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHotkey {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Hotkey error.
    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }

    /// Create a new ConfigValidation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_extra_config(message: impl Into<String>) -> Self {
        Self::InvalidExtraConfig(message.into())
    }

    pub fn clipboard(message: impl Into<String>) -> Self {
        Self::Clipboard(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Create a new UnsupportedPlatform error.
    pub fn unsupported_platform(message: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StpError::invalid_hotkey("ctrl+q+", "empty token");
        assert_eq!(err.to_string(), "invalid hotkey 'ctrl+q+': empty token");

        let err = StpError::config_validation("max_retry must be at least 1");
        assert_eq!(
            err.to_string(),
            "configuration error: max_retry must be at least 1"
        );

        let err = StpError::from(DispatchError::Status {
            status: 503,
            body: "busy".to_string(),
        });
        assert_eq!(err.to_string(), "status 503: busy");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let stp_err: StpError = io_err.into();
        assert!(matches!(stp_err, StpError::Io(_)));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(DispatchError::Cancelled.is_cancelled());
        assert!(!DispatchError::Transport("reset".into()).is_cancelled());
        assert!(!DispatchError::EmptyEndpoint.is_cancelled());
    }
}
