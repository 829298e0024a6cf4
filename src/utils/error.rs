//! Error types and handling
//!
//! Common error types used across the recorder.

use crate::capture::traits::DeviceError;
use crate::upload::types::UploadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Browser not supported: {0}")]
    BrowserNotSupported(String),

    #[error("Invalid capture constraints: at least one of video or audio must be requested")]
    InvalidConstraints,

    #[error("No capture device available")]
    NoDeviceAvailable,

    #[error("Device access error: {0}")]
    DeviceAccess(#[from] DeviceError),

    #[error("Recorder initialization error: {0}")]
    RecorderInit(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("This recording has already been uploaded")]
    AlreadyUploaded,

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: String,
    },

    #[error("Recorder has been destroyed")]
    Destroyed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error classes surfaced to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Configuration,
    BrowserNotSupported,
    NoDeviceAvailable,
    DeviceAccess,
    RecorderInit,
    EntryCreation,
    Transfer,
    Cancelled,
    InvalidState,
    Io,
}

impl ErrorKind {
    /// Fatal errors can't be left through `reset()`
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Configuration | ErrorKind::BrowserNotSupported)
    }

    /// Upload errors keep the recording so the user can retry
    pub fn is_upload_failure(&self) -> bool {
        matches!(self, ErrorKind::EntryCreation | ErrorKind::Transfer)
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::BrowserNotSupported => "BROWSER_NOT_SUPPORTED",
            ErrorKind::NoDeviceAvailable => "NO_DEVICE_AVAILABLE",
            ErrorKind::DeviceAccess => "DEVICE_ACCESS_ERROR",
            ErrorKind::RecorderInit => "RECORDER_INIT_ERROR",
            ErrorKind::EntryCreation => "ENTRY_CREATION_ERROR",
            ErrorKind::Transfer => "TRANSFER_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Io => "IO_ERROR",
        }
    }
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::Configuration(_) => ErrorKind::Configuration,
            RecorderError::BrowserNotSupported(_) => ErrorKind::BrowserNotSupported,
            RecorderError::InvalidConstraints | RecorderError::NoDeviceAvailable => {
                ErrorKind::NoDeviceAvailable
            }
            RecorderError::DeviceAccess(_) => ErrorKind::DeviceAccess,
            RecorderError::RecorderInit(_) => ErrorKind::RecorderInit,
            RecorderError::Upload(e) => e.kind(),
            RecorderError::AlreadyUploaded
            | RecorderError::InvalidState { .. }
            | RecorderError::Destroyed => ErrorKind::InvalidState,
            RecorderError::Io(_) | RecorderError::Serialization(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_state(action: &'static str, state: impl std::fmt::Display) -> Self {
        RecorderError::InvalidState {
            action,
            state: state.to_string(),
        }
    }
}

/// Error response for the host page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        ErrorResponse {
            code: error.kind().code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bind_folds_into_entry_creation() {
        let err = RecorderError::from(UploadError::TokenBind {
            message: "bad token".into(),
            entry_id: Some("0_abc".into()),
        });
        assert_eq!(err.kind(), ErrorKind::EntryCreation);
        assert!(err.kind().is_upload_failure());
    }

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(RecorderError::Configuration("missing ks".into()));
        assert_eq!(response.code, "CONFIGURATION_ERROR");
        assert!(response.message.contains("missing ks"));

        let response = ErrorResponse::from(RecorderError::from(DeviceError::PermissionDenied));
        assert_eq!(response.code, "DEVICE_ACCESS_ERROR");
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::Configuration.is_fatal());
        assert!(ErrorKind::BrowserNotSupported.is_fatal());
        assert!(!ErrorKind::DeviceAccess.is_fatal());
        assert!(!ErrorKind::Transfer.is_fatal());
    }
}
