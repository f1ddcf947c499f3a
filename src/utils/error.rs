//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::{AcquisitionError, DeviceError};
use crate::recorder::RecorderError;
use crate::session::SessionError;
use crate::upload::PipelineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Error response for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(code: &str, message: impl ToString) -> Self {
        ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<&DeviceError> for ErrorResponse {
    fn from(error: &DeviceError) -> Self {
        let code = match error {
            DeviceError::PermissionDenied(_) => "PERMISSION_DENIED",
            DeviceError::Enumeration(_) => "DEVICE_ERROR",
        };
        ErrorResponse::new(code, error)
    }
}

impl From<&AcquisitionError> for ErrorResponse {
    fn from(error: &AcquisitionError) -> Self {
        let code = match error {
            AcquisitionError::PermissionRequired => "PERMISSION_DENIED",
            _ => "ACQUISITION_ERROR",
        };
        ErrorResponse::new(code, error)
    }
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        let code = match error {
            RecorderError::CaptureLost(_) => "CAPTURE_LOST",
            _ => "RECORDING_ERROR",
        };
        ErrorResponse::new(code, error)
    }
}

impl From<&PipelineError> for ErrorResponse {
    fn from(error: &PipelineError) -> Self {
        ErrorResponse::new(error.code(), error)
    }
}

impl From<&SessionError> for ErrorResponse {
    fn from(error: &SessionError) -> Self {
        match error {
            SessionError::NotReady => ErrorResponse::new("NOT_READY", error),
            SessionError::RoomFull(_) => ErrorResponse::new("ROOM_FULL", error),
            SessionError::Device(e) => e.into(),
            SessionError::Acquisition(e) => e.into(),
            SessionError::Recorder(e) => e.into(),
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        match &error {
            AppError::Io(_) => ErrorResponse::new("IO_ERROR", &error),
            AppError::Serialization(_) => ErrorResponse::new("SERIALIZATION_ERROR", &error),
            AppError::Config(_) => ErrorResponse::new("CONFIG_ERROR", &error),
            AppError::Session(e) => e.into(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TrackKind;

    #[test]
    fn test_codes() {
        let denied = SessionError::Device(DeviceError::PermissionDenied(vec![TrackKind::Video]));
        assert_eq!(ErrorResponse::from(&denied).code, "PERMISSION_DENIED");
        assert_eq!(ErrorResponse::from(&SessionError::NotReady).code, "NOT_READY");

        let stalled = PipelineError::ProcessingStalled { idle_secs: 60 };
        let response = ErrorResponse::from(&stalled);
        assert_eq!(response.code, "PROCESSING_STALLED");
        assert!(response.message.contains("60s"));

        let app: ErrorResponse = AppError::Config("bad".into()).into();
        assert_eq!(app.code, "CONFIG_ERROR");
    }
}
