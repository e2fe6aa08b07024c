// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::validation::ValidationError;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence did not complete within {0:?}")]
    PersistTimeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection is already bound to an identity")]
    AlreadyJoined,

    #[error("Connection has not joined")]
    NotJoined,
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyJoined => StatusCode::CONFLICT,
            AppError::NotJoined => StatusCode::UNAUTHORIZED,
            AppError::PersistTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
            AppError::PersistTimeout(_) => "STORE_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Config(_) => "CFG_001",
            AppError::AlreadyJoined => "SESSION_001",
            AppError::NotJoined => "SESSION_002",
        }
    }

    /// Get a sanitized message suitable for sending to clients
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Config(_) => {
                "An internal server error occurred".to_string()
            },
            AppError::Io(_) | AppError::Json(_) | AppError::PersistTimeout(_) => {
                "Storage is temporarily unavailable".to_string()
            },
            // validation text is written for end users already
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::AlreadyJoined => {
                "This connection has already joined; reconnect to change identity".to_string()
            },
            AppError::NotJoined => "Join before sending messages".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // debug builds return the full error text
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_app_error_display() {
        let io_error = AppError::Io(IoError::new(ErrorKind::NotFound, "File not found"));
        assert!(io_error.to_string().contains("IO error"));

        let timeout = AppError::PersistTimeout(Duration::from_millis(250));
        assert!(timeout.to_string().contains("250ms"));
    }

    #[test]
    fn test_app_error_codes() {
        assert_eq!(AppError::AlreadyJoined.error_code(), "SESSION_001");
        assert_eq!(AppError::NotJoined.error_code(), "SESSION_002");
        assert_eq!(
            AppError::InvalidInput("bad".to_string()).error_code(),
            "VAL_001"
        );
        assert_eq!(
            AppError::PersistTimeout(Duration::from_secs(1)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_persistence_errors_are_sanitized() {
        let err = AppError::Io(IoError::new(ErrorKind::PermissionDenied, "/var/data/users.json"));
        assert!(!err.sanitized_message().contains("users.json"));
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: AppError = ValidationError::InvalidUsername("too long".to_string()).into();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(err.sanitized_message().contains("too long"));
    }

    #[tokio::test]
    async fn test_error_into_response() {
        let response = AppError::InvalidInput("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
