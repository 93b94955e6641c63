//! ==============================================================================
//! error.rs - request-level error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     one error type for everything a request can fail with.
//!     maps each variant onto an http status so handlers can just use `?`.
//!
//! taxonomy:
//!     - InvalidInput: malformed telemetry/command payload (client error)
//!     - StorageUnavailable: the database rejected or lost a write (server error)
//!     - DetectionUnavailable: the external classifier failed (bad gateway)
//!
//! ```text
//!     "no record yet" is not an error here: latest queries return an
//!     empty/default body instead.
//! ```
//!
//! ==============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed payload: missing field, wrong type, non-finite number,
    /// unparseable timestamp
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence could not accept the write
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The detection pipeline did not give a usable answer
    #[error("detection unavailable: {0}")]
    DetectionUnavailable(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            Error::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            Error::DetectionUnavailable(_) => (StatusCode::BAD_GATEWAY, "DETECTION_UNAVAILABLE"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidInput(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "request failed");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::invalid("x").status_and_code().0, StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::StorageUnavailable("disk".into()).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::DetectionUnavailable("timeout".into()).status_and_code().0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_json_errors_are_client_errors() {
        let err: Error = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
