//! Error types shared across the bridge

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Failures reported by a device driver
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Device unreachable or handshake failed
    #[error("connection error: {0}")]
    Connection(String),
    /// A single address could not be read
    #[error("read error at {address}: {reason}")]
    Read { address: String, reason: String },
    /// Anything else the driver reports
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl DeviceError {
    pub fn read(address: impl Into<String>, reason: impl ToString) -> Self {
        DeviceError::Read {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("variable not found: {0}")]
    VariableNotFound(String),
    #[error("metrics endpoint disabled")]
    MetricsDisabled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::VariableNotFound(_) | ApiError::MetricsDisabled => StatusCode::NOT_FOUND,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_display() {
        let err = DeviceError::read("HR100", "illegal data address");
        assert_eq!(err.to_string(), "read error at HR100: illegal data address");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = ApiError::VariableNotFound("M0.0".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
