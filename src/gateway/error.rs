//! Error mapping from the core taxonomy to HTTP

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::CoreError;

/// Gateway-facing error wrapper.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::InvalidArgument(_) | CoreError::InsufficientFunds(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvariantViolation(_) | CoreError::Transient(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if err.is_alert() {
            tracing::error!(error = %err, "request failed with internal error");
        }

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let api: ApiError = CoreError::InsufficientFunds("x".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = CoreError::NotFound("x".into()).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = CoreError::Transient("x".into()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
