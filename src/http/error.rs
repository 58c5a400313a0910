use axum::{Json, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::warn;

use crate::service::ServiceError;

pub type AppResult<T> = Result<T, AppError>;

/// JSON error body: `{"error": ..., "message": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl AppError {
    /// Create a new [`AppError`].
    pub fn new(status: StatusCode, error: impl ToString, message: Option<impl ToString>) -> Self {
        Self {
            status,
            error: error.to_string(),
            message: message.map(|m| m.to_string()),
        }
    }

    /// `405` for methods the resource does not support.
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", None::<String>)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Validation { source } => {
                Self::new(StatusCode::BAD_REQUEST, source, None::<String>)
            }
            ServiceError::Retrieve { ref source } | ServiceError::Append { ref source } => {
                warn!(err = %source, "{value}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, &value, Some(source))
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            Some(value.body_text()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValidationError;

    #[test]
    fn body_shape() {
        let err = AppError::from(ServiceError::Validation {
            source: ValidationError::EmptyText,
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({ "error": "Confession text is required" })
        );

        let err = AppError::method_not_allowed();
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({ "error": "Method not allowed" })
        );
    }
}
