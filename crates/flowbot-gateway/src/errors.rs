use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use flowbot_core::FlowbotError;

/// Error returned by gateway handlers.
///
/// Every variant renders as `{"error": code, "message": text}`.
#[derive(Debug)]
pub enum ApiError {
    /// 404
    NotFound(String),
    /// 409, the session kept changing underneath the request
    Conflict(String),
    /// 500
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "session_conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (status, _, msg) = self.parts();
        write!(f, "{}: {}", status, msg)
    }
}

impl From<FlowbotError> for ApiError {
    fn from(err: FlowbotError) -> Self {
        match err {
            FlowbotError::FlowNotFound { .. } => ApiError::NotFound(err.to_string()),
            FlowbotError::SessionConflict { .. } => ApiError::Conflict(err.to_string()),
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = Json(json!({
            "error": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let not_found: ApiError = FlowbotError::FlowNotFound {
            flow_id: "f".into(),
            owner: "o".into(),
        }
        .into();
        assert_eq!(not_found.parts().0, StatusCode::NOT_FOUND);

        let conflict: ApiError = FlowbotError::SessionConflict {
            flow_id: "f".into(),
            session_key: "k".into(),
            attempts: 3,
        }
        .into();
        assert_eq!(conflict.parts().0, StatusCode::CONFLICT);

        let db: ApiError = FlowbotError::Database("disk full".into()).into();
        assert_eq!(db.parts(), (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Database error: disk full"));
    }
}
