use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::engine::EngineError;

pub const CONFLICT_MESSAGE: &str = "Vehicle is already reserved for the selected dates";

/// Every failure leaves the service as `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden,
    NotFound(&'static str),
    Conflict(String),
    PayloadTooLarge,
    Overloaded,
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    /// Like `From<EngineError>`, with the message to use for a missing record.
    pub fn from_engine(e: EngineError, not_found: &'static str) -> Self {
        match e {
            EngineError::NotFound(_) => ApiError::NotFound(not_found),
            other => other.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) | ApiError::Conflict(msg) => f.write_str(msg),
            ApiError::Unauthorized(msg) | ApiError::NotFound(msg) => f.write_str(msg),
            ApiError::Forbidden => f.write_str("admin access required"),
            ApiError::PayloadTooLarge => f.write_str("request body too large"),
            ApiError::Overloaded => f.write_str("server busy, retry later"),
            ApiError::Internal => f.write_str("internal storage error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => ApiError::NotFound("Not found"),
            EngineError::AlreadyExists(id) => ApiError::Conflict(format!("already exists: {id}")),
            EngineError::DuplicateEmail(_) => ApiError::Conflict("Email already registered".into()),
            EngineError::Conflict(_) => ApiError::Conflict(CONFLICT_MESSAGE.into()),
            EngineError::Invalid(msg) | EngineError::LimitExceeded(msg) => ApiError::BadRequest(msg.into()),
            EngineError::WalError(e) => {
                tracing::error!("storage failure: {e}");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), "request rejected: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
