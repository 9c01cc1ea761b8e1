pub mod admin;
pub mod health;
pub mod sessions;

use axum::{http::StatusCode, Json};
use otpgate_auth::GateError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a gate error to its HTTP status and stable error code.
pub fn gate_error(err: GateError) -> ApiError {
    let (status, code) = match err {
        GateError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
        GateError::StoreWrite(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_write_error"),
        GateError::StoreRead(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_read_error"),
        GateError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        GateError::InvalidStage { .. } => (StatusCode::CONFLICT, "invalid_stage"),
        GateError::SessionClosed => (StatusCode::GONE, "session_closed"),
    };

    if status.is_server_error() {
        tracing::error!("{}", err);
    }

    (status, Json(ErrorResponse::new(code, &err.inline_message())))
}
