use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::FailurePayload;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    status: &'static str,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: &self.message,
            status: "failed",
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        // Only validation surfaces synchronously; later failures go to the callback.
        let status = match err {
            RelayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid location request: {0}")]
    Validation(String),
    #[error("upstream responded {status}: {detail}")]
    Upstream { status: u16, detail: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("task was cancelled")]
    Cancelled,
}

impl RelayError {
    pub fn failure_payload(&self) -> FailurePayload {
        match self {
            RelayError::Upstream { status, detail } => FailurePayload::new(*status, detail.clone()),
            _ => FailurePayload::new(500, "Task was cancelled"),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RelayError::Transport(_) | RelayError::Cancelled)
    }
}
