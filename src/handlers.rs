use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    error::AppError,
    models::{AcceptedResponse, LocationRequest},
    state::AppState,
};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn request_location(
    State(state): State<AppState>,
    payload: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("rejected location request: {}", rejection.body_text());
        AppError::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    })?;

    let task_id = state.relay.accept(&request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            message: "Request is being processed".to_string(),
            task_id,
        }),
    ))
}

pub async fn cancel_location(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let Some(expected) = state.cfg.operator_token.as_deref() else {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "operator cancellation is disabled",
        ));
    };
    let provided = headers
        .get("x-operator-token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "operator token required",
        ));
    }
    if provided != expected {
        warn!(task_id = %task_id, "cancellation with invalid operator token");
        return Err(AppError::new(StatusCode::FORBIDDEN, "invalid operator token"));
    }

    if !state.relay.cancel(&task_id) {
        return Err(AppError::new(StatusCode::NOT_FOUND, "task not found"));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            message: "Cancellation requested".to_string(),
            task_id,
        }),
    ))
}

// The owning job is not known here.
pub async fn receive_callback(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<StatusCode, AppError> {
    let body = body.map_err(|rejection| {
        error!("error reading callback request: {}", rejection.body_text());
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error processing request")
    })?;
    let notification: Value = serde_json::from_slice(&body).map_err(|err| {
        error!("error processing callback request: {err}");
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error processing request")
    })?;

    info!(bytes = body.len(), "received callback notification");
    if !state.queue.push(notification) {
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error processing request",
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}
