//! Maps internal errors onto HTTP responses (§7). The only place `TaskError`
//! and ad-hoc admission/lookup failures become a status code + JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{ErrorKind, TaskError};

pub enum ApiError {
    BadRequest(String),
    AdmissionRejected(String),
    NotFound,
    /// The task exists but is terminal-and-failed, distinct from "not yet
    /// completed" (§7's 404-vs-409 split).
    TaskFailed(TaskError),
    Internal(String),
}

impl From<TaskError> for ApiError {
    fn from(error: TaskError) -> Self {
        match error.kind {
            ErrorKind::InputValidation => ApiError::BadRequest(error.message),
            ErrorKind::ResourceLimit => ApiError::AdmissionRejected(error.message),
            _ => ApiError::TaskFailed(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::AdmissionRejected(message) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": message })),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not found" })),
            ApiError::TaskFailed(error) => (
                StatusCode::CONFLICT,
                json!({ "error": error.message, "kind": error.kind }),
            ),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message })),
        };
        (status, Json(body)).into_response()
    }
}
