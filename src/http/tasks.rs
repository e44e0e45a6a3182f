//! Task-creating and per-task query endpoints (§6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::domain::{
    CompositionRequest, DownloadRequest, KeyframeRequest, TaskFamily, TaskId, TaskParams, TaskResult, TaskStatusView,
    TranscriptionRequest,
};
use crate::executors;
use crate::process_ext::terminate_then_kill;
use crate::server::Server;

use super::error_response::ApiError;

#[derive(Serialize)]
struct CreateTaskResponse {
    task_id: TaskId,
    status: &'static str,
}

/// Shared admission-then-create path for every task-creating endpoint
/// (§4.2): check admission, mint the registry record, spawn the executor.
fn admit_and_create(server: &Arc<Server>, params: TaskParams) -> Result<TaskId, ApiError> {
    let verdict = server
        .sampler
        .admission_check()
        .map_err(|err| ApiError::Internal(format!("resource sampling failed: {err}")))?;
    if let Err(reason) = verdict {
        return Err(ApiError::AdmissionRejected(reason));
    }

    let task_id = server.registry.create(params);
    executors::spawn(server.executor_context(), task_id.clone());
    Ok(task_id)
}

pub async fn create_transcription(
    State(server): State<Arc<Server>>,
    Json(request): Json<TranscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = admit_and_create(&server, TaskParams::Transcription(request))?;
    Ok(Json(CreateTaskResponse { task_id, status: "running" }))
}

pub async fn create_download(
    State(server): State<Arc<Server>>,
    Json(request): Json<DownloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = admit_and_create(&server, TaskParams::Download(request))?;
    Ok(Json(CreateTaskResponse { task_id, status: "running" }))
}

pub async fn create_keyframe_extraction(
    State(server): State<Arc<Server>>,
    Json(request): Json<KeyframeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate().map_err(ApiError::BadRequest)?;
    let task_id = admit_and_create(&server, TaskParams::KeyframeExtraction(request))?;
    Ok(Json(CreateTaskResponse { task_id, status: "running" }))
}

pub async fn create_composition(
    State(server): State<Arc<Server>>,
    Json(request): Json<CompositionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate().map_err(ApiError::BadRequest)?;
    let task_id = admit_and_create(&server, TaskParams::Composition(request))?;
    Ok(Json(CreateTaskResponse { task_id, status: "running" }))
}

fn status_for(server: &Arc<Server>, id: &str, expected: TaskFamily) -> Result<TaskStatusView, ApiError> {
    let view = server.registry.status_view(id).ok_or(ApiError::NotFound)?;
    if view.family != expected {
        return Err(ApiError::NotFound);
    }
    Ok(view)
}

macro_rules! status_handler {
    ($name:ident, $family:expr) => {
        pub async fn $name(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
            Ok(Json(status_for(&server, &id, $family)?))
        }
    };
}

status_handler!(transcription_status, TaskFamily::Transcription);
status_handler!(download_status, TaskFamily::Download);
status_handler!(keyframe_status, TaskFamily::KeyframeExtraction);
status_handler!(composition_status, TaskFamily::Composition);

/// Retrieves a completed task's result, distinguishing "not completed yet"
/// (404) from "completed but failed" (409) per §7.
fn result_for(server: &Arc<Server>, id: &str, expected: TaskFamily) -> Result<TaskResult, ApiError> {
    let outcome = server
        .registry
        .with_record(id, |record| {
            if record.family != expected {
                return None;
            }
            Some((record.status, record.result.clone(), record.error.clone()))
        })
        .flatten()
        .ok_or(ApiError::NotFound)?;

    match outcome {
        (_, Some(result), _) => Ok(result),
        (status, None, Some(error)) if status.is_terminal() => Err(ApiError::TaskFailed(error)),
        _ => Err(ApiError::NotFound),
    }
}

pub async fn transcription_result(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match result_for(&server, &id, TaskFamily::Transcription)? {
        TaskResult::Transcription(result) => Ok(Json(result)),
        _ => Err(ApiError::Internal("task result family mismatch".to_string())),
    }
}

pub async fn download_result(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match result_for(&server, &id, TaskFamily::Download)? {
        TaskResult::Download(result) => Ok(Json(result)),
        _ => Err(ApiError::Internal("task result family mismatch".to_string())),
    }
}

pub async fn keyframe_result(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match result_for(&server, &id, TaskFamily::KeyframeExtraction)? {
        TaskResult::KeyframeExtraction(result) => Ok(Json(result)),
        _ => Err(ApiError::Internal("task result family mismatch".to_string())),
    }
}

pub async fn composition_result(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match result_for(&server, &id, TaskFamily::Composition)? {
        TaskResult::Composition(result) => Ok(Json(result)),
        _ => Err(ApiError::Internal("task result family mismatch".to_string())),
    }
}

pub async fn keyframe_image(
    State(server): State<Arc<Server>>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let result = match result_for(&server, &id, TaskFamily::KeyframeExtraction)? {
        TaskResult::KeyframeExtraction(result) => result,
        _ => return Err(ApiError::Internal("task result family mismatch".to_string())),
    };
    let frame = result.frames.get(index).ok_or(ApiError::NotFound)?;
    let path = server.config.keyframes_dir().join(&id).join(&frame.filename);
    serve_file(&path).await
}

pub async fn keyframe_thumbnail(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    result_for(&server, &id, TaskFamily::KeyframeExtraction)?;
    let path = server.config.keyframes_dir().join(&id).join("thumbnail.jpg");
    serve_file(&path).await
}

pub async fn composition_file(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let result = match result_for(&server, &id, TaskFamily::Composition)? {
        TaskResult::Composition(result) => result,
        _ => return Err(ApiError::Internal("task result family mismatch".to_string())),
    };
    serve_file(std::path::Path::new(&result.output_file)).await
}

async fn serve_file(path: &std::path::Path) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|_| ApiError::NotFound)?;
    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    };
    Ok(([(axum::http::header::CONTENT_TYPE, content_type)], bytes).into_response())
}

pub async fn cancel_task(State(server): State<Arc<Server>>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    match server.registry.cancel(&id) {
        Some(child) => {
            if let Some(mut handle) = child {
                terminate_then_kill(&mut handle.child, std::time::Duration::from_secs(5));
            }
            Ok(Json(json!({ "cancelled": true })))
        }
        None => {
            if server.registry.status_view(&id).is_none() {
                Err(ApiError::NotFound)
            } else {
                Ok(Json(json!({ "cancelled": false })))
            }
        }
    }
}

pub async fn force_cleanup_task(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = server.registry.status_view(&id).ok_or(ApiError::NotFound)?;
    let _ = view;
    let cancel_outcome = server.registry.cancel(&id);
    if let Some(Some(mut handle)) = cancel_outcome {
        terminate_then_kill(&mut handle.child, std::time::Duration::from_secs(5));
    }
    let temp_paths = server
        .registry
        .with_record_mut(&id, |record| std::mem::take(&mut record.temp_paths))
        .unwrap_or_default();
    for path in temp_paths {
        let _ = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
    }
    Ok(Json(json!({ "cleaned": true })))
}
