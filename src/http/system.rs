//! Operational endpoints (§6): health, resource limits and history, task
//! administration, error telemetry, and the performance/cache surface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::domain::TaskFamily;
use crate::registry::ActiveTaskCounts;
use crate::resources::LimitUpdate;
use crate::server::Server;

use super::error_response::ApiError;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub async fn health(State(server): State<Arc<Server>>) -> Result<impl IntoResponse, ApiError> {
    let status = server
        .sampler
        .stats()
        .map_err(|err| ApiError::Internal(format!("failed to sample resources: {err}")))?;
    let active_by_family = server.registry.active_task_count_by_family();
    let active_for = |family: TaskFamily| active_by_family.get(&family).copied().unwrap_or(0);

    Ok(Json(json!({
        "status": if status.ok { "healthy" } else { "degraded" },
        "timestamp": now_ms(),
        "activeTranscriptionTasks": active_for(TaskFamily::Transcription),
        "activeDownloadTasks": active_for(TaskFamily::Download),
        "activeKeyframeTasks": active_for(TaskFamily::KeyframeExtraction),
        "activeCompositionTasks": active_for(TaskFamily::Composition),
        "totalActiveTasks": server.registry.active_task_count(),
        "resourceStatus": status,
    })))
}

pub async fn resources(State(server): State<Arc<Server>>) -> Result<impl IntoResponse, ApiError> {
    let status = server
        .sampler
        .stats()
        .map_err(|err| ApiError::Internal(format!("failed to sample resources: {err}")))?;
    Ok(Json(status))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_duration_minutes")]
    duration_minutes: u64,
}

fn default_history_duration_minutes() -> u64 {
    5
}

pub async fn resource_history(
    State(server): State<Arc<Server>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !(1..=60).contains(&query.duration_minutes) {
        return Err(ApiError::BadRequest(
            "duration_minutes must be within 1..=60".to_string(),
        ));
    }
    let history = server.sampler.history(Duration::from_secs(query.duration_minutes * 60));
    Ok(Json(json!({ "samples": history })))
}

pub async fn resource_cleanup(State(server): State<Arc<Server>>) -> impl IntoResponse {
    server.sampler.force_cleanup();
    Json(json!({ "cleaned": true }))
}

#[derive(Deserialize)]
pub struct LimitsPatch {
    max_concurrent_tasks: Option<usize>,
    max_cpu_pct: Option<f64>,
    max_mem_pct: Option<f64>,
    max_disk_pct: Option<f64>,
    min_free_disk_gb: Option<f64>,
}

pub async fn update_limits(
    State(server): State<Arc<Server>>,
    Query(patch): Query<LimitsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let updates = [
        patch.max_concurrent_tasks.map(LimitUpdate::MaxConcurrentTasks),
        patch.max_cpu_pct.map(LimitUpdate::MaxCpuPct),
        patch.max_mem_pct.map(LimitUpdate::MaxMemPct),
        patch.max_disk_pct.map(LimitUpdate::MaxDiskPct),
        patch.min_free_disk_gb.map(LimitUpdate::MinFreeDiskGb),
    ];

    for update in updates.into_iter().flatten() {
        server.sampler.update_limit(update).map_err(ApiError::BadRequest)?;
    }

    Ok(Json(server.sampler.limits()))
}

pub async fn task_summary(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let summary = server.registry.summary();
    let by_family: std::collections::HashMap<&'static str, _> = summary
        .by_family
        .iter()
        .map(|(family, counts)| {
            (
                family.as_str(),
                json!({
                    "total": counts.total,
                    "running": counts.running,
                    "completed": counts.completed,
                    "failed": counts.failed,
                    "cancelled": counts.cancelled,
                }),
            )
        })
        .collect();
    Json(json!({ "total": summary.total, "byFamily": by_family }))
}

pub async fn error_stats(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(server.errors.stats())
}

#[derive(Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    50
}

pub async fn error_recent(
    State(server): State<Arc<Server>>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    Json(server.errors.recent(query.limit))
}

pub async fn cleanup_stats(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let cache_stats = server.cache.stats();
    Json(json!({ "cache": cache_stats }))
}

pub async fn cleanup_force(State(server): State<Arc<Server>>) -> impl IntoResponse {
    server.sampler.force_cleanup();
    let evicted = server.cache.evict_expired();
    Json(json!({ "cacheEvicted": evicted }))
}

pub async fn performance_stats(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let sample = server.sampler.latest();
    Json(json!({ "latestSample": sample, "cache": server.cache.stats() }))
}

pub async fn cache_stats(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(server.cache.stats())
}

pub async fn cache_clear(State(server): State<Arc<Server>>) -> impl IntoResponse {
    server.cache.clear();
    Json(json!({ "cleared": true }))
}

pub async fn hardware(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({
        "acceleratedEncoders": server.hardware.accelerated_encoders,
        "preferredEncoder": server.hardware.preferred_encoder,
    }))
}

pub async fn memory_stats(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let sample = server.sampler.latest();
    Json(json!({ "memPct": sample.map(|s| s.mem_pct) }))
}

pub async fn memory_cleanup(State(server): State<Arc<Server>>) -> impl IntoResponse {
    server.sampler.force_cleanup();
    Json(json!({ "cleaned": true }))
}

pub async fn optimize(State(server): State<Arc<Server>>) -> impl IntoResponse {
    server.sampler.force_cleanup();
    let evicted = server.cache.evict_expired();
    Json(json!({ "cacheEvicted": evicted }))
}
