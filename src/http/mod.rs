//! The HTTP surface (§6): one axum `Router` built from a `Arc<Server>` state,
//! wired with the same CORS/trace layering the engine's desktop shell put
//! around its local bridge server.

mod error_response;
mod system;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::Server;

pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/generate_text_from_video", post(tasks::create_transcription))
        .route("/transcription_status/:id", get(tasks::transcription_status))
        .route("/transcription_result/:id", get(tasks::transcription_result))
        .route("/download_video", post(tasks::create_download))
        .route("/download_status/:id", get(tasks::download_status))
        .route("/download_result/:id", get(tasks::download_result))
        .route("/extract_keyframes", post(tasks::create_keyframe_extraction))
        .route("/keyframe_status/:id", get(tasks::keyframe_status))
        .route("/keyframe_result/:id", get(tasks::keyframe_result))
        .route("/keyframe_image/:id/:index", get(tasks::keyframe_image))
        .route("/keyframe_thumbnail/:id", get(tasks::keyframe_thumbnail))
        .route("/compose_video", post(tasks::create_composition))
        .route("/composition_status/:id", get(tasks::composition_status))
        .route("/composition_result/:id", get(tasks::composition_result))
        .route("/composition_file/:id", get(tasks::composition_file))
        .route("/system/resources", get(system::resources))
        .route("/system/resources/history", get(system::resource_history))
        .route("/system/resources/cleanup", post(system::resource_cleanup))
        .route("/system/resources/limits", put(system::update_limits))
        .route("/system/tasks", get(system::task_summary))
        .route("/system/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/system/tasks/:id/force-cleanup", post(tasks::force_cleanup_task))
        .route("/system/errors/stats", get(system::error_stats))
        .route("/system/errors/recent", get(system::error_recent))
        .route("/system/cleanup/stats", get(system::cleanup_stats))
        .route("/system/cleanup/force", post(system::cleanup_force))
        .route("/system/performance/stats", get(system::performance_stats))
        .route("/system/performance/cache/stats", get(system::cache_stats))
        .route("/system/performance/cache/clear", post(system::cache_clear))
        .route("/system/performance/hardware", get(system::hardware))
        .route("/system/performance/memory", get(system::memory_stats))
        .route("/system/performance/memory/cleanup", post(system::memory_cleanup))
        .route("/system/performance/optimize", post(system::optimize))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(server)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::permissive().max_age(Duration::from_secs(3600))
}
