//! Black-box integration tests driving the HTTP surface through
//! `tower::ServiceExt::oneshot`, against a real `Server` backed by the mock
//! codec-tool binary (`tests/mediaserver_mock_ffmpeg.rs`) instead of a real
//! ffmpeg/yt-dlp/whisper install.

use std::sync::{Mutex, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mediaserver::config::ServerConfig;
use mediaserver::server::Server;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Tests that mutate process-wide env vars to steer the mock tool serialize
/// through this lock, the same role `test_support::env_lock()` plays in the
/// engine's own mock-ffmpeg tests.
fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn locate_mock_exe() -> std::path::PathBuf {
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(deps_dir) = current_exe.parent() {
            let mut candidates: Vec<(std::path::PathBuf, Option<std::time::SystemTime>)> =
                std::fs::read_dir(deps_dir)
                    .into_iter()
                    .flatten()
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.file_name()
                            .and_then(|name| name.to_str())
                            .is_some_and(|name| name.starts_with("mediaserver_mock_ffmpeg"))
                    })
                    .filter(|path| path.is_file())
                    .filter(|path| {
                        if cfg!(windows) {
                            path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("exe"))
                        } else {
                            path.extension().is_none()
                        }
                    })
                    .map(|path| {
                        let modified = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
                        (path, modified)
                    })
                    .collect();
            candidates.sort_by_key(|(path, modified)| (*modified, path.clone()));
            if let Some((path, _)) = candidates.pop() {
                return path;
            }
        }
    }
    panic!("unable to locate the mediaserver_mock_ffmpeg test binary");
}

fn test_config(data_root: &std::path::Path, mock_exe: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::from_env();
    config.data_root = data_root.to_path_buf();
    config.ffmpeg_bin = mock_exe.to_string_lossy().to_string();
    config.ffprobe_bin = mock_exe.to_string_lossy().to_string();
    config.ytdlp_bin = mock_exe.to_string_lossy().to_string();
    config.stt_bin = mock_exe.to_string_lossy().to_string();
    config.max_concurrent_tasks = 10;
    config.sampling_interval = std::time::Duration::from_secs(3600);
    config.janitor_interval = std::time::Duration::from_secs(3600);
    config.task_timeout = std::time::Duration::from_secs(30);
    config
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_is_always_ok() {
    let data_root = tempfile::tempdir().unwrap();
    let mock_exe = locate_mock_exe();
    let server = Server::new(test_config(data_root.path(), &mock_exe)).unwrap();
    let app = mediaserver::http::router(server);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_task_id_returns_not_found() {
    let data_root = tempfile::tempdir().unwrap();
    let mock_exe = locate_mock_exe();
    let server = Server::new(test_config(data_root.path(), &mock_exe)).unwrap();
    let app = mediaserver::http::router(server);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/download_status/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn composition_request_with_too_few_inputs_is_rejected_before_admission() {
    let data_root = tempfile::tempdir().unwrap();
    let mock_exe = locate_mock_exe();
    let server = Server::new(test_config(data_root.path(), &mock_exe)).unwrap();
    let app = mediaserver::http::router(server);

    let payload = json!({
        "compositionType": "concat",
        "videos": [{ "source": "a.mp4" }],
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/compose_video")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn system_resource_and_task_summary_endpoints_respond() {
    let data_root = tempfile::tempdir().unwrap();
    let mock_exe = locate_mock_exe();
    let server = Server::new(test_config(data_root.path(), &mock_exe)).unwrap();
    let app = mediaserver::http::router(server);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/system/resources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/system/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["byFamily"]["download"]["total"], 0);
}

/// Drives a download task end to end against the mock tool: create, poll
/// status until terminal, then fetch the result.
#[tokio::test]
async fn download_task_runs_to_completion_against_mock_tool() {
    let _guard = env_lock().lock().unwrap();

    let data_root = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let fake_output = output_dir.path().join("fake_video.mp4");

    // SAFETY: serialized by `env_lock` above; no other test in this binary
    // mutates these keys concurrently.
    unsafe {
        std::env::set_var("MEDIASERVER_MOCK_STDOUT", format!("{}\n", fake_output.display()));
        std::env::set_var("MEDIASERVER_MOCK_WRITE_OUTPUT", fake_output.to_string_lossy().to_string());
    }

    let mock_exe = locate_mock_exe();
    let server = Server::new(test_config(data_root.path(), &mock_exe)).unwrap();
    server.spawn_background_threads();
    let app = mediaserver::http::router(server.clone());

    let payload = json!({
        "videoUrl": "https://example.com/video",
        "quality": "best",
        "format": "mp4",
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/download_video")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    let mut status = String::new();
    while std::time::Instant::now() < deadline {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/download_status/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        status = body["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(status, "completed");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/download_result/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["filePath"].as_str().unwrap(), fake_output.to_string_lossy());

    server.shutdown();

    unsafe {
        std::env::remove_var("MEDIASERVER_MOCK_STDOUT");
        std::env::remove_var("MEDIASERVER_MOCK_WRITE_OUTPUT");
    }
}
