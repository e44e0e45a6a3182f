//! Task executors (§4.6): four small pipelines, each running on its own
//! background OS thread (the worker pool, one thread per accepted task,
//! bounded in aggregate by the admission controller), orchestrating the
//! registry + runner + planner + cache + hardware layers.

mod composition;
mod download;
mod keyframe;
mod transcription;

use std::sync::Arc;

use crate::cache::ArtifactCache;
use crate::config::ServerConfig;
use crate::domain::{TaskId, TaskParams};
use crate::error::{ErrorClassifier, TaskError};
use crate::hardware::HardwareCapabilities;
use crate::registry::TaskRegistry;
use crate::runner::ChildProcessRunner;

/// Everything an executor needs, bundled so `spawn` only has one argument to
/// thread through. Cloned cheaply (every field is an `Arc`).
#[derive(Clone)]
pub struct ExecutorContext {
    pub registry: Arc<TaskRegistry>,
    pub runner: Arc<ChildProcessRunner>,
    pub cache: Arc<ArtifactCache>,
    pub hardware: Arc<HardwareCapabilities>,
    pub config: Arc<ServerConfig>,
    pub errors: Arc<ErrorClassifier>,
}

/// Spawns the worker thread for `task_id`, dispatching on its family. The
/// task record must already exist in `running` state (the HTTP handler
/// creates it synchronously via `registry.create` before calling this).
pub fn spawn(ctx: ExecutorContext, task_id: TaskId) {
    std::thread::spawn(move || {
        let params = ctx.registry.with_record(&task_id, |record| record.params.clone());
        let Some(params) = params else {
            tracing::warn!(task_id, "executor started for a task that vanished before it ran");
            return;
        };

        let result = match params {
            TaskParams::Transcription(request) => {
                transcription::run(&ctx, &task_id, request).map(crate::domain::TaskResult::Transcription)
            }
            TaskParams::Download(request) => {
                download::run(&ctx, &task_id, request).map(crate::domain::TaskResult::Download)
            }
            TaskParams::KeyframeExtraction(request) => {
                keyframe::run(&ctx, &task_id, request).map(crate::domain::TaskResult::KeyframeExtraction)
            }
            TaskParams::Composition(request) => {
                composition::run(&ctx, &task_id, request).map(crate::domain::TaskResult::Composition)
            }
        };

        match result {
            Ok(task_result) => {
                ctx.registry.with_record_mut(&task_id, |record| record.complete(task_result));
                tracing::info!(task_id, "task completed");
            }
            Err(error) => record_failure(&ctx, &task_id, error),
        }
    });
}

fn record_failure(ctx: &ExecutorContext, task_id: &str, error: TaskError) {
    ctx.errors.record(&error, Some(task_id), Default::default());
    let temp_paths = ctx
        .registry
        .with_record_mut(task_id, |record| {
            record.fail(error.clone());
            std::mem::take(&mut record.temp_paths)
        })
        .unwrap_or_default();
    for path in temp_paths {
        if path.is_dir() {
            let _ = std::fs::remove_dir_all(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
    tracing::warn!(task_id, kind = ?error.kind, message = %error.message, "task failed");
}

/// Resolves a `source` string that may be a local path or a remote URL into
/// a local path, downloading it into `scratch_dir` via the configured
/// downloader tool when it looks like a URL. Used by the composition and
/// keyframe executors for non-local inputs (§4.6).
///
/// Bypasses `ChildProcessRunner`/`probe` here because both only ever capture
/// stderr (built for the codec tool's stderr progress idiom); the
/// downloader's `--print after_move:filepath` line we need comes out on
/// stdout.
fn resolve_local_input(
    ctx: &ExecutorContext,
    task_id: &str,
    source: &str,
    scratch_dir: &std::path::Path,
) -> Result<std::path::PathBuf, TaskError> {
    if !source.starts_with("http://") && !source.starts_with("https://") {
        return Ok(std::path::PathBuf::from(source));
    }

    std::fs::create_dir_all(scratch_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create scratch dir: {err}")))?;
    let output_template = scratch_dir.join("%(id)s.%(ext)s");

    let argv = vec![
        ctx.config.ytdlp_bin.clone(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        output_template.to_string_lossy().to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        source.to_string(),
    ];
    let stdout = run_capture_stdout(&argv, std::time::Duration::from_secs(600))?;
    let path_str = String::from_utf8_lossy(&stdout).trim().to_string();
    if path_str.is_empty() {
        return Err(TaskError::network(format!("downloader produced no output for {source}")));
    }
    let path = std::path::PathBuf::from(path_str);
    ctx.registry.with_record_mut(task_id, |record| {
        record.temp_paths.insert(path.clone());
    });
    Ok(path)
}

/// Runs `argv` to completion with a hard timeout, capturing stdout. Used for
/// short introspection fetches whose meaningful output is printed to stdout,
/// unlike the codec-tool probes in `process_ext`/`runner`.
fn run_capture_stdout(argv: &[String], timeout: std::time::Duration) -> Result<Vec<u8>, TaskError> {
    use std::io::Read;
    use std::process::Stdio;
    use std::time::Instant;

    let Some((program, rest)) = argv.split_first() else {
        return Err(TaskError::input_validation("empty argument vector"));
    };

    let mut child = std::process::Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| TaskError::processing(format!("failed to spawn {program}: {err}")))?;

    let mut stdout = child.stdout.take();
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(stdout) = stdout.as_mut() {
            let _ = stdout.read_to_end(&mut buf);
        }
        buf
    });
    let mut stderr = child.stderr.take();
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_end(&mut buf);
        }
        buf
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(err) => break Err(err),
        }
        if start.elapsed() >= timeout {
            crate::process_ext::terminate_then_kill(&mut child, std::time::Duration::from_millis(500));
            break child.wait();
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    .map_err(|err| TaskError::processing(format!("failed to await {program}: {err}")))?;

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    if !status.success() {
        return Err(TaskError::network(format!(
            "{program} exited with {status}: {}",
            String::from_utf8_lossy(&stderr_bytes).trim()
        )));
    }
    Ok(stdout_bytes)
}
