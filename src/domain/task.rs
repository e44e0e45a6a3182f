use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Child;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

use super::composition::{CompositionRequest, CompositionResult};
use super::download::{DownloadRequest, DownloadResult};
use super::keyframe::{KeyframeRequest, KeyframeResult};
use super::transcription::{TranscriptionRequest, TranscriptionResult};

/// Opaque task identifier, unique across all four families for the process
/// lifetime. A UUID v4 string, matching the engine's string job ids.
pub type TaskId = String;

pub fn new_task_id() -> TaskId {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskFamily {
    Transcription,
    Download,
    KeyframeExtraction,
    Composition,
}

impl TaskFamily {
    pub const ALL: [TaskFamily; 4] = [
        TaskFamily::Transcription,
        TaskFamily::Download,
        TaskFamily::KeyframeExtraction,
        TaskFamily::Composition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskFamily::Transcription => "transcription",
            TaskFamily::Download => "download",
            TaskFamily::KeyframeExtraction => "keyframe_extraction",
            TaskFamily::Composition => "composition",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TaskParams {
    Transcription(TranscriptionRequest),
    Download(DownloadRequest),
    KeyframeExtraction(KeyframeRequest),
    Composition(CompositionRequest),
}

impl TaskParams {
    pub fn family(&self) -> TaskFamily {
        match self {
            TaskParams::Transcription(_) => TaskFamily::Transcription,
            TaskParams::Download(_) => TaskFamily::Download,
            TaskParams::KeyframeExtraction(_) => TaskFamily::KeyframeExtraction,
            TaskParams::Composition(_) => TaskFamily::Composition,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TaskResult {
    Transcription(TranscriptionResult),
    Download(DownloadResult),
    KeyframeExtraction(KeyframeResult),
    Composition(CompositionResult),
}

/// A live child process handle owned by a task. Not `Clone`; the registry
/// stores at most one per task record and the runner takes it out to signal
/// termination (§9: the registry is the single source of truth for child
/// handles, not a second module-level map).
pub struct ChildHandle {
    pub child: Child,
    pub pid: u32,
}

/// The polymorphic per-task record (§3). `params`/`result` carry the
/// family-specific payload; most fields are family-agnostic bookkeeping.
pub struct TaskRecord {
    pub id: TaskId,
    pub family: TaskFamily,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub created_at: SystemTime,
    pub created_at_monotonic: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub current_stage: Option<String>,
    pub params: TaskParams,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    pub temp_paths: BTreeSet<PathBuf>,
    pub child: Option<ChildHandle>,
    /// Set once `cancel()` has requested termination, so the runner can
    /// distinguish an operator cancellation from a timeout when it observes
    /// the child exit.
    pub cancel_requested: bool,
}

impl TaskRecord {
    pub fn new(id: TaskId, params: TaskParams) -> Self {
        let family = params.family();
        Self {
            id,
            family,
            status: TaskStatus::Running,
            progress: 0.0,
            message: "queued".to_string(),
            created_at: SystemTime::now(),
            created_at_monotonic: Instant::now(),
            started_at: Some(Instant::now()),
            finished_at: None,
            current_stage: None,
            params,
            result: None,
            error: None,
            temp_paths: BTreeSet::new(),
            child: None,
            cancel_requested: false,
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at_monotonic.elapsed()
    }

    /// Applies a bounded, monotonic progress update. Clamped to 95 while
    /// running to reserve headroom for post-processing (§3 invariant 2); the
    /// caller is responsible for explicitly setting 100 on completion.
    pub fn set_progress(&mut self, raw_percent: f64, message: impl Into<String>) {
        if self.status != TaskStatus::Running {
            return;
        }
        let clamped = raw_percent.clamp(0.0, 95.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.message = message.into();
    }

    pub fn complete(&mut self, result: TaskResult) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        self.result = Some(result);
        self.message = "completed".to_string();
        self.finished_at = Some(Instant::now());
        self.temp_paths.clear();
    }

    pub fn fail(&mut self, error: TaskError) {
        if self.status.is_terminal() {
            return;
        }
        self.message = error.message.clone();
        self.status = if error.kind == crate::error::ErrorKind::Cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        self.error = Some(error);
        self.finished_at = Some(Instant::now());
        self.temp_paths.clear();
    }

    pub fn elapsed_since_start(&self) -> Option<std::time::Duration> {
        self.started_at.map(|s| s.elapsed())
    }
}

fn wall_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a status/result endpoint hands back to a caller: a read-only,
/// serializable projection of a `TaskRecord`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub family: TaskFamily,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub current_stage: Option<String>,
    pub created_at_ms: u64,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        TaskStatusView {
            task_id: record.id.clone(),
            family: record.family,
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
            current_stage: record.current_stage.clone(),
            created_at_ms: wall_ms(record.created_at),
            elapsed_seconds: record
                .elapsed_since_start()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            error: record.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DownloadRequest;

    fn sample_record() -> TaskRecord {
        TaskRecord::new(
            new_task_id(),
            TaskParams::Download(DownloadRequest {
                video_url: "https://example.com/v.mp4".to_string(),
                quality: Default::default(),
                format: Default::default(),
            }),
        )
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut record = sample_record();
        record.set_progress(40.0, "40%");
        record.set_progress(10.0, "should not regress");
        assert_eq!(record.progress, 40.0);
        record.set_progress(99.0, "near done");
        assert_eq!(record.progress, 95.0, "clamped below 100 until complete()");
    }

    #[test]
    fn complete_and_fail_are_mutually_exclusive_and_terminal_once() {
        let mut record = sample_record();
        record.fail(TaskError::processing("boom"));
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.is_some());
        assert!(record.result.is_none());

        // A second terminal transition must be a no-op.
        record.complete(TaskResult::Download(DownloadResult {
            file_path: "x".into(),
            actual_format: "mp4".into(),
            actual_resolution: "1920x1080".into(),
            file_size_bytes: 0,
            available_format_count: 0,
        }));
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.result.is_none());
    }

    #[test]
    fn cancelled_status_maps_from_cancelled_error_kind() {
        let mut record = sample_record();
        record.fail(TaskError::cancelled());
        assert_eq!(record.status, TaskStatus::Cancelled);
    }
}
