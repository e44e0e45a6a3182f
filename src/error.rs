//! The closed error taxonomy (§4.8). Every fallible operation that crosses a
//! task or HTTP boundary is classified into one of these kinds; nothing else
//! escapes as a raw `anyhow::Error`.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::sync_ext::MutexExt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InputValidation,
    ResourceLimit,
    Processing,
    FfmpegError,
    Timeout,
    FileSystem,
    Network,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind is expected to succeed on retry.
    /// `FileSystem` is intentionally excluded here — its recoverability
    /// depends on the message (disk-full vs. permission-denied), so callers
    /// should use `TaskError::recoverable()` instead of this blanket table.
    pub fn recoverable_by_default(self) -> bool {
        matches!(self, ErrorKind::ResourceLimit | ErrorKind::Network)
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let recoverable = match kind {
            ErrorKind::FileSystem => is_recoverable_filesystem_message(&message),
            other => other.recoverable_by_default(),
        };
        Self {
            kind,
            message,
            recoverable,
        }
    }

    pub fn input_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputValidation, message)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceLimit, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    pub fn ffmpeg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FfmpegError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "task was cancelled")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileSystem, message)
    }
}

/// Messages that typically indicate a transient filesystem condition rather
/// than a structural one (missing path, permission denied).
fn is_recoverable_filesystem_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("no space left")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("too many open files")
}

/// Converts an opaque `anyhow::Error` into the closed taxonomy. This is the
/// single place where "unknown" errors get a best-effort classification from
/// their message text — new call sites should prefer constructing a
/// `TaskError` directly instead of relying on this fallback.
pub fn classify(err: &anyhow::Error) -> TaskError {
    let message = format!("{err:#}");
    let lower = message.to_ascii_lowercase();
    let kind = if lower.contains("timed out") || lower.contains("timeout") {
        ErrorKind::Timeout
    } else if lower.contains("permission denied")
        || lower.contains("no such file")
        || lower.contains("i/o error")
        || lower.contains("io error")
    {
        ErrorKind::FileSystem
    } else if lower.contains("network") || lower.contains("dns") || lower.contains("connect") {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    };
    TaskError::new(kind, message)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp_ms: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub task_id: Option<String>,
    pub context: std::collections::BTreeMap<String, String>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded ring of recent errors plus per-kind counters, shared across the
/// whole server. Mirrors the engine's bounded-history collections: a
/// `VecDeque` capped at a fixed length, pruned from the front on overflow.
pub struct ErrorClassifier {
    inner: Mutex<ErrorClassifierInner>,
    capacity: usize,
}

struct ErrorClassifierInner {
    ring: VecDeque<ErrorRecord>,
    counts: std::collections::HashMap<ErrorKind, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: u64,
    pub counts: std::collections::BTreeMap<String, u64>,
}

impl ErrorClassifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ErrorClassifierInner {
                ring: VecDeque::with_capacity(capacity),
                counts: std::collections::HashMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Records a handled error. Returns the record for the caller to log.
    pub fn record(
        &self,
        error: &TaskError,
        task_id: Option<&str>,
        context: std::collections::BTreeMap<String, String>,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            timestamp_ms: now_ms(),
            kind: error.kind,
            message: error.message.clone(),
            task_id: task_id.map(str::to_string),
            context,
        };
        let mut guard = self.inner.lock_unpoisoned();
        if guard.ring.len() >= self.capacity {
            guard.ring.pop_front();
        }
        guard.ring.push_back(record.clone());
        *guard.counts.entry(error.kind).or_insert(0) += 1;
        record
    }

    pub fn stats(&self) -> ErrorStats {
        let guard = self.inner.lock_unpoisoned();
        let mut counts = std::collections::BTreeMap::new();
        let mut total = 0u64;
        for (kind, count) in guard.counts.iter() {
            total += count;
            counts.insert(format!("{kind:?}"), *count);
        }
        ErrorStats { total, counts }
    }

    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let guard = self.inner.lock_unpoisoned();
        guard.ring.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let classifier = ErrorClassifier::new(3);
        for i in 0..10 {
            let err = TaskError::processing(format!("failure {i}"));
            classifier.record(&err, None, Default::default());
        }
        let recent = classifier.recent(100);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "failure 9");
    }

    #[test]
    fn classify_detects_timeout() {
        let err = anyhow::anyhow!("ffmpeg probe timed out after 5s");
        let classified = classify(&err);
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert!(!classified.recoverable);
    }

    #[test]
    fn resource_limit_is_recoverable() {
        let err = TaskError::resource_limit("too many concurrent tasks");
        assert!(err.recoverable);
    }
}
