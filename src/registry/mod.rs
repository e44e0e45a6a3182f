//! The task registry (§4.1): the single map from `TaskId` to `TaskRecord`,
//! plus the advisory per-task cancellation locks. This is the one place
//! allowed to hold a live `ChildHandle` — the runner registers/unregisters
//! against the record it belongs to instead of a second module-level map
//! (§9's resolution of the two-sources-of-truth question).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::{ChildHandle, TaskFamily, TaskId, TaskParams, TaskRecord, TaskStatusView};
use crate::error::TaskError;
use crate::sync_ext::MutexExt;

const CANCEL_LOCK_TTL: Duration = Duration::from_secs(60 * 60);

struct CancelLock {
    acquired_at: Instant,
}

struct RegistryInner {
    tasks: HashMap<TaskId, TaskRecord>,
    cancel_locks: HashMap<TaskId, CancelLock>,
}

/// Read-only view the resource sampler depends on, breaking the
/// sampler-to-registry cycle (§9). The registry implements it; the sampler
/// knows nothing else about the registry's shape.
pub trait ActiveTaskCounts: Send + Sync {
    fn active_task_count(&self) -> usize;
    fn active_task_count_by_family(&self) -> HashMap<TaskFamily, usize>;
}

pub struct TaskSummary {
    pub by_family: HashMap<TaskFamily, FamilySummary>,
    pub total: usize,
}

#[derive(Default, Clone, Copy)]
pub struct FamilySummary {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tasks: HashMap::new(),
                cancel_locks: HashMap::new(),
            }),
        }
    }

    pub fn create(&self, params: TaskParams) -> TaskId {
        let id = crate::domain::new_task_id();
        let record = TaskRecord::new(id.clone(), params);
        let mut guard = self.inner.lock_unpoisoned();
        guard.tasks.insert(id.clone(), record);
        id
    }

    pub fn status_view(&self, id: &str) -> Option<TaskStatusView> {
        let guard = self.inner.lock_unpoisoned();
        guard.tasks.get(id).map(TaskStatusView::from)
    }

    /// Runs `f` against the record under the registry lock. Used for
    /// multi-field atomic mutations (progress updates, completion, failure)
    /// so a concurrent cancel can't observe a half-applied transition.
    pub fn with_record_mut<R>(&self, id: &str, f: impl FnOnce(&mut TaskRecord) -> R) -> Option<R> {
        let mut guard = self.inner.lock_unpoisoned();
        guard.tasks.get_mut(id).map(f)
    }

    pub fn with_record<R>(&self, id: &str, f: impl FnOnce(&TaskRecord) -> R) -> Option<R> {
        let guard = self.inner.lock_unpoisoned();
        guard.tasks.get(id).map(f)
    }

    /// Installs a child handle on a record, displacing the sentinel used for
    /// tasks whose work never spawns a subprocess.
    pub fn attach_child(&self, id: &str, child: ChildHandle) {
        let mut guard = self.inner.lock_unpoisoned();
        if let Some(record) = guard.tasks.get_mut(id) {
            record.child = Some(child);
        }
    }

    pub fn take_child(&self, id: &str) -> Option<ChildHandle> {
        let mut guard = self.inner.lock_unpoisoned();
        guard.tasks.get_mut(id).and_then(|record| record.child.take())
    }

    /// Attempts to cancel a task. Acquires the advisory per-task lock,
    /// verifies the task is non-terminal, marks it cancelled, and returns the
    /// child handle (if any) so the caller can terminate it outside the
    /// registry lock. Returns `None` if the task doesn't exist or is already
    /// terminal or already locked by a concurrent cancel.
    pub fn cancel(&self, id: &str) -> Option<Option<ChildHandle>> {
        let mut guard = self.inner.lock_unpoisoned();

        if let Some(lock) = guard.cancel_locks.get(id) {
            if lock.acquired_at.elapsed() < CANCEL_LOCK_TTL {
                return None;
            }
        }

        let terminal_already = match guard.tasks.get(id) {
            None => return None,
            Some(record) => record.status.is_terminal(),
        };
        if terminal_already {
            return None;
        }

        guard.cancel_locks.insert(
            id.to_string(),
            CancelLock {
                acquired_at: Instant::now(),
            },
        );

        let record = guard.tasks.get_mut(id)?;
        record.cancel_requested = true;
        record.fail(TaskError::cancelled());
        let child = record.child.take();

        guard.cancel_locks.remove(id);

        Some(child)
    }

    /// Evicts cancel locks older than their TTL. Called by the janitor;
    /// ordinary `cancel()` calls already clean up after themselves, so this
    /// only matters if a prior cancel panicked mid-lock (poison-recovered).
    pub fn evict_stale_cancel_locks(&self) -> usize {
        let mut guard = self.inner.lock_unpoisoned();
        let before = guard.cancel_locks.len();
        guard
            .cancel_locks
            .retain(|_, lock| lock.acquired_at.elapsed() < CANCEL_LOCK_TTL);
        before - guard.cancel_locks.len()
    }

    pub fn summary(&self) -> TaskSummary {
        let guard = self.inner.lock_unpoisoned();
        let mut by_family: HashMap<TaskFamily, FamilySummary> = HashMap::new();
        for family in TaskFamily::ALL {
            by_family.insert(family, FamilySummary::default());
        }
        for record in guard.tasks.values() {
            let entry = by_family.entry(record.family).or_default();
            entry.total += 1;
            match record.status {
                crate::domain::TaskStatus::Pending | crate::domain::TaskStatus::Running => {
                    entry.running += 1
                }
                crate::domain::TaskStatus::Completed => entry.completed += 1,
                crate::domain::TaskStatus::Failed => entry.failed += 1,
                crate::domain::TaskStatus::Cancelled => entry.cancelled += 1,
            }
        }
        let total = guard.tasks.len();
        TaskSummary { by_family, total }
    }

    /// Janitor sweep helpers: tasks past the age-since-start timeout that
    /// are still non-terminal, and terminal tasks old enough to purge.
    pub fn expired_running_tasks(&self, timeout: Duration) -> Vec<TaskId> {
        let guard = self.inner.lock_unpoisoned();
        guard
            .tasks
            .values()
            .filter(|record| !record.status.is_terminal() && record.age() > timeout)
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn purgeable_terminal_tasks(&self, purge_after: Duration) -> Vec<TaskId> {
        let guard = self.inner.lock_unpoisoned();
        guard
            .tasks
            .values()
            .filter(|record| record.status.is_terminal() && record.age() > purge_after)
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<TaskRecord> {
        let mut guard = self.inner.lock_unpoisoned();
        guard.tasks.remove(id)
    }

    pub fn live_child_task_ids(&self) -> Vec<TaskId> {
        let guard = self.inner.lock_unpoisoned();
        guard
            .tasks
            .values()
            .filter(|record| record.child.is_some())
            .map(|record| record.id.clone())
            .collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveTaskCounts for TaskRegistry {
    fn active_task_count(&self) -> usize {
        let guard = self.inner.lock_unpoisoned();
        guard
            .tasks
            .values()
            .filter(|record| !record.status.is_terminal())
            .count()
    }

    fn active_task_count_by_family(&self) -> HashMap<TaskFamily, usize> {
        let guard = self.inner.lock_unpoisoned();
        let mut counts = HashMap::new();
        for record in guard.tasks.values() {
            if !record.status.is_terminal() {
                *counts.entry(record.family).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DownloadFormat, DownloadQuality, DownloadRequest};

    fn download_params(url: &str) -> TaskParams {
        TaskParams::Download(DownloadRequest {
            video_url: url.to_string(),
            quality: DownloadQuality::Best,
            format: DownloadFormat::Mp4,
        })
    }

    #[test]
    fn create_then_get_round_trips() {
        let registry = TaskRegistry::new();
        let id = registry.create(download_params("https://example.com/a.mp4"));
        let view = registry.status_view(&id).expect("task must exist");
        assert_eq!(view.task_id, id);
        assert_eq!(view.status, crate::domain::TaskStatus::Running);
    }

    #[test]
    fn cancel_is_a_no_op_on_unknown_or_terminal_task() {
        let registry = TaskRegistry::new();
        assert!(registry.cancel("does-not-exist").is_none());

        let id = registry.create(download_params("https://example.com/a.mp4"));
        registry.with_record_mut(&id, |record| {
            record.complete(crate::domain::TaskResult::Download(
                crate::domain::DownloadResult {
                    file_path: "a.mp4".into(),
                    actual_format: "mp4".into(),
                    actual_resolution: "1920x1080".into(),
                    file_size_bytes: 10,
                    available_format_count: 1,
                },
            ))
        });
        assert!(registry.cancel(&id).is_none());
    }

    #[test]
    fn cancel_marks_failed_with_cancelled_kind() {
        let registry = TaskRegistry::new();
        let id = registry.create(download_params("https://example.com/a.mp4"));
        let child = registry.cancel(&id).expect("cancel should succeed");
        assert!(child.is_none());
        let view = registry.status_view(&id).unwrap();
        assert_eq!(view.status, crate::domain::TaskStatus::Cancelled);
    }

    #[test]
    fn summary_counts_by_family() {
        let registry = TaskRegistry::new();
        registry.create(download_params("https://example.com/a.mp4"));
        registry.create(download_params("https://example.com/b.mp4"));
        let summary = registry.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_family[&TaskFamily::Download].running, 2);
    }
}
