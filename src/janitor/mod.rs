//! The janitor (§4.7): a periodic background sweep that expires stuck tasks,
//! reaps zombie child processes, evicts stale cancel locks, purges old
//! terminal-task records and cache entries, and ages out scratch-directory
//! contents by family-specific retention windows. Same poll-thread shape as
//! the resource sampler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ArtifactCache;
use crate::error::TaskError;
use crate::process_ext::terminate_then_kill;
use crate::registry::TaskRegistry;

const TICK_WARN_THRESHOLD: Duration = Duration::from_secs(10);
const TICK_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

const TEMP_COMPOSITION_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const COMPOSITION_OUTPUT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const TRANSCRIPTION_OUTPUT_MAX_AGE: Duration = Duration::from_secs(3 * 24 * 60 * 60);
const DOWNLOAD_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const KEYFRAME_MAX_AGE: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// A scratch directory plus the retention window its contents should be
/// swept against.
pub struct AgedDir {
    pub path: PathBuf,
    pub max_age: Duration,
}

pub struct Janitor {
    registry: Arc<TaskRegistry>,
    cache: Arc<ArtifactCache>,
    task_timeout: Duration,
    tick_interval: Duration,
    aged_dirs: Vec<AgedDir>,
    shutdown: AtomicBool,
}

impl Janitor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        cache: Arc<ArtifactCache>,
        task_timeout: Duration,
        tick_interval: Duration,
        config: &crate::config::ServerConfig,
    ) -> Arc<Self> {
        let aged_dirs = vec![
            AgedDir { path: config.temp_composition_dir(), max_age: TEMP_COMPOSITION_MAX_AGE },
            AgedDir { path: config.compositions_dir(), max_age: COMPOSITION_OUTPUT_MAX_AGE },
            AgedDir { path: config.output_dir(), max_age: TRANSCRIPTION_OUTPUT_MAX_AGE },
            AgedDir { path: config.downloads_dir(), max_age: DOWNLOAD_MAX_AGE },
            AgedDir { path: config.keyframes_dir(), max_age: KEYFRAME_MAX_AGE },
        ];
        Arc::new(Self {
            registry,
            cache,
            task_timeout,
            tick_interval,
            aged_dirs,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn spawn_background(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let janitor = Arc::clone(self);
        std::thread::spawn(move || janitor.run_loop())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn run_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let start = Instant::now();
            match self.tick() {
                Ok(summary) => {
                    let elapsed = start.elapsed();
                    if elapsed > TICK_WARN_THRESHOLD {
                        tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, ?summary, "janitor tick ran long");
                    } else {
                        tracing::debug!(?summary, "janitor tick complete");
                    }
                    std::thread::sleep(self.tick_interval);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "janitor tick failed, backing off");
                    std::thread::sleep(TICK_FAILURE_BACKOFF);
                }
            }
        }
    }

    fn tick(&self) -> anyhow::Result<TickSummary> {
        let expired = self.expire_timed_out_tasks();
        let purged = self.purge_old_terminal_tasks();
        let reaped = self.reap_zombie_children();
        let stale_locks = self.registry.evict_stale_cancel_locks();
        let cache_evicted = self.cache.evict_expired();
        let swept = self.sweep_scratch_dirs();

        Ok(TickSummary {
            expired,
            purged,
            reaped,
            stale_locks,
            cache_evicted,
            swept,
        })
    }

    /// Marks tasks that have run past `task_timeout` as failed and terminates
    /// their child process, if any (§3 invariant: every task eventually
    /// reaches a terminal state).
    fn expire_timed_out_tasks(&self) -> usize {
        let expired = self.registry.expired_running_tasks(self.task_timeout);
        for task_id in &expired {
            if let Some(mut handle) = self.registry.take_child(task_id) {
                terminate_then_kill(&mut handle.child, Duration::from_secs(5));
            }
            self.registry.with_record_mut(task_id, |record| {
                record.fail(TaskError::timeout("task exceeded its maximum run time"));
            });
            tracing::warn!(task_id, "janitor expired a long-running task");
        }
        expired.len()
    }

    fn purge_old_terminal_tasks(&self) -> usize {
        let purgeable = self.registry.purgeable_terminal_tasks(self.task_timeout * 2);
        for task_id in &purgeable {
            self.registry.remove(task_id);
        }
        purgeable.len()
    }

    /// A child can outlive its task record's visible lifetime if the runner
    /// thread panicked before detaching it; this is a backstop, not the
    /// primary termination path (the runner and `registry.cancel` own that).
    fn reap_zombie_children(&self) -> usize {
        let mut reaped = 0;
        for task_id in self.registry.live_child_task_ids() {
            let still_running = self.registry.with_record_mut(&task_id, |record| {
                record
                    .child
                    .as_mut()
                    .map(|handle| matches!(handle.child.try_wait(), Ok(None)))
            });
            if still_running.flatten() == Some(false) {
                self.registry.take_child(&task_id);
                reaped += 1;
            }
        }
        reaped
    }

    fn sweep_scratch_dirs(&self) -> usize {
        let mut swept = 0;
        for aged_dir in &self.aged_dirs {
            swept += sweep_dir_older_than(&aged_dir.path, aged_dir.max_age);
        }
        swept
    }
}

fn sweep_dir_older_than(dir: &std::path::Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut swept = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let age = std::time::SystemTime::now().duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        let path = entry.path();
        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => swept += 1,
            Err(err) => tracing::debug!(path = %path.display(), error = %err, "janitor sweep failed to remove entry"),
        }
    }
    swept
}

#[derive(Debug)]
struct TickSummary {
    expired: usize,
    purged: usize,
    reaped: usize,
    stale_locks: usize,
    cache_evicted: usize,
    swept: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DownloadFormat, DownloadQuality, DownloadRequest, TaskParams};

    fn test_config(root: &std::path::Path) -> crate::config::ServerConfig {
        let mut config = crate::config::ServerConfig::from_env();
        config.data_root = root.to_path_buf();
        config
    }

    #[test]
    fn expire_timed_out_tasks_fails_tasks_past_timeout() {
        let registry = Arc::new(TaskRegistry::new());
        let id = registry.create(TaskParams::Download(DownloadRequest {
            video_url: "https://example.com/v.mp4".to_string(),
            quality: DownloadQuality::Best,
            format: DownloadFormat::Mp4,
        }));
        // Force the task to look old by racing past a near-zero timeout.
        std::thread::sleep(Duration::from_millis(5));

        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(dir.path().join("cache"), 1024, Duration::from_secs(3600)).unwrap());
        let janitor = Janitor::new(
            Arc::clone(&registry),
            cache,
            Duration::from_millis(1),
            Duration::from_secs(60),
            &test_config(dir.path()),
        );

        let expired = janitor.expire_timed_out_tasks();
        assert_eq!(expired, 1);
        let view = registry.status_view(&id).unwrap();
        assert_eq!(view.status, crate::domain::TaskStatus::Failed);
    }
}
