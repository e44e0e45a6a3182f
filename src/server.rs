//! The composition root (§9): one `Server` value owning every shared
//! subsystem, wrapped once in an `Arc` and cloned into the axum router state
//! and each worker thread. Nothing here mutates global state outside
//! `Server::new`.

use std::sync::Arc;

use crate::cache::ArtifactCache;
use crate::config::ServerConfig;
use crate::error::ErrorClassifier;
use crate::executors::ExecutorContext;
use crate::hardware::HardwareCapabilities;
use crate::janitor::Janitor;
use crate::registry::TaskRegistry;
use crate::resources::{ResourceLimits, ResourceSampler};
use crate::runner::ChildProcessRunner;

const ERROR_RING_CAPACITY: usize = 100;

pub struct Server {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<TaskRegistry>,
    pub sampler: Arc<ResourceSampler>,
    pub cache: Arc<ArtifactCache>,
    pub hardware: Arc<HardwareCapabilities>,
    pub runner: Arc<ChildProcessRunner>,
    pub errors: Arc<ErrorClassifier>,
    pub janitor: Arc<Janitor>,
}

impl Server {
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);

        for dir in config.scratch_dirs() {
            std::fs::create_dir_all(&dir)
                .map_err(|err| anyhow::anyhow!("failed to create {}: {err}", dir.display()))?;
        }

        let registry = Arc::new(TaskRegistry::new());

        let limits = ResourceLimits {
            max_concurrent_tasks: config.max_concurrent_tasks,
            max_cpu_pct: config.max_cpu_pct,
            max_mem_pct: config.max_mem_pct,
            max_disk_pct: config.max_disk_pct,
            min_free_disk_bytes: config.min_free_disk_bytes,
        };
        let sampler = ResourceSampler::new(
            config.sampling_interval,
            config.resource_history_capacity,
            limits,
            config.data_root.clone(),
            config.scratch_dirs(),
            registry.clone() as Arc<dyn crate::registry::ActiveTaskCounts>,
        );

        let cache = Arc::new(ArtifactCache::new(
            config.cache_dir(),
            config.cache_cap_bytes,
            config.cache_max_age,
        )?);

        tracing::info!("probing codec tool for accelerated encoders");
        let hardware = Arc::new(HardwareCapabilities::probe(&config.ffmpeg_bin));

        let runner = Arc::new(ChildProcessRunner::new(hardware.clone(), config.runner_max_concurrent));
        let errors = Arc::new(ErrorClassifier::new(ERROR_RING_CAPACITY));

        let janitor = Janitor::new(
            registry.clone(),
            cache.clone(),
            config.task_timeout,
            config.janitor_interval,
            &config,
        );

        Ok(Arc::new(Self {
            config,
            registry,
            sampler,
            cache,
            hardware,
            runner,
            errors,
            janitor,
        }))
    }

    /// Starts the long-lived background threads (resource sampler, janitor).
    /// Must be called once after construction, before serving traffic.
    pub fn spawn_background_threads(&self) {
        self.sampler.spawn_background();
        self.janitor.spawn_background();
    }

    pub fn shutdown(&self) {
        self.sampler.shutdown();
        self.janitor.shutdown();
    }

    pub fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            registry: self.registry.clone(),
            runner: self.runner.clone(),
            cache: self.cache.clone(),
            hardware: self.hardware.clone(),
            config: self.config.clone(),
            errors: self.errors.clone(),
        }
    }
}
