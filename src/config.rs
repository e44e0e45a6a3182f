//! Environment-driven server configuration (§6's "process/runtime
//! environment variables"), following the engine's `env_u64`/`env_usize`
//! pattern in `system_metrics.rs`: every knob is optional, typed, and falls
//! back to a documented default rather than failing startup.

use std::path::PathBuf;
use std::time::Duration;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

/// Clamps a parsed env value into `[min, max]`, logging when a caller's
/// value was out of range instead of silently misbehaving later.
fn clamp_with_warning(name: &str, value: f64, min: f64, max: f64) -> f64 {
    if value < min || value > max {
        tracing::warn!(
            name,
            value,
            min,
            max,
            "environment value out of range, clamping"
        );
        value.clamp(min, max)
    } else {
        value
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub data_root: PathBuf,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub ytdlp_bin: String,
    pub stt_bin: String,
    pub stt_model: String,

    pub max_concurrent_tasks: usize,
    pub max_cpu_pct: f64,
    pub max_mem_pct: f64,
    pub max_disk_pct: f64,
    pub min_free_disk_bytes: u64,

    pub sampling_interval: Duration,
    pub resource_history_capacity: usize,

    pub janitor_interval: Duration,
    pub task_timeout: Duration,

    pub runner_max_concurrent: usize,

    pub cache_cap_bytes: u64,
    pub cache_max_age: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let data_root = PathBuf::from(env_string("MEDIASERVER_DATA_ROOT", "./data"));

        let max_concurrent_tasks =
            env_usize("MEDIASERVER_MAX_CONCURRENT_TASKS", 10).clamp(1, 10);
        let max_cpu_pct = clamp_with_warning(
            "MEDIASERVER_MAX_CPU_PCT",
            env_f64("MEDIASERVER_MAX_CPU_PCT", 90.0),
            50.0,
            95.0,
        );
        let max_mem_pct = clamp_with_warning(
            "MEDIASERVER_MAX_MEM_PCT",
            env_f64("MEDIASERVER_MAX_MEM_PCT", 90.0),
            50.0,
            95.0,
        );
        let max_disk_pct = clamp_with_warning(
            "MEDIASERVER_MAX_DISK_PCT",
            env_f64("MEDIASERVER_MAX_DISK_PCT", 90.0),
            50.0,
            95.0,
        );
        let min_free_disk_gb = clamp_with_warning(
            "MEDIASERVER_MIN_FREE_DISK_GB",
            env_f64("MEDIASERVER_MIN_FREE_DISK_GB", 5.0),
            1.0,
            100.0,
        );

        Self {
            bind_addr: env_string("MEDIASERVER_BIND_ADDR", "0.0.0.0:8080"),
            data_root,
            ffmpeg_bin: env_string("MEDIASERVER_FFMPEG_BIN", "ffmpeg"),
            ffprobe_bin: env_string("MEDIASERVER_FFPROBE_BIN", "ffprobe"),
            ytdlp_bin: env_string("MEDIASERVER_YTDLP_BIN", "yt-dlp"),
            stt_bin: env_string("MEDIASERVER_STT_BIN", "whisper-cli"),
            stt_model: env_string("MEDIASERVER_STT_MODEL", "base"),

            max_concurrent_tasks,
            max_cpu_pct,
            max_mem_pct,
            max_disk_pct,
            min_free_disk_bytes: (min_free_disk_gb * 1024.0 * 1024.0 * 1024.0) as u64,

            sampling_interval: Duration::from_millis(env_u64(
                "MEDIASERVER_SAMPLING_INTERVAL_MS",
                5_000,
            )),
            resource_history_capacity: env_usize("MEDIASERVER_RESOURCE_HISTORY_CAPACITY", 60),

            janitor_interval: Duration::from_secs(env_u64(
                "MEDIASERVER_JANITOR_INTERVAL_SECS",
                300,
            )),
            task_timeout: Duration::from_secs(env_u64("MEDIASERVER_TASK_TIMEOUT_SECS", 3600)),

            runner_max_concurrent: env_usize("MEDIASERVER_RUNNER_MAX_CONCURRENT", 2),

            cache_cap_bytes: env_u64("MEDIASERVER_CACHE_CAP_BYTES", 5 * 1024 * 1024 * 1024),
            cache_max_age: Duration::from_secs(
                env_u64("MEDIASERVER_CACHE_MAX_AGE_DAYS", 7) * 24 * 60 * 60,
            ),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_root.join("output")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_root.join("downloads")
    }

    pub fn keyframes_dir(&self) -> PathBuf {
        self.data_root.join("keyframes")
    }

    pub fn compositions_dir(&self) -> PathBuf {
        self.data_root.join("compositions")
    }

    pub fn temp_composition_dir(&self) -> PathBuf {
        self.data_root.join("temp_composition")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_root.join("cache")
    }

    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.output_dir(),
            self.downloads_dir(),
            self.keyframes_dir(),
            self.compositions_dir(),
            self.temp_composition_dir(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values_when_env_absent() {
        // SAFETY: test-local env mutation, no other test in this process reads
        // these particular keys concurrently.
        for key in [
            "MEDIASERVER_BIND_ADDR",
            "MEDIASERVER_MAX_CONCURRENT_TASKS",
            "MEDIASERVER_MAX_CPU_PCT",
        ] {
            unsafe { std::env::remove_var(key) };
        }
        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.max_cpu_pct, 90.0);
    }

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        unsafe { std::env::set_var("MEDIASERVER_MAX_CPU_PCT", "99") };
        let config = ServerConfig::from_env();
        assert_eq!(config.max_cpu_pct, 95.0);
        unsafe { std::env::remove_var("MEDIASERVER_MAX_CPU_PCT") };
    }
}
