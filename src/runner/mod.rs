//! The child-process runner (§4.4): spawns the codec tool, drains stdout and
//! stderr concurrently, feeds stderr through the progress parser, and
//! enforces per-invocation timeout and cancellation. Explicit OS threads per
//! stream, matching §9's rewrite of "implicit coroutines" into plain thread
//! joins, mirroring the capture-thread pattern in `process_ext.rs`.

mod progress;

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::ChildHandle;
use crate::error::TaskError;
use crate::hardware::HardwareCapabilities;
use crate::process_ext::terminate_then_kill;
use crate::registry::TaskRegistry;

use progress::ProgressTracker;

struct RunnerSlots {
    max: usize,
    current: AtomicUsize,
}

struct SlotGuard<'a> {
    slots: &'a RunnerSlots,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slots.current.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RunnerSlots {
    fn new(max: usize) -> Self {
        Self {
            max,
            current: AtomicUsize::new(0),
        }
    }

    /// Fails fast rather than queueing (§4.4's explicit non-goal), matching
    /// the source's runner-level concurrency ceiling.
    fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(SlotGuard { slots: self }),
                Err(observed) => current = observed,
            }
        }
    }
}

pub struct ChildProcessRunner {
    hardware: Arc<HardwareCapabilities>,
    slots: RunnerSlots,
}

pub struct RunOutcome {
    pub stdout: Vec<u8>,
    pub used_accelerated_encoder: Option<String>,
}

impl ChildProcessRunner {
    pub fn new(hardware: Arc<HardwareCapabilities>, max_concurrent: usize) -> Self {
        Self {
            hardware,
            slots: RunnerSlots::new(max_concurrent),
        }
    }

    /// Runs `argv[0]` with `argv[1..]`, streaming progress into the task
    /// record identified by `task_id`. Rewrites the argv through the
    /// hardware-capability layer first if it carries a `-c:v` flag.
    pub fn run(
        &self,
        registry: &TaskRegistry,
        task_id: &str,
        argv: Vec<String>,
        timeout: Duration,
        encoder_speed_tier: &str,
    ) -> Result<RunOutcome, TaskError> {
        let _slot = self
            .slots
            .try_acquire()
            .ok_or_else(|| TaskError::resource_limit("runner is at its concurrent-process limit"))?;

        let rewritten = self.hardware.rewrite_argv(&argv, encoder_speed_tier);
        let used_accelerated_encoder = if rewritten != argv {
            self.hardware.preferred_encoder.clone()
        } else {
            None
        };

        let Some((program, rest)) = rewritten.split_first() else {
            return Err(TaskError::input_validation("empty argument vector"));
        };

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| TaskError::processing(format!("failed to spawn {program}: {err}")))?;
        let pid = child.id();

        let mut stdout = child.stdout.take();
        let stdout_handle = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(stdout) = stdout.as_mut() {
                let _ = stdout.read_to_end(&mut buf);
            }
            buf
        });

        let mut stderr = child.stderr.take();
        let (stderr_tx, stderr_rx) = std::sync::mpsc::channel::<String>();
        let stderr_handle = std::thread::spawn(move || {
            let mut captured = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let mut buf = [0u8; 4096];
                let mut pending = Vec::new();
                loop {
                    let n = match stderr.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(_) => break,
                    };
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line).trim().to_string();
                        captured.push_str(&line);
                        captured.push('\n');
                        let _ = stderr_tx.send(line);
                    }
                }
            }
            captured
        });

        registry.attach_child(task_id, ChildHandle { child, pid });

        let mut tracker = ProgressTracker::new();
        let start = Instant::now();
        let mut timed_out = false;

        loop {
            while let Ok(line) = stderr_rx.try_recv() {
                if let Some(percent) = tracker.feed_line(&line) {
                    registry.with_record_mut(task_id, |record| {
                        record.set_progress(percent, format!("{percent:.0}%"));
                    });
                }
            }

            let exited = registry.with_record(task_id, |record| record.child.is_none());
            if exited == Some(true) {
                // Cancellation already took the handle out from under us.
                break;
            }

            let still_running = registry
                .with_record_mut(task_id, |record| {
                    record
                        .child
                        .as_mut()
                        .map(|handle| matches!(handle.child.try_wait(), Ok(None)))
                })
                .flatten();

            match still_running {
                Some(true) => {
                    if start.elapsed() >= timeout {
                        timed_out = true;
                        if let Some(mut handle) = registry.take_child(task_id) {
                            terminate_then_kill(&mut handle.child, Duration::from_secs(5));
                        }
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => break,
            }
        }

        let cancel_requested =
            registry.with_record(task_id, |record| record.cancel_requested) == Some(true);

        let exit_status = registry
            .take_child(task_id)
            .map(|mut handle| handle.child.wait());

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr_text = stderr_handle.join().unwrap_or_default();

        if timed_out {
            return Err(TaskError::timeout(format!(
                "process exceeded timeout of {:?}",
                timeout
            )));
        }
        if cancel_requested {
            return Err(TaskError::cancelled());
        }

        match exit_status {
            Some(Ok(status)) if status.success() => Ok(RunOutcome {
                stdout,
                used_accelerated_encoder,
            }),
            Some(Ok(status)) => Err(TaskError::ffmpeg(format!(
                "process exited with {status}: {}",
                stderr_text.trim()
            ))),
            Some(Err(err)) => Err(TaskError::processing(format!("failed to await child: {err}"))),
            None => Err(TaskError::cancelled()),
        }
    }

    /// Short introspection command (metadata probes, encoder acceptance
    /// tests) with no progress streaming and no task-record bookkeeping.
    pub fn probe(&self, argv: &[String], timeout: Duration) -> Result<Vec<u8>, TaskError> {
        let _slot = self
            .slots
            .try_acquire()
            .ok_or_else(|| TaskError::resource_limit("runner is at its concurrent-process limit"))?;

        let Some((program, rest)) = argv.split_first() else {
            return Err(TaskError::input_validation("empty argument vector"));
        };

        let mut cmd = Command::new(program);
        cmd.args(rest);

        let (status, timed_out, stderr) =
            crate::process_ext::run_command_with_timeout_capture_stderr(cmd, timeout, 8192)
                .map_err(|err| TaskError::processing(format!("failed to spawn {program}: {err}")))?;

        if timed_out {
            return Err(TaskError::timeout("probe exceeded timeout"));
        }
        if !status.success() {
            return Err(TaskError::ffmpeg(String::from_utf8_lossy(&stderr).to_string()));
        }
        Ok(stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_fail_fast_when_saturated() {
        let slots = RunnerSlots::new(1);
        let _first = slots.try_acquire().expect("first acquire succeeds");
        assert!(slots.try_acquire().is_none());
    }

    #[test]
    fn slot_is_released_on_drop() {
        let slots = RunnerSlots::new(1);
        {
            let _guard = slots.try_acquire().expect("first acquire succeeds");
        }
        assert!(slots.try_acquire().is_some());
    }
}
