//! Small helpers around `std::process::Child` that the rest of the crate
//! builds on: bounded stderr capture with a timeout, and a graceful
//! terminate-then-kill sequence used by the runner and the janitor.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Sends SIGTERM (Unix) and gives the child `grace` to exit on its own
/// before escalating to SIGKILL. On Windows there is no graceful signal
/// equivalent available through `std::process`, so we kill immediately.
pub(crate) fn terminate_then_kill(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `cmd` to completion with a hard timeout, capturing up to
/// `stderr_capture_limit` bytes of stderr. Stdout is discarded. Used for
/// short introspection probes (hardware-encoder detection, metadata probes)
/// where progress streaming is unnecessary.
pub(crate) fn run_command_with_timeout_capture_stderr(
    mut cmd: Command,
    timeout: Duration,
    stderr_capture_limit: usize,
) -> Result<(ExitStatus, bool, Vec<u8>), std::io::Error> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let mut stderr = child.stderr.take();
    let stderr_handle = std::thread::spawn(move || {
        let Some(mut stderr) = stderr.take() else {
            return Vec::<u8>::new();
        };

        let mut captured: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match stderr.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            if captured.len() < stderr_capture_limit {
                let remaining = stderr_capture_limit - captured.len();
                let to_copy = remaining.min(n);
                captured.extend_from_slice(&buf[..to_copy]);
            }
        }
        captured
    });

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            terminate_then_kill(&mut child, Duration::from_millis(200));
            break child.wait()?;
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stderr_bytes = stderr_handle.join().unwrap_or_default();
    Ok((status, timed_out, stderr_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_stderr_reports_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result =
            run_command_with_timeout_capture_stderr(cmd, Duration::from_millis(50), 1024);
        let Ok((_, timed_out, _)) = result else {
            // `sleep` may not exist on this platform's test runner; skip.
            return;
        };
        assert!(timed_out);
    }

    #[test]
    fn capture_stderr_collects_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello 1>&2");
        let Ok((status, timed_out, bytes)) =
            run_command_with_timeout_capture_stderr(cmd, Duration::from_secs(5), 1024)
        else {
            return;
        };
        assert!(status.success());
        assert!(!timed_out);
        assert_eq!(String::from_utf8_lossy(&bytes).trim(), "hello");
    }
}
