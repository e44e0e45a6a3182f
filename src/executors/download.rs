//! The download executor (§4.6): drives the external downloader tool
//! directly rather than through `ChildProcessRunner`, since that runner's
//! progress parser understands the codec tool's `Duration:`/`time=` stderr
//! idiom, not the downloader's `[download]  NN.N%` stdout idiom. Still
//! follows the runner's shape: attach a `ChildHandle` to the task record so
//! cancellation and the janitor's zombie sweep work the same way for every
//! task family.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::domain::{ChildHandle, DownloadRequest, DownloadResult};
use crate::error::TaskError;
use crate::process_ext::terminate_then_kill;

use super::ExecutorContext;

pub fn run(ctx: &ExecutorContext, task_id: &str, request: DownloadRequest) -> Result<DownloadResult, TaskError> {
    request
        .video_url
        .starts_with("http")
        .then_some(())
        .ok_or_else(|| TaskError::input_validation("videoUrl must be an http(s) URL"))?;

    let output_dir = ctx.config.downloads_dir();
    std::fs::create_dir_all(&output_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create downloads dir: {err}")))?;
    let output_template = output_dir.join(format!("{task_id}.%(ext)s"));

    let format_selector = format_selector_for(request.quality.as_str());
    let argv = vec![
        ctx.config.ytdlp_bin.clone(),
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "-f".to_string(),
        format_selector,
        "--merge-output-format".to_string(),
        request.format.as_str().to_string(),
        "-o".to_string(),
        output_template.to_string_lossy().to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        request.video_url.clone(),
    ];

    let outcome = run_with_progress(ctx, task_id, argv, ctx.config.task_timeout)?;
    let file_path = last_existing_path_line(&outcome.stdout)
        .ok_or_else(|| TaskError::processing("downloader exited successfully but reported no output file"))?;

    let file_size_bytes = std::fs::metadata(&file_path).map(|meta| meta.len()).unwrap_or(0);
    let actual_format = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(request.format.as_str())
        .to_string();
    let actual_resolution = probe_resolution(&ctx.config.ffprobe_bin, &file_path).unwrap_or_else(|| "unknown".to_string());
    let available_format_count = count_available_formats(&ctx.config.ytdlp_bin, &request.video_url);

    Ok(DownloadResult {
        file_path: file_path.to_string_lossy().to_string(),
        actual_format,
        actual_resolution,
        file_size_bytes,
        available_format_count,
    })
}

fn format_selector_for(quality: &str) -> String {
    match quality {
        "1080p" => "bestvideo[height<=1080]+bestaudio/best[height<=1080]".to_string(),
        "720p" => "bestvideo[height<=720]+bestaudio/best[height<=720]".to_string(),
        "480p" => "bestvideo[height<=480]+bestaudio/best[height<=480]".to_string(),
        "worst" => "worstvideo+worstaudio/worst".to_string(),
        _ => "bestvideo+bestaudio/best".to_string(),
    }
}

struct DownloadOutcome {
    stdout: Vec<u8>,
}

/// `yt-dlp`-specific sibling of `ChildProcessRunner::run`: same attach/poll/
/// cancel/timeout shape, but parses progress out of stdout instead of
/// stderr, using the `[download]  NN.N%` line the tool emits under
/// `--newline`.
fn run_with_progress(
    ctx: &ExecutorContext,
    task_id: &str,
    argv: Vec<String>,
    timeout: Duration,
) -> Result<DownloadOutcome, TaskError> {
    let Some((program, rest)) = argv.split_first() else {
        return Err(TaskError::input_validation("empty argument vector"));
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child: Child = cmd
        .spawn()
        .map_err(|err| TaskError::processing(format!("failed to spawn {program}: {err}")))?;
    let pid = child.id();

    let mut stdout = child.stdout.take();
    let (stdout_tx, stdout_rx) = std::sync::mpsc::channel::<String>();
    let stdout_handle = std::thread::spawn(move || {
        let mut captured = Vec::new();
        if let Some(stdout) = stdout.as_mut() {
            let mut buf = [0u8; 4096];
            let mut pending = Vec::new();
            loop {
                let n = match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                captured.extend_from_slice(&buf[..n]);
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    if !line.is_empty() {
                        let _ = stdout_tx.send(line);
                    }
                }
            }
        }
        captured
    });

    let mut stderr = child.stderr.take();
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_end(&mut buf);
        }
        buf
    });

    ctx.registry.attach_child(task_id, ChildHandle { child, pid });

    let progress_re = Regex::new(r"\[download\]\s+(\d+\.\d+)%").expect("static regex must compile");
    let start = Instant::now();
    let mut timed_out = false;

    loop {
        while let Ok(line) = stdout_rx.try_recv() {
            if let Some(captures) = progress_re.captures(&line) {
                if let Some(percent) = captures.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                    ctx.registry.with_record_mut(task_id, |record| {
                        record.set_progress(percent, format!("downloading: {percent:.0}%"));
                    });
                }
            }
        }

        let exited = ctx.registry.with_record(task_id, |record| record.child.is_none());
        if exited == Some(true) {
            break;
        }

        let still_running = ctx
            .registry
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
                    if let Some(mut handle) = ctx.registry.take_child(task_id) {
                        terminate_then_kill(&mut handle.child, Duration::from_secs(5));
                    }
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            _ => break,
        }
    }

    let cancel_requested = ctx.registry.with_record(task_id, |record| record.cancel_requested) == Some(true);
    let exit_status = ctx.registry.take_child(task_id).map(|mut handle| handle.child.wait());

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    if timed_out {
        return Err(TaskError::timeout(format!("download exceeded timeout of {timeout:?}")));
    }
    if cancel_requested {
        return Err(TaskError::cancelled());
    }

    match exit_status {
        Some(Ok(status)) if status.success() => Ok(DownloadOutcome { stdout: stdout_bytes }),
        Some(Ok(status)) => Err(TaskError::network(format!(
            "downloader exited with {status}: {}",
            String::from_utf8_lossy(&stderr_bytes).trim()
        ))),
        Some(Err(err)) => Err(TaskError::processing(format!("failed to await downloader: {err}"))),
        None => Err(TaskError::cancelled()),
    }
}

fn last_existing_path_line(stdout: &[u8]) -> Option<std::path::PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .map(|line| std::path::PathBuf::from(line.trim()))
        .find(|path| path.is_file())
}

fn probe_resolution(ffprobe_bin: &str, file_path: &std::path::Path) -> Option<String> {
    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(file_path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

/// Best-effort count of formats `yt-dlp -F` reports for the source; a
/// diagnostic field only, so failures degrade to zero rather than failing
/// the whole download.
fn count_available_formats(ytdlp_bin: &str, video_url: &str) -> u32 {
    let output = Command::new(ytdlp_bin).args(["--no-playlist", "-F", video_url]).output();
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .count() as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selector_honors_quality_cap() {
        assert!(format_selector_for("720p").contains("height<=720"));
        assert!(format_selector_for("worst").contains("worstvideo"));
        assert!(format_selector_for("best").contains("bestvideo+bestaudio"));
    }

    #[test]
    fn last_existing_path_line_skips_non_path_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("video.mp4");
        std::fs::write(&file, b"data").unwrap();
        let stdout = format!("[download] 100%\n{}\n", file.display());
        let found = last_existing_path_line(stdout.as_bytes());
        assert_eq!(found, Some(file));
    }
}
