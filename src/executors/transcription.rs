//! The transcription executor (§4.6): resolves the source video, extracts a
//! mono 16kHz audio track with the codec tool, hands it to the speech-to-text
//! binary as an opaque collaborator, and renders its segments into SRT.
//!
//! The STT binary's contract: invoked as
//! `<stt_bin> --model <model> --output-format json <audio path>`, expected to
//! write a JSON array of `{start, end, text}` objects (seconds, UTF-8 text)
//! to stdout. This is the adapter boundary named in §1 — swapping engines
//! only means reimplementing `invoke_stt`.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::{TranscriptSegment, TranscriptionRequest, TranscriptionResult};
use crate::error::TaskError;
use crate::planner::subtitle::{render_srt, SubtitleCue};

use super::{resolve_local_input, ExecutorContext};

const STT_TIMEOUT: Duration = Duration::from_secs(1800);

pub fn run(ctx: &ExecutorContext, task_id: &str, request: TranscriptionRequest) -> Result<TranscriptionResult, TaskError> {
    let scratch_dir = ctx.config.data_root.join("scratch").join(task_id);
    std::fs::create_dir_all(&scratch_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create scratch dir: {err}")))?;

    let video_path = resolve_local_input(ctx, task_id, &request.video_url, &scratch_dir)?;

    let audio_path = scratch_dir.join("audio.wav");
    let extract_argv = vec![
        ctx.config.ffmpeg_bin.clone(),
        "-y".to_string(),
        "-i".to_string(),
        video_path.to_string_lossy().to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        audio_path.to_string_lossy().to_string(),
    ];
    ctx.registry.with_record_mut(task_id, |record| {
        record.current_stage = Some("extracting_audio".to_string());
    });
    ctx.runner
        .run(&ctx.registry, task_id, extract_argv, ctx.config.task_timeout, "fast")?;

    ctx.registry.with_record_mut(task_id, |record| {
        record.temp_paths.insert(audio_path.clone());
        record.current_stage = Some("transcribing".to_string());
        record.set_progress(50.0, "running speech-to-text");
    });

    let segments = invoke_stt(&ctx.config.stt_bin, &ctx.config.stt_model, &audio_path)?;
    let duration = segments.last().map(|segment| segment.end).unwrap_or(0.0);

    let cues: Vec<SubtitleCue> = segments
        .iter()
        .map(|segment| SubtitleCue {
            start: segment.start,
            end: segment.end,
            text: segment.text.clone(),
        })
        .collect();
    let srt_text = render_srt(&cues);

    Ok(TranscriptionResult {
        language: "unknown".to_string(),
        duration,
        segments,
        srt_text,
    })
}

#[derive(Debug, Deserialize)]
struct RawSttSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Spawns the speech-to-text binary with stdout captured (its JSON payload
/// lands there, unlike the codec tool's stderr-carried progress), enforcing
/// a hard wall-clock timeout since this tool has no cancellation hook into
/// the registry.
fn invoke_stt(stt_bin: &str, model: &str, audio_path: &std::path::Path) -> Result<Vec<TranscriptSegment>, TaskError> {
    use std::io::Read;
    use std::process::Stdio;

    let mut cmd = std::process::Command::new(stt_bin);
    cmd.args(["--model", model, "--output-format", "json"])
        .arg(audio_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|err| TaskError::processing(format!("failed to spawn speech-to-text engine: {err}")))?;

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

    let start = std::time::Instant::now();
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| TaskError::processing(format!("failed to poll speech-to-text engine: {err}")))?
        {
            break status;
        }
        if start.elapsed() >= STT_TIMEOUT {
            crate::process_ext::terminate_then_kill(&mut child, Duration::from_secs(5));
            return Err(TaskError::timeout("speech-to-text engine exceeded its timeout"));
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    if !status.success() {
        return Err(TaskError::processing(format!(
            "speech-to-text engine exited with {status}: {}",
            String::from_utf8_lossy(&stderr_bytes).trim()
        )));
    }

    let raw: Vec<RawSttSegment> = serde_json::from_slice(&stdout_bytes)
        .map_err(|err| TaskError::processing(format!("failed to parse speech-to-text output: {err}")))?;

    Ok(raw
        .into_iter()
        .map(|segment| TranscriptSegment {
            start: segment.start,
            end: segment.end,
            text: segment.text,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_segments_deserialize_from_json_array() {
        let json = r#"[{"start":0.0,"end":1.5,"text":"hello"}]"#;
        let raw: Vec<RawSttSegment> = serde_json::from_str(json).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].text, "hello");
    }
}
