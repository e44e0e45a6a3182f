//! The composition executor (§4.6): resolves every source into a local
//! path, probes the handful of facts the planner's modes need as context
//! (uniform-stream check for `concat`, audio presence for the side-by-side
//! audio mix, video duration for subtitle timing), builds a plan, and runs
//! it step by step through `ChildProcessRunner` — ffmpeg-driven work all the
//! way down, so the runner's progress parser applies directly.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::domain::{CompositionRequest, CompositionResult};
use crate::error::TaskError;
use crate::planner::{self, PlanContext, PlanInputs};

use super::{resolve_local_input, ExecutorContext};

pub fn run(ctx: &ExecutorContext, task_id: &str, request: CompositionRequest) -> Result<CompositionResult, TaskError> {
    request.validate().map_err(TaskError::input_validation)?;

    let started = Instant::now();
    let scratch_dir = ctx.config.temp_composition_dir().join(task_id);
    std::fs::create_dir_all(&scratch_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create scratch dir: {err}")))?;

    let mut sources = Vec::with_capacity(request.videos.len());
    for video in &request.videos {
        sources.push(resolve_local_input(ctx, task_id, &video.source, &scratch_dir)?);
    }
    let audio = request
        .audio_file
        .as_ref()
        .map(|source| resolve_local_input(ctx, task_id, source, &scratch_dir))
        .transpose()?;
    let subtitle = request
        .subtitle_file
        .as_ref()
        .map(|source| resolve_local_input(ctx, task_id, source, &scratch_dir))
        .transpose()?;

    let output_dir = ctx.config.compositions_dir();
    std::fs::create_dir_all(&output_dir)
        .map_err(|err| TaskError::filesystem(format!("failed to create compositions dir: {err}")))?;
    let output_path = output_dir.join(format!("{task_id}.{}", request.output_format.as_str()));

    let inputs = PlanInputs {
        sources: sources.clone(),
        audio,
        subtitle,
        output_path: output_path.clone(),
        scratch_dir: scratch_dir.clone(),
    };

    let probed_streams: Vec<ProbedStream> = sources
        .iter()
        .map(|path| probe_stream(&ctx.config.ffprobe_bin, path))
        .collect::<Result<_, _>>()?;

    let context = PlanContext {
        probed_uniform: streams_are_uniform(&probed_streams),
        any_input_has_audio: probed_streams.iter().any(|stream| stream.has_audio),
        video_duration: probed_streams.first().map(|stream| stream.duration),
        max_source_width: probed_streams.iter().map(|stream| stream.width).max().unwrap_or(1280),
        max_source_height: probed_streams.iter().map(|stream| stream.height).max().unwrap_or(720),
    };

    let plan = planner::plan(&ctx.config.ffmpeg_bin, &request, &inputs, &context)?;

    ctx.registry.with_record_mut(task_id, |record| {
        record.temp_paths.insert(scratch_dir.clone());
        record.current_stage = Some("encoding".to_string());
    });

    let speed_tier = speed_tier_for(&request.output_quality);
    let mut used_accelerated_encoder = None;

    match plan {
        planner::Plan::Single(argv) => {
            let outcome = ctx
                .runner
                .run(&ctx.registry, task_id, argv, ctx.config.task_timeout, speed_tier)?;
            used_accelerated_encoder = outcome.used_accelerated_encoder;
        }
        planner::Plan::Pipeline { steps, final_argv } => {
            let total_steps = steps.len() + 1;
            for (index, step) in steps.into_iter().enumerate() {
                ctx.runner
                    .run(&ctx.registry, task_id, step, ctx.config.task_timeout, speed_tier)?;
                let percent = ((index + 1) as f64 / total_steps as f64) * 90.0;
                ctx.registry.with_record_mut(task_id, |record| {
                    record.set_progress(percent, format!("completed step {}/{}", index + 1, total_steps));
                });
            }
            let outcome = ctx
                .runner
                .run(&ctx.registry, task_id, final_argv, ctx.config.task_timeout, speed_tier)?;
            used_accelerated_encoder = outcome.used_accelerated_encoder;
        }
    }

    let output_stream = probe_stream(&ctx.config.ffprobe_bin, &output_path)?;
    let file_size_bytes = std::fs::metadata(&output_path).map(|meta| meta.len()).unwrap_or(0);

    Ok(CompositionResult {
        output_file: output_path.to_string_lossy().to_string(),
        width: output_stream.width,
        height: output_stream.height,
        duration: output_stream.duration,
        file_size_bytes,
        processing_time_s: started.elapsed().as_secs_f64(),
        used_accelerated_encoder,
    })
}

fn speed_tier_for(output_quality: &str) -> &'static str {
    match output_quality {
        "1080p" | "4k" => "slow",
        "480p" => "fast",
        _ => "medium",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ProbedStream {
    width: u32,
    height: u32,
    duration: f64,
    fps: f64,
    has_audio: bool,
}

fn streams_are_uniform(streams: &[ProbedStream]) -> bool {
    let Some(first) = streams.first() else {
        return true;
    };
    streams
        .iter()
        .all(|stream| stream.width == first.width && stream.height == first.height && (stream.fps - first.fps).abs() < 0.1)
}

fn probe_stream(ffprobe_bin: &str, path: &Path) -> Result<ProbedStream, TaskError> {
    let output = std::process::Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=width,height,r_frame_rate,codec_type:format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .map_err(|err| TaskError::processing(format!("failed to spawn ffprobe: {err}")))?;

    if !output.status.success() {
        return Err(TaskError::ffmpeg(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut width = 0u32;
    let mut height = 0u32;
    let mut fps = 0.0f64;
    let mut duration = 0.0f64;
    let mut has_audio = false;
    let mut seen_video = false;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        match key {
            "codec_type" if value == "audio" => has_audio = true,
            "codec_type" if value == "video" => seen_video = true,
            "width" if !seen_video || width == 0 => width = value.parse().unwrap_or(width),
            "height" if height == 0 => height = value.parse().unwrap_or(height),
            "r_frame_rate" if fps == 0.0 => fps = parse_frame_rate(value),
            "duration" => duration = value.parse().unwrap_or(duration),
            _ => {}
        }
    }

    Ok(ProbedStream {
        width,
        height,
        duration,
        fps,
        has_audio,
    })
}

fn parse_frame_rate(value: &str) -> f64 {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den == 0.0 { 0.0 } else { num / den }
        }
        None => value.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(width: u32, height: u32, fps: f64) -> ProbedStream {
        ProbedStream {
            width,
            height,
            duration: 10.0,
            fps,
            has_audio: false,
        }
    }

    #[test]
    fn uniform_check_requires_matching_resolution_and_fps() {
        let uniform = vec![stream(1920, 1080, 30.0), stream(1920, 1080, 30.0)];
        assert!(streams_are_uniform(&uniform));

        let mixed = vec![stream(1920, 1080, 30.0), stream(1280, 720, 30.0)];
        assert!(!streams_are_uniform(&mixed));
    }

    #[test]
    fn frame_rate_parses_fraction() {
        assert_eq!(parse_frame_rate("30000/1001"), 30000.0 / 1001.0);
        assert_eq!(parse_frame_rate("25/1"), 25.0);
    }

    #[test]
    fn speed_tier_scales_with_quality() {
        assert_eq!(speed_tier_for("1080p"), "slow");
        assert_eq!(speed_tier_for("480p"), "fast");
        assert_eq!(speed_tier_for("720p"), "medium");
    }
}
