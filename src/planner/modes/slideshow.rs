use crate::domain::CompositionRequest;
use crate::error::TaskError;
use crate::planner::placement::round_down_even;

use super::PlanInputs;

const CANVAS_WIDTH: u32 = 1280;
const CANVAS_HEIGHT: u32 = 720;
const DEFAULT_FRAME_DUR: f64 = 3.0;

fn json_f64(settings: Option<&serde_json::Value>, key: &str) -> Option<f64> {
    settings?.get(key)?.as_f64()
}

/// `slideshow` (§4.5): standardizes each still image (scale+pad to canvas,
/// SAR 1:1, 30 fps), holds each for `frame_dur`, concatenates, applies an
/// optional crossfade on seams, and muxes optional audio with `shortest`.
pub fn plan_slideshow(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.is_empty() {
        return Err(TaskError::input_validation("slideshow requires at least one image"));
    }

    let settings = request.output_settings.as_ref();
    let frame_dur = json_f64(settings, "frame_dur").unwrap_or(DEFAULT_FRAME_DUR).max(0.5);
    let fade_dur = json_f64(settings, "fade_dur").filter(|d| *d > 0.0);

    let width = round_down_even(CANVAS_WIDTH);
    let height = round_down_even(CANVAS_HEIGHT);

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-loop".to_string());
        argv.push("1".to_string());
        argv.push("-t".to_string());
        argv.push(format!("{frame_dur}"));
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }

    let count = inputs.sources.len();
    let mut parts = Vec::new();
    for i in 0..count {
        parts.push(format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1:1,fps=30[v{i}]"
        ));
    }

    let video_label = if let Some(fade) = fade_dur {
        let mut current = "v0".to_string();
        for i in 1..count {
            let offset = frame_dur * i as f64 - fade;
            let next = format!("vx{i}");
            parts.push(format!(
                "[{current}][v{i}]xfade=transition=fade:duration={fade}:offset={offset:.3}[{next}]"
            ));
            current = next;
        }
        current
    } else {
        let concat_inputs: String = (0..count).map(|i| format!("[v{i}]")).collect();
        parts.push(format!("{concat_inputs}concat=n={count}:v=1:a=0[vout]"));
        "vout".to_string()
    };

    let filter = parts.join(";");

    if inputs.audio.is_some() {
        argv.push("-i".to_string());
        argv.push(inputs.audio.as_ref().unwrap().to_string_lossy().to_string());
        argv.push("-filter_complex".to_string());
        argv.push(filter);
        argv.push("-map".to_string());
        argv.push(format!("[{video_label}]"));
        argv.push("-map".to_string());
        argv.push(format!("{count}:a"));
        argv.push("-shortest".to_string());
    } else {
        argv.push("-filter_complex".to_string());
        argv.push(filter);
        argv.push("-map".to_string());
        argv.push(format!("[{video_label}]"));
    }

    argv.push("-c:v".to_string());
    argv.push("libx264".to_string());
    argv.push("-crf".to_string());
    argv.push("20".to_string());
    argv.push("-pix_fmt".to_string());
    argv.push("yuv420p".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request_with_settings(settings: Option<serde_json::Value>) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::Slideshow,
            videos: vec![
                CompositionSource { source: "a.jpg".into(), start: None, end: None, gain: None, z_order: None },
                CompositionSource { source: "b.jpg".into(), start: None, end: None, gain: None, z_order: None },
            ],
            audio_file: None,
            subtitle_file: None,
            layout: None,
            transition_type: None,
            output_format: OutputFormat::Mp4,
            output_quality: "720p".to_string(),
            output_settings: settings,
        }
    }

    fn inputs() -> PlanInputs {
        PlanInputs {
            sources: vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")],
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn without_fade_uses_concat_filter() {
        let req = request_with_settings(None);
        let argv = plan_slideshow("ffmpeg", &req, &inputs()).unwrap();
        assert!(argv.iter().any(|a| a.contains("concat=n=2")));
    }

    #[test]
    fn with_fade_uses_xfade() {
        let req = request_with_settings(Some(serde_json::json!({"fade_dur": 0.5})));
        let argv = plan_slideshow("ffmpeg", &req, &inputs()).unwrap();
        assert!(argv.iter().any(|a| a.contains("xfade")));
    }
}
