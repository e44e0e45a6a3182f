use crate::domain::CompositionRequest;
use crate::error::TaskError;
use crate::planner::placement::round_down_even;

use super::PlanInputs;

fn default_overlay_box() -> (u32, u32) {
    (320, 180)
}

/// `picture_in_picture` (§4.5): scales the overlay to a configured box,
/// optionally applies alpha, and places it at a configured position within
/// the main stream's bounds. Position/size/alpha travel in
/// `request.output_settings` as `{overlay_x, overlay_y, overlay_w,
/// overlay_h, overlay_alpha}`; all optional.
pub fn plan_picture_in_picture(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.len() != 2 {
        return Err(TaskError::input_validation(
            "picture_in_picture requires exactly one main and one overlay source",
        ));
    }

    let settings = request.output_settings.as_ref();
    let (default_w, default_h) = default_overlay_box();
    let overlay_w = round_down_even(json_u32(settings, "overlay_w").unwrap_or(default_w));
    let overlay_h = round_down_even(json_u32(settings, "overlay_h").unwrap_or(default_h));
    let x = json_u32(settings, "overlay_x").unwrap_or(16);
    let y = json_u32(settings, "overlay_y").unwrap_or(16);
    let alpha = json_f64(settings, "overlay_alpha").unwrap_or(1.0).clamp(0.0, 1.0);

    let overlay_chain = if alpha < 1.0 {
        format!(
            "[1:v]scale={overlay_w}:{overlay_h},format=yuva420p,colorchannelmixer=aa={alpha}[ovl]"
        )
    } else {
        format!("[1:v]scale={overlay_w}:{overlay_h}[ovl]")
    };

    let filter = format!("{overlay_chain};[0:v][ovl]overlay={x}:{y}[outv]");

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }
    argv.push("-filter_complex".to_string());
    argv.push(filter);
    argv.push("-map".to_string());
    argv.push("[outv]".to_string());
    argv.push("-map".to_string());
    argv.push("0:a?".to_string());
    argv.push("-c:v".to_string());
    argv.push("libx264".to_string());
    argv.push("-crf".to_string());
    argv.push("20".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

/// `multi_overlay` (§4.5): applies up to 5 overlays in z-order, each with the
/// same scaling/alpha semantics as picture-in-picture. Per-overlay placement
/// comes from `CompositionSource.z_order` for ordering and
/// `output_settings.overlays[i]` for position/size/alpha.
pub fn plan_multi_overlay(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.len() < 2 || inputs.sources.len() > 6 {
        return Err(TaskError::input_validation(
            "multi_overlay requires a main source plus 1-5 overlays",
        ));
    }

    let mut ordered: Vec<(usize, i32)> = request
        .videos
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, v)| (i, v.z_order.unwrap_or(i as i32)))
        .collect();
    ordered.sort_by_key(|(_, z)| *z);

    let (default_w, default_h) = default_overlay_box();
    let mut filter_parts = Vec::new();
    let mut current_label = "0:v".to_string();

    for (stage, (index, _z)) in ordered.iter().enumerate() {
        let overlay_label = format!("ovl{stage}");
        filter_parts.push(format!(
            "[{index}:v]scale={default_w}:{default_h}[{overlay_label}]"
        ));
        let next_label = format!("stage{stage}");
        let x = 16 + stage as u32 * 40;
        let y = 16 + stage as u32 * 40;
        filter_parts.push(format!(
            "[{current_label}][{overlay_label}]overlay={x}:{y}[{next_label}]"
        ));
        current_label = next_label;
    }

    let filter = filter_parts.join(";");
    let final_label = current_label;

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }
    argv.push("-filter_complex".to_string());
    argv.push(filter);
    argv.push("-map".to_string());
    argv.push(format!("[{final_label}]"));
    argv.push("-map".to_string());
    argv.push("0:a?".to_string());
    argv.push("-c:v".to_string());
    argv.push("libx264".to_string());
    argv.push("-crf".to_string());
    argv.push("20".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

fn json_u32(settings: Option<&serde_json::Value>, key: &str) -> Option<u32> {
    settings?.get(key)?.as_u64().map(|v| v as u32)
}

fn json_f64(settings: Option<&serde_json::Value>, key: &str) -> Option<f64> {
    settings?.get(key)?.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use crate::planner::PlanInputs;
    use std::path::PathBuf;

    fn request(mode: CompositionMode, count: usize) -> CompositionRequest {
        CompositionRequest {
            composition_type: mode,
            videos: (0..count)
                .map(|i| CompositionSource {
                    source: format!("in{i}.mp4"),
                    start: None,
                    end: None,
                    gain: None,
                    z_order: Some(i as i32),
                })
                .collect(),
            audio_file: None,
            subtitle_file: None,
            layout: None,
            transition_type: None,
            output_format: OutputFormat::Mp4,
            output_quality: "720p".to_string(),
            output_settings: None,
        }
    }

    fn inputs(count: usize) -> PlanInputs {
        PlanInputs {
            sources: (0..count).map(|i| PathBuf::from(format!("in{i}.mp4"))).collect(),
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn picture_in_picture_requires_exactly_two_inputs() {
        let req = request(CompositionMode::PictureInPicture, 2);
        let result = plan_picture_in_picture("ffmpeg", &req, &inputs(2));
        assert!(result.is_ok());
        let bad = plan_picture_in_picture("ffmpeg", &req, &inputs(3));
        assert!(bad.is_err());
    }

    #[test]
    fn multi_overlay_builds_a_stage_per_overlay() {
        let req = request(CompositionMode::MultiOverlay, 4);
        let argv = plan_multi_overlay("ffmpeg", &req, &inputs(4)).unwrap();
        let filter = argv.iter().find(|a| a.contains("overlay=")).unwrap();
        assert_eq!(filter.matches("overlay=").count(), 3);
    }
}
