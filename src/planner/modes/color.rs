use crate::domain::CompositionRequest;
use crate::error::TaskError;

use super::PlanInputs;

fn json_f64(settings: Option<&serde_json::Value>, key: &str) -> Option<f64> {
    settings?.get(key)?.as_f64()
}

/// `color/filter` (§4.5): composes a filter chain from whichever of
/// brightness/contrast/saturation/gamma/blur/sharpen or
/// temperature/tint/highlights/shadows/vibrance are present in
/// `output_settings`; audio is stream-copied untouched.
pub fn plan_color_filter(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    let source = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("color/filter requires one source"))?;
    let settings = request.output_settings.as_ref();

    let mut stages = Vec::new();

    let brightness = json_f64(settings, "brightness");
    let contrast = json_f64(settings, "contrast");
    let saturation = json_f64(settings, "saturation").or_else(|| json_f64(settings, "vibrance"));
    let gamma = json_f64(settings, "gamma");
    if brightness.is_some() || contrast.is_some() || saturation.is_some() || gamma.is_some() {
        stages.push(format!(
            "eq=brightness={}:contrast={}:saturation={}:gamma={}",
            brightness.unwrap_or(0.0),
            contrast.unwrap_or(1.0),
            saturation.unwrap_or(1.0),
            gamma.unwrap_or(1.0),
        ));
    }

    if let Some(blur) = json_f64(settings, "blur") {
        if blur > 0.0 {
            stages.push(format!("gblur=sigma={blur}"));
        }
    }

    if let Some(sharpen) = json_f64(settings, "sharpen") {
        if sharpen > 0.0 {
            stages.push(format!("unsharp=5:5:{sharpen}:5:5:0.0"));
        }
    }

    if let Some(temperature) = json_f64(settings, "temperature") {
        let red_gain = 1.0 + temperature / 100.0;
        let blue_gain = 1.0 - temperature / 100.0;
        stages.push(format!(
            "colorbalance=rs={:.3}:bs={:.3}",
            (red_gain - 1.0).clamp(-1.0, 1.0),
            (blue_gain - 1.0).clamp(-1.0, 1.0)
        ));
    }

    if let Some(tint) = json_f64(settings, "tint") {
        stages.push(format!("colorbalance=gs={:.3}", (tint / 100.0).clamp(-1.0, 1.0)));
    }

    if let Some(highlights) = json_f64(settings, "highlights") {
        stages.push(format!("curves=all='0/0 0.75/{:.3} 1/1'", (0.75 + highlights / 200.0).clamp(0.0, 1.0)));
    }

    if let Some(shadows) = json_f64(settings, "shadows") {
        stages.push(format!("curves=all='0/0 0.25/{:.3} 1/1'", (0.25 + shadows / 200.0).clamp(0.0, 1.0)));
    }

    if stages.is_empty() {
        stages.push("null".to_string());
    }

    Ok(vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-vf".to_string(),
        stages.join(","),
        "-c:a".to_string(),
        "copy".to_string(),
        inputs.output_path.to_string_lossy().to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(settings: serde_json::Value) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::ColorFilter,
            videos: vec![CompositionSource {
                source: "in.mp4".into(),
                start: None,
                end: None,
                gain: None,
                z_order: None,
            }],
            audio_file: None,
            subtitle_file: None,
            layout: None,
            transition_type: None,
            output_format: OutputFormat::Mp4,
            output_quality: "720p".to_string(),
            output_settings: Some(settings),
        }
    }

    fn inputs() -> PlanInputs {
        PlanInputs {
            sources: vec![PathBuf::from("in.mp4")],
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn builds_eq_stage_when_basic_fields_present() {
        let req = request(serde_json::json!({"brightness": 0.1, "contrast": 1.2}));
        let argv = plan_color_filter("ffmpeg", &req, &inputs()).unwrap();
        assert!(argv.iter().any(|a| a.contains("eq=brightness=0.1")));
    }

    #[test]
    fn falls_back_to_null_filter_when_nothing_requested() {
        let req = request(serde_json::json!({}));
        let argv = plan_color_filter("ffmpeg", &req, &inputs()).unwrap();
        assert!(argv.iter().any(|a| a == "null"));
    }
}
