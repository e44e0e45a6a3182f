use crate::domain::CompositionRequest;
use crate::error::TaskError;

use super::PlanInputs;

fn json_str<'a>(settings: Option<&'a serde_json::Value>, key: &str) -> Option<&'a str> {
    settings?.get(key)?.as_str()
}

fn json_f64(settings: Option<&serde_json::Value>, key: &str) -> Option<f64> {
    settings?.get(key)?.as_f64()
}

fn position_offsets(position: &str) -> (&'static str, &'static str) {
    match position {
        "top_left" => ("10", "10"),
        "top_right" => ("W-w-10", "10"),
        "bottom_left" => ("10", "H-h-10"),
        "center" => ("(W-w)/2", "(H-h)/2"),
        _ => ("W-w-10", "H-h-10"), // bottom_right default
    }
}

/// `watermark` (§4.5): an image overlay (scaled + alpha-mixed) or a text
/// overlay (`drawtext` with font/size/fill/box), placed at a named position
/// preset with configurable opacity/scale.
pub fn plan_watermark(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    let main = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("watermark requires a main source"))?;
    let settings = request.output_settings.as_ref();
    let position = json_str(settings, "position").unwrap_or("bottom_right");
    let (x, y) = position_offsets(position);

    if let Some(watermark_image) = inputs.sources.get(1) {
        let opacity = json_f64(settings, "opacity").unwrap_or(1.0).clamp(0.0, 1.0);
        let scale = json_f64(settings, "scale").unwrap_or(0.2).clamp(0.01, 1.0);

        let filter = format!(
            "[1:v]scale=iw*{scale}:-1,format=yuva420p,colorchannelmixer=aa={opacity}[wm];\
[0:v][wm]overlay={x}:{y}[outv]"
        );

        Ok(vec![
            ffmpeg_bin.to_string(),
            "-y".to_string(),
            "-i".to_string(),
            main.to_string_lossy().to_string(),
            "-i".to_string(),
            watermark_image.to_string_lossy().to_string(),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[outv]".to_string(),
            "-map".to_string(),
            "0:a?".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            "20".to_string(),
            inputs.output_path.to_string_lossy().to_string(),
        ])
    } else {
        let text = json_str(settings, "text").unwrap_or("watermark");
        let font_size = json_f64(settings, "font_size").unwrap_or(24.0);
        let fill_color = json_str(settings, "fill_color").unwrap_or("white");
        let escaped_text = text.replace(':', "\\:").replace('\'', "\\'");

        let filter = format!(
            "drawtext=text='{escaped_text}':fontsize={font_size}:fontcolor={fill_color}:\
box=1:boxcolor=black@0.4:boxborderw=6:x={x}:y={y}"
        );

        Ok(vec![
            ffmpeg_bin.to_string(),
            "-y".to_string(),
            "-i".to_string(),
            main.to_string_lossy().to_string(),
            "-vf".to_string(),
            filter,
            "-c:a".to_string(),
            "copy".to_string(),
            inputs.output_path.to_string_lossy().to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(settings: serde_json::Value) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::Watermark,
            videos: vec![CompositionSource {
                source: "main.mp4".into(),
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

    #[test]
    fn text_watermark_uses_drawtext() {
        let req = request(serde_json::json!({"text": "hello", "position": "top_left"}));
        let inputs = PlanInputs {
            sources: vec![PathBuf::from("main.mp4")],
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: PathBuf::from("/tmp"),
        };
        let argv = plan_watermark("ffmpeg", &req, &inputs).unwrap();
        assert!(argv.iter().any(|a| a.contains("drawtext")));
    }

    #[test]
    fn image_watermark_uses_overlay() {
        let req = request(serde_json::json!({}));
        let inputs = PlanInputs {
            sources: vec![PathBuf::from("main.mp4"), PathBuf::from("logo.png")],
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: PathBuf::from("/tmp"),
        };
        let argv = plan_watermark("ffmpeg", &req, &inputs).unwrap();
        assert!(argv.iter().any(|a| a.contains("overlay=")));
    }
}
