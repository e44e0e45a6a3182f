use crate::domain::CompositionRequest;
use crate::error::TaskError;

use super::PlanInputs;

fn json_str<'a>(settings: Option<&'a serde_json::Value>, key: &str) -> Option<&'a str> {
    settings?.get(key)?.as_str()
}

fn json_f64(settings: Option<&serde_json::Value>, key: &str) -> Option<f64> {
    settings?.get(key)?.as_f64()
}

fn json_array<'a>(settings: Option<&'a serde_json::Value>, key: &str) -> Option<&'a Vec<serde_json::Value>> {
    settings?.get(key)?.as_array()
}

/// `audio_only` transforms (§4.5): volume/fade, format conversion, extraction
/// from a video source, up to 10-track weighted mixing, and crossfade.
/// `output_settings.transform` selects which straight single-command graph
/// to build; all are no-image-stream.
pub fn plan_audio_only(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    let settings = request.output_settings.as_ref();
    let transform = json_str(settings, "transform").unwrap_or("convert");

    match transform {
        "extract" => plan_extract(ffmpeg_bin, inputs),
        "mix" => plan_mix(ffmpeg_bin, settings, inputs),
        "crossfade" => plan_crossfade(ffmpeg_bin, settings, inputs),
        "volume_fade" => plan_volume_fade(ffmpeg_bin, settings, inputs),
        _ => plan_convert(ffmpeg_bin, inputs),
    }
}

fn plan_extract(ffmpeg_bin: &str, inputs: &PlanInputs) -> Result<Vec<String>, TaskError> {
    let source = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("audio_only/extract requires one source"))?;
    Ok(vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "aac".to_string(),
        inputs.output_path.to_string_lossy().to_string(),
    ])
}

fn plan_convert(ffmpeg_bin: &str, inputs: &PlanInputs) -> Result<Vec<String>, TaskError> {
    let source = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("audio_only/convert requires one source"))?;
    Ok(vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        inputs.output_path.to_string_lossy().to_string(),
    ])
}

fn plan_volume_fade(
    ffmpeg_bin: &str,
    settings: Option<&serde_json::Value>,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    let source = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("audio_only/volume_fade requires one source"))?;
    let volume = json_f64(settings, "volume").unwrap_or(1.0);
    let fade_in = json_f64(settings, "fade_in").unwrap_or(0.0);
    let fade_out = json_f64(settings, "fade_out").unwrap_or(0.0);

    let mut filter = format!("volume={volume}");
    if fade_in > 0.0 {
        filter.push_str(&format!(",afade=t=in:st=0:d={fade_in}"));
    }
    if fade_out > 0.0 {
        filter.push_str(&format!(",afade=t=out:d={fade_out}"));
    }

    Ok(vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-af".to_string(),
        filter,
        inputs.output_path.to_string_lossy().to_string(),
    ])
}

const MAX_MIX_TRACKS: usize = 10;

fn plan_mix(
    ffmpeg_bin: &str,
    settings: Option<&serde_json::Value>,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.is_empty() || inputs.sources.len() > MAX_MIX_TRACKS {
        return Err(TaskError::input_validation(format!(
            "audio_only/mix accepts 1..={MAX_MIX_TRACKS} tracks"
        )));
    }

    let weights = json_array(settings, "weights")
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }

    let mut parts = Vec::new();
    let mut labels = Vec::new();
    for i in 0..inputs.sources.len() {
        let weight = weights.get(i).copied().unwrap_or(1.0).clamp(0.0, 10.0);
        parts.push(format!("[{i}:a]volume={weight}[a{i}]"));
        labels.push(format!("[a{i}]"));
    }
    parts.push(format!(
        "{}amix=inputs={}:duration=longest[outa]",
        labels.join(""),
        inputs.sources.len()
    ));

    argv.push("-filter_complex".to_string());
    argv.push(parts.join(";"));
    argv.push("-map".to_string());
    argv.push("[outa]".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

fn plan_crossfade(
    ffmpeg_bin: &str,
    settings: Option<&serde_json::Value>,
    inputs: &PlanInputs,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.len() < 2 {
        return Err(TaskError::input_validation(
            "audio_only/crossfade requires at least 2 sources",
        ));
    }

    let fade = json_f64(settings, "crossfade_seconds").unwrap_or(1.0).clamp(0.1, 10.0);

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }

    let mut current = "0:a".to_string();
    let mut parts = Vec::new();
    for i in 1..inputs.sources.len() {
        let next = if i + 1 == inputs.sources.len() {
            "outa".to_string()
        } else {
            format!("x{i}")
        };
        parts.push(format!(
            "[{current}][{i}:a]acrossfade=d={fade}[{next}]"
        ));
        current = next;
    }

    argv.push("-filter_complex".to_string());
    argv.push(parts.join(";"));
    argv.push("-map".to_string());
    argv.push("[outa]".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(transform: &str) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::AudioOnly,
            videos: vec![CompositionSource {
                source: "a.mp3".into(),
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
            output_settings: Some(serde_json::json!({"transform": transform})),
        }
    }

    fn inputs(count: usize) -> PlanInputs {
        PlanInputs {
            sources: (0..count).map(|i| PathBuf::from(format!("a{i}.mp3"))).collect(),
            audio: None,
            subtitle: None,
            output_path: PathBuf::from("out.aac"),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn mix_rejects_more_than_ten_tracks() {
        let req = request("mix");
        assert!(plan_audio_only("ffmpeg", &req, &inputs(11)).is_err());
        assert!(plan_audio_only("ffmpeg", &req, &inputs(3)).is_ok());
    }

    #[test]
    fn crossfade_requires_two_sources() {
        let req = request("crossfade");
        assert!(plan_audio_only("ffmpeg", &req, &inputs(1)).is_err());
        assert!(plan_audio_only("ffmpeg", &req, &inputs(2)).is_ok());
    }
}
