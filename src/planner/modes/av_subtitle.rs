use crate::domain::CompositionRequest;
use crate::error::TaskError;
use crate::planner::subtitle::{render_srt, rhythm_based_fallback, split_into_segments};

use super::PlanInputs;

const KNOWN_SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "vtt"];

/// `audio_video_subtitle` (§4.5): muxes a video's image stream with a
/// separate audio source; if a subtitle file is provided, burns it into the
/// image via the codec tool's subtitle filter. A `.txt` subtitle file is
/// first synthesized into a timed `.srt` using the rhythm-based fallback
/// (§4.5.1) since no acoustic alignment input is available at the planner
/// boundary — `video_duration` carries the denominator when known. Clips to
/// the shorter of the two streams.
pub fn plan_audio_video_subtitle(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
    video_duration: Option<f64>,
) -> Result<Vec<String>, TaskError> {
    let video = inputs
        .sources
        .first()
        .ok_or_else(|| TaskError::input_validation("audio_video_subtitle requires a video source"))?;
    let audio = inputs
        .audio
        .as_ref()
        .ok_or_else(|| TaskError::input_validation("audio_video_subtitle requires an audio source"))?;

    let mut argv = vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
    ];

    let resolved_subtitle_path = match &request.subtitle_file {
        Some(path) if path.ends_with(".txt") => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| TaskError::filesystem(format!("failed to read subtitle script: {err}")))?;
            let segments = split_into_segments(&text);
            let cues = rhythm_based_fallback(&segments, video_duration);
            let srt = render_srt(&cues);
            let synthesized_path = inputs.scratch_dir.join("synthesized.srt");
            std::fs::write(&synthesized_path, srt)
                .map_err(|err| TaskError::filesystem(format!("failed to write synthesized subtitle: {err}")))?;
            Some(synthesized_path.to_string_lossy().to_string())
        }
        Some(path) => {
            let extension = std::path::Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if !KNOWN_SUBTITLE_EXTENSIONS.contains(&extension) {
                return Err(TaskError::input_validation(format!(
                    "unsupported subtitle extension: {extension}"
                )));
            }
            Some(path.clone())
        }
        None => None,
    };

    if let Some(subtitle_path) = resolved_subtitle_path {
        let escaped = subtitle_path.replace('\\', "\\\\").replace(':', "\\:");
        argv.push("-vf".to_string());
        argv.push(format!("subtitles='{escaped}'"));
    }

    argv.push("-map".to_string());
    argv.push("0:v:0".to_string());
    argv.push("-map".to_string());
    argv.push("1:a:0".to_string());
    argv.push("-shortest".to_string());
    argv.push("-c:a".to_string());
    argv.push("aac".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(subtitle_file: Option<String>) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::AudioVideoSubtitle,
            videos: vec![CompositionSource {
                source: "video.mp4".into(),
                start: None,
                end: None,
                gain: None,
                z_order: None,
            }],
            audio_file: Some("audio.mp3".into()),
            subtitle_file,
            layout: None,
            transition_type: None,
            output_format: OutputFormat::Mp4,
            output_quality: "720p".to_string(),
            output_settings: None,
        }
    }

    fn inputs() -> PlanInputs {
        PlanInputs {
            sources: vec![PathBuf::from("video.mp4")],
            audio: Some(PathBuf::from("audio.mp3")),
            subtitle: None,
            output_path: PathBuf::from("out.mp4"),
            scratch_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn rejects_unknown_subtitle_extension() {
        let req = request(Some("script.docx".into()));
        let result = plan_audio_video_subtitle("ffmpeg", &req, &inputs(), Some(10.0));
        assert!(result.is_err());
    }

    #[test]
    fn passes_through_srt_unmodified() {
        let req = request(Some("script.srt".into()));
        let argv = plan_audio_video_subtitle("ffmpeg", &req, &inputs(), Some(10.0)).unwrap();
        assert!(argv.iter().any(|a| a.contains("script.srt")));
    }

    #[test]
    fn no_subtitle_skips_burn_in() {
        let req = request(None);
        let argv = plan_audio_video_subtitle("ffmpeg", &req, &inputs(), None).unwrap();
        assert!(!argv.iter().any(|a| a.contains("subtitles=")));
    }
}
