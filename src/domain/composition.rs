use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The eleven composition modes (§4.5). Unrecognized `composition_type`
/// strings fail input validation before a task is ever created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    Concat,
    ExtractAndConcat,
    AudioVideoSubtitle,
    PictureInPicture,
    MultiOverlay,
    SideBySide,
    SideBySideAudioMix,
    Slideshow,
    AudioOnly,
    Watermark,
    ColorFilter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mov,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
        }
    }
}

fn default_output_quality() -> String {
    "720p".to_string()
}

/// A single composition input, addressed by local path or remote URL (fetched
/// by the download executor ahead of composition, per §4.6). `start`/`end`
/// are used by `extract_and_concat`; `gain` by `side_by_side_audio_mix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSource {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_order: Option<i32>,
}

/// The HTTP-level composition request (§6 `POST /compose_video`).
/// Mode-specific knobs that don't warrant a named field of their own (fade
/// durations, watermark position/opacity, color-filter strengths, per-frame
/// slideshow durations) travel in `output_settings` as a JSON object; the
/// planner parses the subset each mode cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRequest {
    pub composition_type: CompositionMode,
    #[serde(default)]
    pub videos: Vec<CompositionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_type: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_output_quality")]
    pub output_quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_settings: Option<Value>,
}

impl CompositionRequest {
    pub fn minimum_inputs(&self) -> usize {
        match self.composition_type {
            CompositionMode::Concat | CompositionMode::ExtractAndConcat => 2,
            CompositionMode::SideBySide | CompositionMode::SideBySideAudioMix => 2,
            CompositionMode::PictureInPicture => 2,
            CompositionMode::MultiOverlay => 2,
            CompositionMode::AudioVideoSubtitle => 1,
            CompositionMode::Slideshow => 1,
            CompositionMode::AudioOnly | CompositionMode::Watermark | CompositionMode::ColorFilter => 1,
        }
    }

    pub fn maximum_overlays(&self) -> Option<usize> {
        match self.composition_type {
            CompositionMode::MultiOverlay => Some(5),
            CompositionMode::SideBySide | CompositionMode::SideBySideAudioMix => Some(4),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.videos.len() < self.minimum_inputs() {
            return Err(format!(
                "{:?} requires at least {} input(s), got {}",
                self.composition_type,
                self.minimum_inputs(),
                self.videos.len()
            ));
        }
        if let Some(max) = self.maximum_overlays() {
            if self.videos.len() > max {
                return Err(format!(
                    "{:?} accepts at most {} input(s), got {}",
                    self.composition_type,
                    max,
                    self.videos.len()
                ));
            }
        }
        if self.composition_type == CompositionMode::SideBySideAudioMix {
            for source in &self.videos {
                if let Some(gain) = source.gain {
                    if !(0.0..=2.0).contains(&gain) {
                        return Err("gain must be within 0.0..=2.0".to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionResult {
    pub output_file: String,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub file_size_bytes: u64,
    pub processing_time_s: f64,
    pub used_accelerated_encoder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: CompositionMode, inputs: usize) -> CompositionRequest {
        CompositionRequest {
            composition_type: mode,
            videos: (0..inputs)
                .map(|i| CompositionSource {
                    source: format!("input-{i}.mp4"),
                    start: None,
                    end: None,
                    gain: None,
                    z_order: None,
                })
                .collect(),
            audio_file: None,
            subtitle_file: None,
            layout: None,
            transition_type: None,
            output_format: OutputFormat::Mp4,
            output_quality: default_output_quality(),
            output_settings: None,
        }
    }

    #[test]
    fn concat_requires_at_least_two_inputs() {
        assert!(request(CompositionMode::Concat, 1).validate().is_err());
        assert!(request(CompositionMode::Concat, 2).validate().is_ok());
    }

    #[test]
    fn multi_overlay_caps_at_five() {
        assert!(request(CompositionMode::MultiOverlay, 6).validate().is_err());
        assert!(request(CompositionMode::MultiOverlay, 6).videos.len() == 6);
    }

    #[test]
    fn gain_out_of_range_is_rejected() {
        let mut req = request(CompositionMode::SideBySideAudioMix, 2);
        req.videos[0].gain = Some(3.0);
        assert!(req.validate().is_err());
    }
}
