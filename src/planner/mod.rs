//! The composition planner (§4.5): turns a `CompositionRequest` plus resolved
//! local inputs into one or more codec-tool invocations. Each mode lives in
//! its own `modes::*` submodule; this file only dispatches and validates.

pub mod modes;
pub mod placement;
pub mod subtitle;
pub mod validate;

pub use modes::PlanInputs;

use crate::domain::{CompositionMode, CompositionRequest};
use crate::error::TaskError;

/// Extra context a handful of modes need beyond `PlanInputs`, supplied by
/// whatever probed the inputs ahead of planning (the composition executor).
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// `concat`: true when every source already agrees on resolution/fps/codec,
    /// enabling the stream-copy concat-demuxer path instead of a re-encode.
    pub probed_uniform: bool,
    /// `side_by_side_audio_mix`: true when at least one source carries an
    /// audio stream, so no silent track needs synthesizing.
    pub any_input_has_audio: bool,
    /// `audio_video_subtitle`: the video stream's duration, used as the
    /// denominator for the rhythm-based subtitle-timing fallback.
    pub video_duration: Option<f64>,
    /// `side_by_side`/`side_by_side_audio_mix`: the max width/height across
    /// probed sources, from which the grid cell size is derived.
    pub max_source_width: u32,
    pub max_source_height: u32,
}

impl Default for PlanContext {
    fn default() -> Self {
        Self {
            probed_uniform: false,
            any_input_has_audio: false,
            video_duration: None,
            max_source_width: 1280,
            max_source_height: 720,
        }
    }
}

/// A plan is either one codec-tool invocation, or a short ordered pipeline of
/// them (`extract_and_concat` cuts each source before concatenating).
#[derive(Debug, Clone)]
pub enum Plan {
    Single(Vec<String>),
    Pipeline {
        steps: Vec<Vec<String>>,
        final_argv: Vec<String>,
    },
}

impl Plan {
    /// All argv's this plan would run, in order.
    pub fn all_argvs(&self) -> Vec<&Vec<String>> {
        match self {
            Plan::Single(argv) => vec![argv],
            Plan::Pipeline { steps, final_argv } => {
                let mut all: Vec<&Vec<String>> = steps.iter().collect();
                all.push(final_argv);
                all
            }
        }
    }
}

/// Builds and validates the codec-tool invocation(s) for `request`, routed by
/// `request.composition_type`. Every assembled argv is run through
/// `validate::validate_argv` before this function returns.
pub fn plan(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
    context: &PlanContext,
) -> Result<Plan, TaskError> {
    let built = match request.composition_type {
        CompositionMode::Concat => {
            Plan::Single(modes::concat::plan_concat(ffmpeg_bin, inputs, context.probed_uniform)?)
        }
        CompositionMode::ExtractAndConcat => {
            let (steps, final_argv) =
                modes::concat::plan_extract_and_concat(ffmpeg_bin, request, inputs)?;
            Plan::Pipeline { steps, final_argv }
        }
        CompositionMode::AudioVideoSubtitle => Plan::Single(modes::av_subtitle::plan_audio_video_subtitle(
            ffmpeg_bin,
            request,
            inputs,
            context.video_duration,
        )?),
        CompositionMode::PictureInPicture => {
            Plan::Single(modes::overlay::plan_picture_in_picture(ffmpeg_bin, request, inputs)?)
        }
        CompositionMode::MultiOverlay => {
            Plan::Single(modes::overlay::plan_multi_overlay(ffmpeg_bin, request, inputs)?)
        }
        CompositionMode::SideBySide => Plan::Single(modes::grid::plan_side_by_side(
            ffmpeg_bin,
            request,
            inputs,
            context.max_source_width,
            context.max_source_height,
        )?),
        CompositionMode::SideBySideAudioMix => Plan::Single(modes::grid::plan_side_by_side_audio_mix(
            ffmpeg_bin,
            request,
            inputs,
            context.any_input_has_audio,
            context.max_source_width,
            context.max_source_height,
        )?),
        CompositionMode::Slideshow => {
            Plan::Single(modes::slideshow::plan_slideshow(ffmpeg_bin, request, inputs)?)
        }
        CompositionMode::AudioOnly => {
            Plan::Single(modes::audio::plan_audio_only(ffmpeg_bin, request, inputs)?)
        }
        CompositionMode::Watermark => {
            Plan::Single(modes::watermark::plan_watermark(ffmpeg_bin, request, inputs)?)
        }
        CompositionMode::ColorFilter => {
            Plan::Single(modes::color::plan_color_filter(ffmpeg_bin, request, inputs)?)
        }
    };

    for argv in built.all_argvs() {
        validate::validate_argv(argv).map_err(TaskError::input_validation)?;
    }

    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(mode: CompositionMode, count: usize) -> CompositionRequest {
        CompositionRequest {
            composition_type: mode,
            videos: (0..count)
                .map(|i| CompositionSource {
                    source: format!("in{i}.mp4"),
                    start: None,
                    end: None,
                    gain: Some(1.0),
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
    fn concat_dispatches_to_single_plan() {
        let req = request(CompositionMode::Concat, 2);
        let result = plan("ffmpeg", &req, &inputs(2), &PlanContext::default()).unwrap();
        assert!(matches!(result, Plan::Single(_)));
    }

    #[test]
    fn extract_and_concat_dispatches_to_pipeline() {
        let req = request(CompositionMode::ExtractAndConcat, 2);
        let result = plan("ffmpeg", &req, &inputs(2), &PlanContext::default()).unwrap();
        match result {
            Plan::Pipeline { steps, .. } => assert_eq!(steps.len(), 2),
            Plan::Single(_) => panic!("expected a pipeline"),
        }
    }

    #[test]
    fn side_by_side_audio_mix_honors_context() {
        let req = request(CompositionMode::SideBySideAudioMix, 2);
        let context = PlanContext {
            any_input_has_audio: false,
            ..Default::default()
        };
        let result = plan("ffmpeg", &req, &inputs(2), &context).unwrap();
        let Plan::Single(argv) = result else {
            panic!("expected a single-step plan");
        };
        assert!(argv.iter().any(|a| a.contains("anullsrc")));
    }
}
