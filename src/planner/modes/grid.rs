use crate::domain::CompositionRequest;
use crate::error::TaskError;
use crate::planner::placement::{round_down_even, scale_pad_filter};

use super::PlanInputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridLayout {
    Horizontal,
    Vertical,
    Grid2x2,
    OneAboveTwo,
}

fn parse_layout(layout: Option<&str>, count: usize) -> GridLayout {
    match layout {
        Some("vertical") => GridLayout::Vertical,
        Some("grid") | Some("2x2") => GridLayout::Grid2x2,
        Some("one_above_two") => GridLayout::OneAboveTwo,
        Some("horizontal") => GridLayout::Horizontal,
        _ => {
            if count == 3 {
                GridLayout::OneAboveTwo
            } else if count == 4 {
                GridLayout::Grid2x2
            } else {
                GridLayout::Horizontal
            }
        }
    }
}

/// Columns/rows each layout arranges its cells into, used to derive a cell
/// size from the sources' own resolution instead of a fixed constant.
fn grid_dimensions(layout: GridLayout, count: usize) -> (u32, u32) {
    match layout {
        GridLayout::Horizontal => (count as u32, 1),
        GridLayout::Vertical => (1, count as u32),
        GridLayout::Grid2x2 => (2, 2),
        GridLayout::OneAboveTwo => (2, 2),
    }
}

/// Derives the per-cell size from the max width/height across sources
/// (`examples/original_source/test_files/debug_aspect_ratio.py`'s
/// `max_width`/`max_height` base, divided by the layout's column/row count
/// and rounded to even), rather than a fixed resolution, so a grid of 4K
/// sources isn't downsampled to a constant.
fn cell_size(layout: GridLayout, count: usize, max_width: u32, max_height: u32) -> (u32, u32) {
    let (columns, rows) = grid_dimensions(layout, count);
    let w = round_down_even((max_width / columns.max(1)).max(2));
    let h = round_down_even((max_height / rows.max(1)).max(2));
    (w, h)
}

fn layout_overlay_offsets(layout: GridLayout, count: usize, cell_w: u32, cell_h: u32) -> Vec<(u32, u32)> {
    match layout {
        GridLayout::Horizontal => (0..count).map(|i| (i as u32 * cell_w, 0)).collect(),
        GridLayout::Vertical => (0..count).map(|i| (0, i as u32 * cell_h)).collect(),
        GridLayout::Grid2x2 => (0..count)
            .map(|i| ((i as u32 % 2) * cell_w, (i as u32 / 2) * cell_h))
            .collect(),
        GridLayout::OneAboveTwo => vec![(cell_w / 2, 0), (0, cell_h), (cell_w, cell_h)],
    }
}

fn canvas_size(layout: GridLayout, count: usize, cell_w: u32, cell_h: u32) -> (u32, u32) {
    match layout {
        GridLayout::Horizontal => (cell_w * count as u32, cell_h),
        GridLayout::Vertical => (cell_w, cell_h * count as u32),
        GridLayout::Grid2x2 => (cell_w * 2, cell_h * 2),
        GridLayout::OneAboveTwo => (cell_w * 2, cell_h * 2),
    }
}

/// Builds the shared cell-scaling + canvas-overlay filter graph used by both
/// `side_by_side` and `side_by_side_audio_mix` (§4.5).
fn build_video_filter(layout: GridLayout, count: usize, max_width: u32, max_height: u32) -> (String, String) {
    let (cell_w, cell_h) = cell_size(layout, count, max_width, max_height);
    let (canvas_w, canvas_h) = canvas_size(layout, count, cell_w, cell_h);
    let offsets = layout_overlay_offsets(layout, count, cell_w, cell_h);

    let mut parts = Vec::new();
    parts.push(format!(
        "color=c=black:s={canvas_w}x{canvas_h}[canvas0]"
    ));

    for i in 0..count {
        parts.push(scale_pad_filter(&format!("{i}:v"), &format!("cell{i}"), cell_w, cell_h));
    }

    let mut canvas_label = "canvas0".to_string();
    for (i, (x, y)) in offsets.iter().enumerate() {
        let next_label = if i + 1 == count {
            "outv".to_string()
        } else {
            format!("canvas{}", i + 1)
        };
        parts.push(format!(
            "[{canvas_label}][cell{i}]overlay={x}:{y}[{next_label}]"
        ));
        canvas_label = next_label;
    }

    (parts.join(";"), "outv".to_string())
}

/// `side_by_side` (§4.5): lays out 2-4 sources into a horizontal, vertical,
/// 2x2, or one-above-two layout, each cell aspect-preserved via
/// scale+pad+setsar. Audio is taken from the first source with audio.
pub fn plan_side_by_side(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
    max_source_width: u32,
    max_source_height: u32,
) -> Result<Vec<String>, TaskError> {
    if !(2..=4).contains(&inputs.sources.len()) {
        return Err(TaskError::input_validation("side_by_side accepts 2-4 sources"));
    }

    let layout = parse_layout(request.layout.as_deref(), inputs.sources.len());
    let (video_filter, out_label) =
        build_video_filter(layout, inputs.sources.len(), max_source_width, max_source_height);

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }
    argv.push("-filter_complex".to_string());
    argv.push(video_filter);
    argv.push("-map".to_string());
    argv.push(format!("[{out_label}]"));
    argv.push("-map".to_string());
    argv.push("0:a?".to_string());
    argv.push("-c:v".to_string());
    argv.push("libx264".to_string());
    argv.push("-crf".to_string());
    argv.push("20".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

/// `side_by_side_audio_mix` (§4.5): same layout, sound mixed with per-source
/// gain in [0, 2]. If no input has audio, a silent source is synthesized and
/// mapped uniformly regardless of layout (§9's explicit resolution).
pub fn plan_side_by_side_audio_mix(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
    any_input_has_audio: bool,
    max_source_width: u32,
    max_source_height: u32,
) -> Result<Vec<String>, TaskError> {
    if !(2..=4).contains(&inputs.sources.len()) {
        return Err(TaskError::input_validation(
            "side_by_side_audio_mix accepts 2-4 sources",
        ));
    }

    let layout = parse_layout(request.layout.as_deref(), inputs.sources.len());
    let (video_filter, out_label) =
        build_video_filter(layout, inputs.sources.len(), max_source_width, max_source_height);

    let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
    for source in &inputs.sources {
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
    }

    let silent_input_index = inputs.sources.len();
    if !any_input_has_audio {
        argv.push("-f".to_string());
        argv.push("lavfi".to_string());
        argv.push("-i".to_string());
        argv.push("anullsrc=channel_layout=stereo:sample_rate=48000".to_string());
    }

    let mut audio_parts = Vec::new();
    let mut mix_inputs = Vec::new();
    for (i, source) in request.videos.iter().enumerate() {
        let gain = source.gain.unwrap_or(1.0).clamp(0.0, 2.0);
        audio_parts.push(format!("[{i}:a]volume={gain}[a{i}]"));
        mix_inputs.push(format!("[a{i}]"));
    }
    if !any_input_has_audio {
        audio_parts.push(format!("[{silent_input_index}:a]anull[a{silent_input_index}]"));
        mix_inputs.push(format!("[a{silent_input_index}]"));
    }
    audio_parts.push(format!(
        "{}amix=inputs={}:duration=longest[outa]",
        mix_inputs.join(""),
        mix_inputs.len()
    ));

    let full_filter = format!("{video_filter};{}", audio_parts.join(";"));

    argv.push("-filter_complex".to_string());
    argv.push(full_filter);
    argv.push("-map".to_string());
    argv.push(format!("[{out_label}]"));
    argv.push("-map".to_string());
    argv.push("[outa]".to_string());
    argv.push("-c:v".to_string());
    argv.push("libx264".to_string());
    argv.push("-crf".to_string());
    argv.push("20".to_string());
    argv.push(inputs.output_path.to_string_lossy().to_string());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompositionMode, CompositionSource, OutputFormat};
    use std::path::PathBuf;

    fn request(count: usize, layout: Option<&str>) -> CompositionRequest {
        CompositionRequest {
            composition_type: CompositionMode::SideBySide,
            videos: (0..count)
                .map(|i| CompositionSource {
                    source: format!("in{i}.mp4"),
                    start: None,
                    end: None,
                    gain: Some(1.0),
                    z_order: None,
                })
                .collect(),
            audio_file: None,
            subtitle_file: None,
            layout: layout.map(str::to_string),
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
    fn rejects_out_of_range_source_counts() {
        let req = request(5, None);
        assert!(plan_side_by_side("ffmpeg", &req, &inputs(5), 1920, 1080).is_err());
    }

    #[test]
    fn three_sources_default_to_one_above_two() {
        assert_eq!(parse_layout(None, 3), GridLayout::OneAboveTwo);
    }

    #[test]
    fn audio_mix_synthesizes_silence_when_no_audio_present() {
        let req = request(2, Some("horizontal"));
        let argv = plan_side_by_side_audio_mix("ffmpeg", &req, &inputs(2), false, 1920, 1080).unwrap();
        assert!(argv.iter().any(|a| a.contains("anullsrc")));
    }

    #[test]
    fn cell_size_scales_with_max_source_dimensions() {
        let (w, h) = cell_size(GridLayout::Horizontal, 2, 3840, 2160);
        assert_eq!((w, h), (1920, 2160));

        let (w, h) = cell_size(GridLayout::Grid2x2, 4, 1920, 1080);
        assert_eq!((w, h), (960, 540));
    }
}
