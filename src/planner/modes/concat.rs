use std::path::{Path, PathBuf};

use crate::domain::CompositionRequest;
use crate::error::TaskError;

use super::PlanInputs;

/// `concat` (§4.5): concatenates inputs in order. Re-encodes only if inputs
/// disagree on resolution/fps/codec (determined by the caller via
/// `probed_uniform`); otherwise emits the concat-demuxer form with an
/// indirection list file, which stream-copies without a re-encode.
pub fn plan_concat(
    ffmpeg_bin: &str,
    inputs: &PlanInputs,
    probed_uniform: bool,
) -> Result<Vec<String>, TaskError> {
    if inputs.sources.len() < 2 {
        return Err(TaskError::input_validation("concat requires at least 2 sources"));
    }

    if probed_uniform {
        let list_path = write_concat_list(&inputs.scratch_dir, &inputs.sources)?;
        Ok(vec![
            ffmpeg_bin.to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_path.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            inputs.output_path.to_string_lossy().to_string(),
        ])
    } else {
        let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
        for source in &inputs.sources {
            argv.push("-i".to_string());
            argv.push(source.to_string_lossy().to_string());
        }

        let mut filter = String::new();
        for i in 0..inputs.sources.len() {
            filter.push_str(&format!("[{i}:v:0][{i}:a:0]"));
        }
        filter.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", inputs.sources.len()));

        argv.push("-filter_complex".to_string());
        argv.push(filter);
        argv.push("-map".to_string());
        argv.push("[outv]".to_string());
        argv.push("-map".to_string());
        argv.push("[outa]".to_string());
        argv.push("-c:v".to_string());
        argv.push("libx264".to_string());
        argv.push("-crf".to_string());
        argv.push("20".to_string());
        argv.push("-preset".to_string());
        argv.push("medium".to_string());
        argv.push(inputs.output_path.to_string_lossy().to_string());
        Ok(argv)
    }
}

/// `extract_and_concat` (§4.5): cuts each (source, [start, end]) losslessly
/// with codec-copy, writing per-source clips into the scratch dir, then
/// delegates to `plan_concat`'s demuxer path.
pub fn plan_extract_and_concat(
    ffmpeg_bin: &str,
    request: &CompositionRequest,
    inputs: &PlanInputs,
) -> Result<(Vec<Vec<String>>, Vec<String>), TaskError> {
    if inputs.sources.len() != request.videos.len() {
        return Err(TaskError::processing(
            "resolved source count must match request video count",
        ));
    }

    let mut extraction_commands = Vec::new();
    let mut clips = Vec::new();

    for (index, (source, spec)) in inputs.sources.iter().zip(&request.videos).enumerate() {
        let clip_path = inputs.scratch_dir.join(format!("clip-{index}.mp4"));
        let mut argv = vec![ffmpeg_bin.to_string(), "-y".to_string()];
        if let Some(start) = spec.start {
            argv.push("-ss".to_string());
            argv.push(format!("{start}"));
        }
        argv.push("-i".to_string());
        argv.push(source.to_string_lossy().to_string());
        if let Some(end) = spec.end {
            let duration = spec.start.map(|s| (end - s).max(0.0)).unwrap_or(end);
            argv.push("-t".to_string());
            argv.push(format!("{duration}"));
        }
        argv.push("-c".to_string());
        argv.push("copy".to_string());
        argv.push(clip_path.to_string_lossy().to_string());

        extraction_commands.push(argv);
        clips.push(clip_path);
    }

    let list_path = write_concat_list(&inputs.scratch_dir, &clips)?;
    let final_argv = vec![
        ffmpeg_bin.to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        inputs.output_path.to_string_lossy().to_string(),
    ];

    Ok((extraction_commands, final_argv))
}

fn write_concat_list(scratch_dir: &Path, sources: &[PathBuf]) -> Result<PathBuf, TaskError> {
    let mut contents = String::new();
    for source in sources {
        let escaped = source.to_string_lossy().replace('\'', "'\\''");
        contents.push_str(&format!("file '{escaped}'\n"));
    }
    let list_path = scratch_dir.join("concat_list.txt");
    std::fs::write(&list_path, contents)
        .map_err(|err| TaskError::filesystem(format!("failed to write concat list: {err}")))?;
    Ok(list_path)
}
