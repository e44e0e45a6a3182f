use std::path::PathBuf;

pub mod audio;
pub mod av_subtitle;
pub mod color;
pub mod concat;
pub mod grid;
pub mod overlay;
pub mod slideshow;
pub mod watermark;

/// Resolved, local-filesystem inputs for a single plan call — any remote
/// `source`/`audio_file`/`subtitle_file` URL has already been fetched by the
/// download executor (§4.6) by the time a mode function sees this.
#[derive(Debug, Clone)]
pub struct PlanInputs {
    pub sources: Vec<PathBuf>,
    pub audio: Option<PathBuf>,
    pub subtitle: Option<PathBuf>,
    pub output_path: PathBuf,
    pub scratch_dir: PathBuf,
}
