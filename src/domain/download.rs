use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadQuality {
    Best,
    Worst,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[default]
    #[serde(other)]
    BestFallback,
}

impl DownloadQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadQuality::Best | DownloadQuality::BestFallback => "best",
            DownloadQuality::Worst => "worst",
            DownloadQuality::P1080 => "1080p",
            DownloadQuality::P720 => "720p",
            DownloadQuality::P480 => "480p",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl DownloadFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadFormat::Mp4 => "mp4",
            DownloadFormat::Webm => "webm",
            DownloadFormat::Mkv => "mkv",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub video_url: String,
    #[serde(default)]
    pub quality: DownloadQuality,
    #[serde(default)]
    pub format: DownloadFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub file_path: String,
    pub actual_format: String,
    pub actual_resolution: String,
    pub file_size_bytes: u64,
    pub available_format_count: u32,
}
