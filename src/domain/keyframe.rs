use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyframeMethod {
    Interval,
    Timestamps,
    Keyframes,
    Count,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

fn default_interval() -> f64 {
    30.0
}

fn default_count() -> u32 {
    10
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_quality() -> u32 {
    85
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeRequest {
    pub video_url: String,
    pub method: KeyframeMethod,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default)]
    pub timestamps: Vec<f64>,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

impl KeyframeRequest {
    pub const MIN_DIMENSION: u32 = 64;
    pub const MAX_DIMENSION: u32 = 4096;

    pub fn validate(&self) -> Result<(), String> {
        if self.width < Self::MIN_DIMENSION
            || self.width > Self::MAX_DIMENSION
            || self.height < Self::MIN_DIMENSION
            || self.height > Self::MAX_DIMENSION
        {
            return Err(format!(
                "width/height must be within {}..={} pixels",
                Self::MIN_DIMENSION,
                Self::MAX_DIMENSION
            ));
        }
        if self.quality < 1 || self.quality > 100 {
            return Err("quality must be within 1..=100".to_string());
        }
        if self.method == KeyframeMethod::Timestamps && self.timestamps.is_empty() {
            return Err("timestamps method requires at least one timestamp".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeFrame {
    pub timestamp: f64,
    pub filename: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeResult {
    pub title: String,
    pub duration: f64,
    pub total_frames: u32,
    pub frames: Vec<KeyframeFrame>,
}
