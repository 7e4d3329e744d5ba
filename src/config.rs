//! Application and capture configuration.
//!
//! Everything can be built in code or loaded from JSON. Missing JSON fields
//! take their defaults:
//!
//! ```json
//! {
//!   "title": "clouds",
//!   "width": 1600,
//!   "height": 900,
//!   "capture": { "output": "./renders/sky", "preset": "Uhd4K", "samples": 256 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureFormat, CaptureRequest};
use crate::error::Result;
use crate::params::{ParamVisitor, Params, clamp_all};

/// Configuration for the host application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Directory `` `/shaders/<name>.comp `` paths resolve against.
    pub shader_root: PathBuf,
    /// Poll shader modification times every frame.
    pub hot_reload_polling: bool,
    pub capture: CaptureSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "raylane".to_string(),
            width: 1280,
            height: 720,
            shader_root: PathBuf::from("shaders"),
            hot_reload_polling: true,
            capture: CaptureSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn shader_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shader_root = root.into();
        self
    }

    pub fn hot_reload_polling(mut self, polling: bool) -> Self {
        self.hot_reload_polling = polling;
        self
    }

    pub fn capture(mut self, capture: CaptureSettings) -> Self {
        self.capture = capture;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        clamp_all(&mut config.capture);
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Capture resolutions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPreset {
    Sd,
    Hd,
    Fhd,
    Qhd,
    #[default]
    Uhd4K,
    Uhd8K,
    /// Use [`CaptureSettings::custom_size`].
    Custom,
}

impl ResolutionPreset {
    pub const ALL: [ResolutionPreset; 7] = [
        ResolutionPreset::Sd,
        ResolutionPreset::Hd,
        ResolutionPreset::Fhd,
        ResolutionPreset::Qhd,
        ResolutionPreset::Uhd4K,
        ResolutionPreset::Uhd8K,
        ResolutionPreset::Custom,
    ];

    pub const LABELS: [&'static str; 7] = [
        "SD 720x480",
        "HD 1280x720",
        "FHD 1920x1080",
        "QHD 2560x1440",
        "UHD 4K 3840x2160",
        "UHD 8K 7680x4320",
        "Custom",
    ];

    /// Landscape size, `None` for [`Custom`](Self::Custom).
    pub fn size(self) -> Option<(u32, u32)> {
        match self {
            ResolutionPreset::Sd => Some((720, 480)),
            ResolutionPreset::Hd => Some((1280, 720)),
            ResolutionPreset::Fhd => Some((1920, 1080)),
            ResolutionPreset::Qhd => Some((2560, 1440)),
            ResolutionPreset::Uhd4K => Some((3840, 2160)),
            ResolutionPreset::Uhd8K => Some((7680, 4320)),
            ResolutionPreset::Custom => None,
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }
}

/// Editable offline capture settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub output: PathBuf,
    pub preset: ResolutionPreset,
    pub custom_size: (u32, u32),
    /// Swap width and height.
    pub portrait: bool,
    /// Submissions per capture, 1..=4096.
    pub samples: u32,
    pub format: CaptureFormat,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output: PathBuf::from("./output/0"),
            preset: ResolutionPreset::default(),
            custom_size: (1024, 1024),
            portrait: false,
            samples: 128,
            format: CaptureFormat::default(),
        }
    }
}

impl CaptureSettings {
    pub const MAX_SAMPLES: u32 = 4096;

    pub fn resolution(&self) -> (u32, u32) {
        let (w, h) = self.preset.size().unwrap_or(self.custom_size);
        let (w, h) = (w.max(1), h.max(1));
        if self.portrait { (h, w) } else { (w, h) }
    }

    pub fn request(&self) -> CaptureRequest {
        let (width, height) = self.resolution();
        CaptureRequest::new(
            width,
            height,
            self.samples.clamp(1, Self::MAX_SAMPLES),
            self.output.clone(),
        )
        .with_format(self.format)
    }
}

impl Params for CaptureSettings {
    fn title(&self) -> &'static str {
        "Capture"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        let mut preset = self.preset.index();
        v.choice("resolution", &mut preset, &ResolutionPreset::LABELS);
        self.preset = ResolutionPreset::ALL[preset.min(ResolutionPreset::ALL.len() - 1)];
        v.u32("width", &mut self.custom_size.0, 1..=16384);
        v.u32("height", &mut self.custom_size.1, 1..=16384);
        v.bool("portrait", &mut self.portrait);
        v.u32("samples", &mut self.samples, 1..=Self::MAX_SAMPLES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamValue, set_param};

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new()
            .title("sky")
            .size(800, 600)
            .hot_reload_polling(false);
        assert_eq!(config.title, "sky");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.hot_reload_polling);
        assert_eq!(config.shader_root, PathBuf::from("shaders"));
    }

    #[test]
    fn json_fills_missing_fields_and_clamps() {
        let config = AppConfig::from_json_str(
            r#"{ "width": 1600, "capture": { "preset": "Fhd", "samples": 100000 } }"#,
        )
        .unwrap();
        assert_eq!(config.width, 1600);
        assert_eq!(config.height, 720);
        assert_eq!(config.capture.samples, 4096);
        assert_eq!(config.capture.resolution(), (1920, 1080));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = AppConfig::from_json_str("{ width: }").unwrap_err();
        assert!(matches!(err, crate::error::RenderError::Config(_)));
    }

    #[test]
    fn json_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raylane.json");
        std::fs::write(&path, r#"{ "title": "from file" }"#).unwrap();
        assert_eq!(AppConfig::from_json_file(&path).unwrap().title, "from file");
    }

    #[test]
    fn portrait_swaps_resolution() {
        let settings = CaptureSettings {
            preset: ResolutionPreset::Hd,
            portrait: true,
            ..Default::default()
        };
        let request = settings.request();
        assert_eq!((request.size.width, request.size.height), (720, 1280));
        assert_eq!(request.samples, 128);
        assert_eq!(request.path, PathBuf::from("./output/0"));
    }

    #[test]
    fn custom_preset_uses_custom_size() {
        let mut settings = CaptureSettings::default();
        assert!(set_param(&mut settings, "resolution", ParamValue::Choice(6)));
        assert!(set_param(&mut settings, "width", ParamValue::U32(300)));
        assert!(set_param(&mut settings, "samples", ParamValue::U32(0)));
        assert_eq!(settings.preset, ResolutionPreset::Custom);
        assert_eq!(settings.resolution(), (300, 1024));
        assert_eq!(settings.samples, 1);
    }
}
