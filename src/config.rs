//! Configuration file support for mood-mirror.
//!
//! The configuration is read from the file named by `MOOD_MIRROR_CONFIG`,
//! or `mood-mirror.toml` in the working directory. Every key is optional;
//! a missing file means defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MoodMirrorError, Result};
use crate::models::Color;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV: &str = "MOOD_MIRROR_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mood-mirror.toml";

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model artifact locations.
    pub models: ModelsConfig,
    /// Capture device settings.
    pub camera: CameraConfig,
    /// Detection loop settings.
    pub detection: DetectionConfig,
    /// Label, colour and overlay settings.
    pub presentation: PresentationConfig,
}

/// Model artifact configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Base directory all artifacts are resolved against.
    pub dir: PathBuf,
    /// OpenCV Haar cascade used for face detection.
    pub detector: String,
    /// ONNX 68-point landmark regressor.
    pub landmarks: String,
    /// ONNX expression classifier.
    pub expressions: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("assets/models"),
            detector: "haarcascade_frontalface_default.xml".to_string(),
            landmarks: "face_landmarks_68.onnx".to_string(),
            expressions: "emotion.onnx".to_string(),
        }
    }
}

impl ModelsConfig {
    pub fn detector_path(&self) -> PathBuf {
        self.dir.join(&self.detector)
    }

    pub fn landmarks_path(&self) -> PathBuf {
        self.dir.join(&self.landmarks)
    }

    pub fn expressions_path(&self) -> PathBuf {
        self.dir.join(&self.expressions)
    }
}

/// Capture device configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index tried first; the next index is the fallback.
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Which late inference results are still allowed to reach the screen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Apply only the result of the most recently issued inference.
    #[default]
    LatestIssued,
    /// Apply any result newer than the last one applied.
    Monotonic,
}

/// Detection loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    pub stale_policy: StalePolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            stale_policy: StalePolicy::default(),
        }
    }
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Presentation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Label shown while no face is visible.
    pub no_face_label: String,
    /// Background used for unmapped expressions and for "no face".
    pub neutral_color: String,
    /// Background colour transition in milliseconds.
    pub transition_ms: u64,
    /// Extra or replacement translations, keyed by model label.
    pub labels: BTreeMap<String, String>,
    /// Extra or replacement colours (`#rrggbb`), keyed by model label.
    pub colors: BTreeMap<String, String>,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            no_face_label: "no face detected".to_string(),
            neutral_color: "#808080".to_string(),
            transition_ms: 1000,
            labels: BTreeMap::new(),
            colors: BTreeMap::new(),
        }
    }
}

impl PresentationConfig {
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

impl AppConfig {
    /// Load configuration from `MOOD_MIRROR_CONFIG` or `mood-mirror.toml`.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is
    /// an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        info!("Loading config: {}", path.display());
        Self::from_file(&path)
    }

    /// Parse and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if self.detection.interval_ms == 0 {
            return Err(MoodMirrorError::Config(
                "detection.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(MoodMirrorError::Config(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.fps == 0 {
            return Err(MoodMirrorError::Config(
                "camera.fps must be greater than 0".to_string(),
            ));
        }
        if Color::from_hex(&self.presentation.neutral_color).is_none() {
            return Err(MoodMirrorError::Config(format!(
                "presentation.neutral_color must be #rrggbb, got '{}'",
                self.presentation.neutral_color
            )));
        }
        for (label, hex) in &self.presentation.colors {
            if Color::from_hex(hex).is_none() {
                return Err(MoodMirrorError::Config(format!(
                    "presentation.colors.{label} must be #rrggbb, got '{hex}'"
                )));
            }
        }
        Ok(())
    }
}
