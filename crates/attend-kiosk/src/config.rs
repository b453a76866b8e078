use attend_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use attend_core::session::{
    DEFAULT_DETECT_DOWNSCALE, DEFAULT_FRAME_SKIP, DEFAULT_MATCH_THRESHOLD,
};
use attend_core::{EnrollmentSource, SessionSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Kiosk configuration: defaults, then an optional TOML file, then
/// `ATTEND_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Enrollment manifest CSV (`Name, ID, Major, ImageFile`).
    pub manifest: PathBuf,
    /// Directory holding enrollment and profile images.
    pub images_dir: PathBuf,
    /// Attendance ledger CSV.
    pub ledger: PathBuf,
    /// RGBA icon shown while a confirmation is on screen.
    pub icon: PathBuf,
    /// TrueType/OpenType font for the on-screen labels.
    pub font: PathBuf,
    /// Euclidean distance below which a face counts as a match.
    pub match_threshold: f32,
    /// Seconds the confirmation stays on screen.
    pub cooldown_secs: u64,
    /// Run detection on one out of every `frame_skip` scanning frames.
    pub frame_skip: u32,
    /// Detection runs on the frame shrunk by this factor.
    pub detect_downscale: u32,
    /// Minimum SCRFD score for a detection.
    pub detector_confidence: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: attend_core::default_model_dir(),
            manifest: PathBuf::from("student_data.csv"),
            images_dir: PathBuf::from("Student_Images"),
            ledger: PathBuf::from("attendance_log.csv"),
            icon: PathBuf::from("checkmark.png"),
            font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cooldown_secs: 5,
            frame_skip: DEFAULT_FRAME_SKIP,
            detect_downscale: DEFAULT_DETECT_DOWNSCALE,
            detector_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl Config {
    /// Load from `path` (or `ATTEND_CONFIG` when `None`), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var("ATTEND_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ATTEND_*` variables resolved through `var`.
    /// Unparseable values keep the current setting.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ATTEND_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        let path = |key: &str, current: &mut PathBuf| {
            if let Some(v) = var(key) {
                *current = PathBuf::from(v);
            }
        };
        path("ATTEND_MODEL_DIR", &mut self.model_dir);
        path("ATTEND_MANIFEST", &mut self.manifest);
        path("ATTEND_IMAGES_DIR", &mut self.images_dir);
        path("ATTEND_LEDGER", &mut self.ledger);
        path("ATTEND_ICON", &mut self.icon);
        path("ATTEND_FONT", &mut self.font);

        self.match_threshold = env_f32(&var, "ATTEND_MATCH_THRESHOLD", self.match_threshold);
        self.cooldown_secs = env_u64(&var, "ATTEND_COOLDOWN_SECS", self.cooldown_secs);
        self.frame_skip = env_u32(&var, "ATTEND_FRAME_SKIP", self.frame_skip);
        self.detect_downscale = env_u32(&var, "ATTEND_DETECT_DOWNSCALE", self.detect_downscale);
        self.detector_confidence =
            env_f32(&var, "ATTEND_DETECTOR_CONFIDENCE", self.detector_confidence);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if self.frame_skip == 0 {
            return Err(ConfigError::Invalid("frame_skip must be at least 1".into()));
        }
        if self.detect_downscale == 0 {
            return Err(ConfigError::Invalid("detect_downscale must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector_confidence must be within [0, 1], got {}",
                self.detector_confidence
            )));
        }
        Ok(())
    }

    pub fn enrollment_source(&self) -> EnrollmentSource {
        EnrollmentSource {
            manifest: self.manifest.clone(),
            images_dir: self.images_dir.clone(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            match_threshold: self.match_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            frame_skip: self.frame_skip,
            detect_downscale: self.detect_downscale,
        }
    }
}

fn env_f32(var: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(var: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
