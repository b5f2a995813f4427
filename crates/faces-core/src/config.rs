//! Face detector configuration, read from the detector config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_INPUT_SIZE: usize = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_INTRA_THREADS: usize = 2;
const DEFAULT_LANDMARK_CROP_SCALE: f32 = 1.2;

/// Largest SCRFD stride; the input side must be a multiple of it.
const MAX_STRIDE: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("detector config not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid detector config: {0}")]
    Invalid(String),
}

/// Tuning for face detection and landmark cropping.
///
/// Every key is optional; an empty file yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Side length of the square SCRFD input, in pixels.
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Face box expansion applied before cropping for the landmark model.
    pub landmark_crop_scale: f32,
    /// Keep at most this many faces (highest score first).
    pub max_faces: Option<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            intra_threads: DEFAULT_INTRA_THREADS,
            landmark_crop_scale: DEFAULT_LANDMARK_CROP_SCALE,
            max_faces: None,
        }
    }
}

impl DetectorConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), ?config, "loaded detector config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_size == 0 || self.input_size % MAX_STRIDE != 0 {
            return Err(ConfigError::Invalid(format!(
                "input_size must be a positive multiple of {MAX_STRIDE}, got {}",
                self.input_size
            )));
        }
        for (key, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        if self.landmark_crop_scale.is_nan() || self.landmark_crop_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "landmark_crop_scale must be positive, got {}",
                self.landmark_crop_scale
            )));
        }
        Ok(())
    }
}
