use faces_core::FeatureExtractionPolicy;
use std::path::PathBuf;

const DEFAULT_MODEL_DIR: &str = "./models";
const FACE_CONFIG_FILE: &str = "face_detector.toml";
const FACE_WEIGHTS_FILE: &str = "det_10g.onnx";
const LANDMARK_MODEL_FILE: &str = "landmarks_68.onnx";

/// CLI defaults, loaded from environment variables.
pub struct Config {
    /// Directory holding the detector config and both ONNX models.
    pub model_dir: PathBuf,
    /// Feature policy used when `--policy` is not given.
    pub policy: String,
}

impl Config {
    /// Load configuration from `HERA_FACES_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            model_dir: lookup("HERA_FACES_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            policy: lookup("HERA_FACES_POLICY")
                .unwrap_or_else(|| FeatureExtractionPolicy::EYES.to_string()),
        }
    }

    pub fn face_config_path(&self) -> PathBuf {
        self.model_dir.join(FACE_CONFIG_FILE)
    }

    pub fn face_weights_path(&self) -> PathBuf {
        self.model_dir.join(FACE_WEIGHTS_FILE)
    }

    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir.join(LANDMARK_MODEL_FILE)
    }
}
