use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default face detection model file, relative to the data directory.
const DEFAULT_DETECTOR_MODEL: &str = "models/face_detection_yunet_2023mar.onnx";
/// Default face recognition model file, relative to the data directory.
const DEFAULT_RECOGNITION_MODEL: &str = "models/face_recognition_sface_2021dec.onnx";
/// Default minimum similarity for a face match
const DEFAULT_MIN_SIMILARITY: f32 = 0.6;
/// Default minimum detection confidence for a face to be kept at ingest time
const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.8;
/// Default bound on a whole search request (extraction + scan)
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default size cap for reference images
const DEFAULT_MAX_REFERENCE_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for the face search feature
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaceSearchConfig {
    /// Enable or disable face search globally
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path to the face detection ONNX model (relative paths resolve
    /// against the data directory)
    #[serde(default = "default_detector_model")]
    pub detector_model: String,

    /// Path to the face recognition ONNX model
    #[serde(default = "default_recognition_model")]
    pub recognition_model: String,

    /// Default minimum similarity [0.0, 1.0] when a request supplies none
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,

    /// Minimum detection confidence for a face to be stored at ingest time
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,

    /// Bound on a whole search request in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Size cap for reference images in bytes
    #[serde(default = "default_max_reference_bytes")]
    pub max_reference_bytes: usize,
}

impl Default for FaceSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detector_model: DEFAULT_DETECTOR_MODEL.to_string(),
            recognition_model: DEFAULT_RECOGNITION_MODEL.to_string(),
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_reference_bytes: DEFAULT_MAX_REFERENCE_BYTES,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_detector_model() -> String {
    DEFAULT_DETECTOR_MODEL.to_string()
}

fn default_recognition_model() -> String {
    DEFAULT_RECOGNITION_MODEL.to_string()
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_detection_confidence() -> f32 {
    DEFAULT_DETECTION_CONFIDENCE
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_reference_bytes() -> usize {
    DEFAULT_MAX_REFERENCE_BYTES
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Bearer token granting administrative access to every event.
    /// Empty disables the admin role entirely.
    #[serde(default)]
    pub admin_token: String,

    #[serde(default)]
    pub face_search: FaceSearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Config {
    fn validate(&mut self) {
        if self.listen_addr.is_empty() {
            self.listen_addr = DEFAULT_LISTEN_ADDR.to_string();
        }

        let fs = &self.face_search;
        if !(0.0..=1.0).contains(&fs.default_min_similarity) {
            panic!(
                "face_search.default_min_similarity must be between 0.0 and 1.0, got {}",
                fs.default_min_similarity
            );
        }

        if !(0.0..=1.0).contains(&fs.detection_confidence) {
            panic!(
                "face_search.detection_confidence must be between 0.0 and 1.0, got {}",
                fs.detection_confidence
            );
        }

        if fs.request_timeout_secs == 0 {
            panic!("face_search.request_timeout_secs must be greater than 0");
        }

        if fs.max_reference_bytes == 0 {
            panic!("face_search.max_reference_bytes must be greater than 0");
        }
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write("config.yaml", config_str.as_bytes())?;
        Ok(())
    }

    /// Resolve a model path from the config, joining relative paths onto the
    /// data directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            Path::new(&self.base_path).join(p)
        }
    }
}
