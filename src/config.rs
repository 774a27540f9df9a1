use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::labels::LabelMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local path the model is loaded from (and downloaded to).
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Object storage bucket holding trained models. When unset the model is
    /// loaded from `model_path` directly.
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Emotion name to model output index.
    #[serde(default = "default_labels")]
    pub labels_text2num: BTreeMap<String, usize>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_storage_prefix")]
    pub prefix: String,

    /// OAuth2 bearer token. Falls back to `GOOGLE_OAUTH_ACCESS_TOKEN`, then
    /// the instance metadata server.
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Verify downloaded blobs against the MD5 hash reported by the store.
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_storage_prefix() -> String {
    "models/".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_verify_checksum() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_storage_endpoint(),
            prefix: default_storage_prefix(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
            verify_checksum: default_verify_checksum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// ONNX Runtime shared library. Falls back to `ORT_DYLIB_PATH`, then the
    /// platform default name.
    #[serde(default)]
    pub dylib_path: Option<PathBuf>,
}

fn default_intra_threads() -> usize {
    4
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            intra_threads: default_intra_threads(),
            dylib_path: None,
        }
    }
}

fn default_labels() -> BTreeMap<String, usize> {
    // FER-2013 class order
    [
        ("angry", 0),
        ("disgust", 1),
        ("fear", 2),
        ("happy", 3),
        ("neutral", 4),
        ("sad", 5),
        ("surprise", 6),
    ]
    .into_iter()
    .map(|(name, index)| (name.to_string(), index))
    .collect()
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fers")
        .join("models")
        .join("model.onnx")
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "bmp".to_string(),
        "gif".to_string(),
        "webp".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            bucket: None,
            image_extensions: default_image_extensions(),
            labels_text2num: default_labels(),
            storage: StorageConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Config {
    /// Load from `FERS_CONFIG` or the default location, writing a default
    /// config file if none exists yet.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var_os("FERS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)?;

        Ok(())
    }

    /// Validated label mapping with its inverse.
    pub fn label_map(&self) -> Result<LabelMap, ConfigError> {
        LabelMap::new(self.labels_text2num.clone())
    }

    /// Bucket name, treating an empty string the same as unset.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref().filter(|b| !b.is_empty())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fers")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
