//! Error types for each stage of the pipeline.
//!
//! Preprocessing and prediction errors propagate to the caller. Load errors
//! are captured by [`crate::EmotionModel`] and kept as the reason the model
//! is unavailable.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Label mapping is empty")]
    EmptyLabels,

    #[error("Labels {first:?} and {second:?} both map to index {index}")]
    DuplicateLabelIndex {
        index: usize,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to read image {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Expected 3 colour channels, got {0}")]
    Channels(usize),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Bucket {0} not found")]
    BucketNotFound(String),

    #[error("Object {name} not found in bucket {bucket}")]
    ObjectNotFound { bucket: String, name: String },

    #[error("Storage request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Storage request failed: {0}")]
    Transport(String),

    #[error("Storage authentication failed: {0}")]
    Auth(String),

    #[error("Failed to parse storage response: {0}")]
    Parse(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No model found in bucket {bucket} under {prefix}")]
    EmptyBucket { bucket: String, prefix: String },

    #[error("Model file not found at {0:?}")]
    MissingModelFile(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Inference runtime unavailable: {0}")]
    Runtime(String),

    #[error("Failed to create inference session: {0}")]
    Session(String),
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Model is not loaded: {0}")]
    NotLoaded(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Inference session lock poisoned")]
    Poisoned,
}
