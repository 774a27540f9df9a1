//! Facial emotion recognition inference.
//!
//! Loads a pretrained ONNX emotion classifier (optionally fetching the newest
//! published model from object storage), turns images into the tensor layout
//! the classifier expects, and returns per-emotion probabilities.

pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod labels;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod runtime;
pub mod storage;

pub use config::Config;
pub use error::{ConfigError, LoadError, PredictError, PreprocessError, StorageError};
pub use labels::LabelMap;
pub use model::EmotionModel;
pub use preprocess::{preprocess, preprocess_file, preprocess_image};
