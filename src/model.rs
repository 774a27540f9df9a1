//! Emotion classifier wrapper using ONNX Runtime

use ndarray::{Array1, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{Config, InferenceConfig};
use crate::error::{ConfigError, LoadError, PredictError};
use crate::labels::LabelMap;
use crate::preprocess::INPUT_SHAPE;
use crate::runtime;
use crate::storage::{select_latest, BlobInfo, BlobStore, GcsStore};

enum ModelState {
    Loaded(Mutex<Session>),
    /// Loading failed; the reason is kept for callers to inspect
    Unloaded(LoadError),
}

/// Pretrained emotion classifier with its label mapping.
///
/// A wrapper whose model failed to load still constructs; every `predict`
/// on it returns [`PredictError::NotLoaded`].
pub struct EmotionModel {
    model_path: PathBuf,
    labels: LabelMap,
    state: ModelState,
}

impl EmotionModel {
    /// Build the label mapping and load the model, fetching the newest blob
    /// from `bucket` first when one is given.
    pub fn new(
        model_path: impl Into<PathBuf>,
        config: &Config,
        bucket: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let store = GcsStore::from_config(&config.storage);
        Self::with_store(model_path, config, bucket, &store)
    }

    /// Same as [`EmotionModel::new`] with a caller-supplied object store
    pub fn with_store(
        model_path: impl Into<PathBuf>,
        config: &Config,
        bucket: Option<&str>,
        store: &dyn BlobStore,
    ) -> Result<Self, ConfigError> {
        let labels = config.label_map()?;
        let model_path = model_path.into();

        let state = match load_model(&model_path, bucket, store, config) {
            Ok(session) => {
                tracing::info!(path = ?model_path, labels = labels.len(), "Emotion model loaded");
                ModelState::Loaded(Mutex::new(session))
            }
            Err(e) => {
                tracing::warn!(
                    bucket = bucket.unwrap_or("<none>"),
                    path = ?model_path,
                    error = %e,
                    "No model loaded"
                );
                ModelState::Unloaded(e)
            }
        };

        Ok(Self {
            model_path,
            labels,
            state,
        })
    }

    /// Wrap an already-built session
    pub fn from_session(model_path: impl Into<PathBuf>, session: Session, labels: LabelMap) -> Self {
        Self {
            model_path: model_path.into(),
            labels,
            state: ModelState::Loaded(Mutex::new(session)),
        }
    }

    /// Run one forward pass on a preprocessed `(1, 224, 224, 3)` tensor and
    /// return the class probabilities of that single sample.
    pub fn predict(&self, img_array: &Array4<f32>) -> Result<Array1<f32>, PredictError> {
        let session = match &self.state {
            ModelState::Loaded(session) => session,
            ModelState::Unloaded(reason) => return Err(PredictError::NotLoaded(reason.to_string())),
        };

        validate_shape(img_array.shape())?;

        // iter() walks in logical order regardless of the array's memory layout
        let input_data: Vec<f32> = img_array.iter().copied().collect();
        let input_tensor = Tensor::from_array((INPUT_SHAPE, input_data.into_boxed_slice()))
            .map_err(inference_err)?;

        let mut session = session.lock().map_err(|_| PredictError::Poisoned)?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(inference_err)?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| PredictError::Inference("Model produced no output".to_string()))?;

        let (_shape, probs) = output.try_extract_tensor::<f32>().map_err(inference_err)?;

        Ok(Array1::from(probs.to_vec()))
    }

    /// Predict and pair each probability with its label, highest first
    pub fn classify(&self, img_array: &Array4<f32>) -> Result<Vec<(String, f32)>, PredictError> {
        let probs = self.predict(img_array)?;
        Ok(self
            .labels
            .ranked(probs.as_slice().unwrap_or(&[]))
            .into_iter()
            .map(|(label, p)| (label.to_string(), p))
            .collect())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    /// Why the model is not loaded, if it isn't
    pub fn load_error(&self) -> Option<&LoadError> {
        match &self.state {
            ModelState::Loaded(_) => None,
            ModelState::Unloaded(e) => Some(e),
        }
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// Fetch the model (when a bucket is given) and open an inference session.
pub fn load_model(
    model_path: &Path,
    bucket: Option<&str>,
    store: &dyn BlobStore,
    config: &Config,
) -> Result<Session, LoadError> {
    if let Some(bucket) = bucket {
        fetch_latest(store, bucket, &config.storage.prefix, model_path)?;
    }

    if !model_path.exists() {
        return Err(LoadError::MissingModelFile(model_path.to_path_buf()));
    }

    open_session(model_path, &config.inference)
}

/// Download the most recently updated blob under `prefix` to `dest`.
pub fn fetch_latest(
    store: &dyn BlobStore,
    bucket: &str,
    prefix: &str,
    dest: &Path,
) -> Result<BlobInfo, LoadError> {
    let blobs = store.list_blobs(bucket, prefix)?;

    let latest = select_latest(&blobs).ok_or_else(|| LoadError::EmptyBucket {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
    })?;

    tracing::info!(
        store = store.store_name(),
        blob = %latest.name,
        updated = %latest.updated,
        "Fetching latest model"
    );
    store.download(latest, dest)?;

    Ok(latest.clone())
}

fn open_session(model_path: &Path, inference: &InferenceConfig) -> Result<Session, LoadError> {
    runtime::ensure_initialized(inference.dylib_path.as_deref())?;

    let session = Session::builder()
        .map_err(session_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(session_err)?
        .with_intra_threads(inference.intra_threads)
        .map_err(session_err)?
        .commit_from_file(model_path)
        .map_err(session_err)?;

    Ok(session)
}

fn validate_shape(shape: &[usize]) -> Result<(), PredictError> {
    if shape != INPUT_SHAPE {
        return Err(PredictError::ShapeMismatch {
            expected: INPUT_SHAPE.to_vec(),
            actual: shape.to_vec(),
        });
    }
    Ok(())
}

fn session_err(e: impl Display) -> LoadError {
    LoadError::Session(e.to_string())
}

fn inference_err(e: impl Display) -> PredictError {
    PredictError::Inference(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    /// Store with a fixed listing that records what it was asked to download
    /// and then fails, so no session is ever created.
    struct StubStore {
        listing: Result<Vec<BlobInfo>, String>,
        downloaded: Mutex<Vec<String>>,
    }

    impl StubStore {
        fn with_blobs(blobs: Vec<BlobInfo>) -> Self {
            Self {
                listing: Ok(blobs),
                downloaded: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                listing: Err(message.to_string()),
                downloaded: Mutex::new(Vec::new()),
            }
        }
    }

    impl BlobStore for StubStore {
        fn list_blobs(&self, _bucket: &str, _prefix: &str) -> Result<Vec<BlobInfo>, StorageError> {
            self.listing.clone().map_err(StorageError::Transport)
        }

        fn download(&self, blob: &BlobInfo, _dest: &Path) -> Result<(), StorageError> {
            self.downloaded.lock().unwrap().push(blob.name.clone());
            Err(StorageError::Transport("offline".to_string()))
        }

        fn store_name(&self) -> &'static str {
            "stub"
        }
    }

    fn blob(name: &str, secs: i64) -> BlobInfo {
        BlobInfo {
            name: name.to_string(),
            bucket: "fers".to_string(),
            updated: Utc.timestamp_opt(secs, 0).unwrap(),
            size: None,
            md5_hash: None,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.labels_text2num = BTreeMap::from([("happy".to_string(), 0), ("sad".to_string(), 1)]);
        config
    }

    fn input() -> Array4<f32> {
        Array4::zeros(INPUT_SHAPE)
    }

    #[test]
    fn test_fetches_newest_blob() {
        let dir = tempdir().unwrap();
        let store = StubStore::with_blobs(vec![
            blob("models/t2.onnx", 200),
            blob("models/t3.onnx", 300),
            blob("models/t1.onnx", 100),
        ]);

        let model =
            EmotionModel::with_store(dir.path().join("model.onnx"), &config(), Some("fers"), &store)
                .unwrap();

        assert_eq!(*store.downloaded.lock().unwrap(), vec!["models/t3.onnx".to_string()]);
        assert!(matches!(model.load_error(), Some(LoadError::Storage(_))));
    }

    #[test]
    fn test_empty_bucket_leaves_model_unloaded() {
        let dir = tempdir().unwrap();
        let store = StubStore::with_blobs(Vec::new());

        let model =
            EmotionModel::with_store(dir.path().join("model.onnx"), &config(), Some("fers"), &store)
                .unwrap();

        assert!(!model.is_loaded());
        assert!(matches!(
            model.load_error(),
            Some(LoadError::EmptyBucket { bucket, .. }) if bucket == "fers"
        ));
        assert!(matches!(model.predict(&input()), Err(PredictError::NotLoaded(_))));
    }

    #[test]
    fn test_listing_failure_leaves_model_unloaded() {
        let dir = tempdir().unwrap();
        let store = StubStore::failing("connection refused");

        let model =
            EmotionModel::with_store(dir.path().join("model.onnx"), &config(), Some("fers"), &store)
                .unwrap();

        assert!(matches!(
            model.load_error(),
            Some(LoadError::Storage(StorageError::Transport(_)))
        ));
        assert!(model.predict(&input()).is_err());
        assert!(model.classify(&input()).is_err());
    }

    #[test]
    fn test_no_bucket_requires_local_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let store = StubStore::with_blobs(vec![blob("models/t1.onnx", 1)]);

        let model = EmotionModel::with_store(&path, &config(), None, &store).unwrap();

        assert!(store.downloaded.lock().unwrap().is_empty());
        assert!(matches!(model.load_error(), Some(LoadError::MissingModelFile(p)) if *p == path));
        assert_eq!(model.model_path(), path.as_path());
    }

    #[test]
    fn test_labels_built_before_loading() {
        let dir = tempdir().unwrap();
        let store = StubStore::with_blobs(Vec::new());

        let model =
            EmotionModel::with_store(dir.path().join("model.onnx"), &config(), None, &store).unwrap();

        assert_eq!(model.labels().label_of(0), Some("happy"));
        assert_eq!(model.labels().label_of(1), Some("sad"));
    }

    #[test]
    fn test_invalid_labels_fail_construction() {
        let dir = tempdir().unwrap();
        let store = StubStore::with_blobs(Vec::new());
        let mut config = config();
        config.labels_text2num.insert("joyful".to_string(), 0);

        let result = EmotionModel::with_store(dir.path().join("model.onnx"), &config, None, &store);
        assert!(matches!(result, Err(ConfigError::DuplicateLabelIndex { .. })));
    }

    #[test]
    fn test_missing_runtime_library_leaves_model_unloaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"not a model").unwrap();
        let store = StubStore::with_blobs(Vec::new());
        let mut config = config();
        config.inference.dylib_path = Some(PathBuf::from("/nonexistent/libonnxruntime.so"));

        let model = EmotionModel::with_store(&path, &config, None, &store).unwrap();

        assert!(!model.is_loaded());
        if std::env::var_os("ORT_DYLIB_PATH").is_none() {
            assert!(matches!(model.load_error(), Some(LoadError::Runtime(_))));
        }
        assert!(matches!(model.predict(&input()), Err(PredictError::NotLoaded(_))));
    }

    #[test]
    fn test_validate_shape() {
        assert!(validate_shape(&INPUT_SHAPE).is_ok());
        assert!(matches!(
            validate_shape(&[1, 112, 112, 3]),
            Err(PredictError::ShapeMismatch { .. })
        ));
    }

    fn fixture_model() -> Option<EmotionModel> {
        // Needs the ONNX Runtime shared library
        std::env::var_os("ORT_DYLIB_PATH")?;

        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/emotion_tiny.onnx");
        let store = StubStore::with_blobs(Vec::new());
        let model = EmotionModel::with_store(path, &config(), None, &store).unwrap();
        assert!(model.is_loaded(), "{:?}", model.load_error());
        Some(model)
    }

    fn face_like_input() -> Array4<f32> {
        Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
            (y as f32 - 112.0) * 0.5 + (x % 7) as f32 + c as f32 * 20.0 - 30.0
        })
    }

    #[test]
    fn test_predict_returns_one_probability_per_label() {
        let Some(model) = fixture_model() else {
            return;
        };

        let probs = model.predict(&face_like_input()).unwrap();

        assert_eq!(probs.len(), model.labels().len());
        assert!((probs.sum() - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_same_model_file_predicts_identically() {
        let (Some(first), Some(second)) = (fixture_model(), fixture_model()) else {
            return;
        };
        let input = face_like_input();

        assert_eq!(first.predict(&input).unwrap(), second.predict(&input).unwrap());
    }

    #[test]
    fn test_classify_ranks_labels() {
        let Some(model) = fixture_model() else {
            return;
        };

        let ranked = model.classify(&face_like_input()).unwrap();

        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].1 >= ranked[1].1);
        let mut names: Vec<_> = ranked.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["happy", "sad"]);
    }

    #[test]
    fn test_loaded_model_still_checks_shape() {
        let Some(model) = fixture_model() else {
            return;
        };

        let wrong = Array4::zeros([1, 112, 112, 3]);
        assert!(matches!(model.predict(&wrong), Err(PredictError::ShapeMismatch { .. })));
    }
}
