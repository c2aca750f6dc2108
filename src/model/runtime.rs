//! Model Runtime
//!
//! Owns the loaded classifier for the lifetime of the process and exposes a
//! pure `score(tensor) -> probabilities` operation. The [`Classifier`] trait is
//! the seam between the service and the network, so tests can swap in fixed
//! probability tables.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use tracing::{debug, info};

use crate::backend::{backend_name, default_device, InferenceBackend};
use crate::inference::preprocess::InputTensor;
use crate::model::cnn::{LeafClassifier, LeafClassifierConfig, INPUT_CHANNELS};
use crate::utils::error::{CropCareError, Result};

/// File extension `CompactRecorder` reads and writes
pub const RECORD_EXTENSION: &str = "mpk";

/// Anything that maps an NHWC input tensor to class probabilities
pub trait Classifier: Send + Sync {
    /// Length of every probability vector this classifier returns
    fn num_classes(&self) -> usize;

    /// `[1, size, size, 3]` shape expected by [`Classifier::score`]
    fn input_shape(&self) -> [usize; 4];

    /// Probabilities for a single image; must not mutate shared state
    fn score(&self, input: &InputTensor) -> Result<Vec<f32>>;

    /// Short description for logs and the model info endpoint
    fn describe(&self) -> String {
        format!("{} classes", self.num_classes())
    }
}

/// A [`LeafClassifier`] restored from a Burn record
pub struct BurnClassifier<B: Backend> {
    // Only held while cloning the module handle; the forward pass runs on the
    // clone without the lock
    model: Mutex<LeafClassifier<B>>,
    device: B::Device,
    config: LeafClassifierConfig,
}

impl<B> BurnClassifier<B>
where
    B: Backend,
    LeafClassifier<B>: Send,
    B::Device: Send + Sync,
{
    /// Wrap an in-memory model
    pub fn new(model: LeafClassifier<B>, config: LeafClassifierConfig, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            device,
            config,
        }
    }

    /// Restore weights from a `CompactRecorder` file
    ///
    /// The architecture comes from `config`; a record written for a different
    /// architecture is rejected by the warm-up pass.
    pub fn load(path: &Path, config: &LeafClassifierConfig, device: B::Device) -> Result<Self> {
        let record_path = record_path(path);
        if !record_path.is_file() {
            return Err(CropCareError::ModelUnavailable(format!(
                "classifier artifact not found at {}",
                record_path.display()
            )));
        }

        let model = LeafClassifier::<B>::new(config, &device)
            .load_file(record_path.clone(), &CompactRecorder::new(), &device)
            .map_err(|e| {
                CropCareError::ModelUnavailable(format!(
                    "failed to read {}: {:?}",
                    record_path.display(),
                    e
                ))
            })?;

        let classifier = Self::new(model, config.clone(), device);
        classifier.warm_up()?;
        Ok(classifier)
    }

    /// Run one forward pass on a blank image to prove the weights fit the
    /// configured architecture
    fn warm_up(&self) -> Result<()> {
        let shape = self.input_shape();
        let blank = InputTensor::new(vec![0.0; shape.iter().product()], shape)?;

        let probabilities = catch_unwind(AssertUnwindSafe(|| self.score(&blank)))
            .map_err(|_| {
                CropCareError::ModelUnavailable(
                    "classifier weights do not match the configured architecture".to_string(),
                )
            })?
            .map_err(|e| CropCareError::ModelUnavailable(e.to_string()))?;

        if probabilities.len() != self.config.num_classes {
            return Err(CropCareError::ModelUnavailable(format!(
                "classifier produces {} classes but {} are configured",
                probabilities.len(),
                self.config.num_classes
            )));
        }

        debug!("Warm-up produced {} probabilities", probabilities.len());
        Ok(())
    }

    fn handle(&self) -> Result<LeafClassifier<B>> {
        self.model
            .lock()
            .map(|model| model.clone())
            .map_err(|_| CropCareError::Inference("classifier handle is poisoned".to_string()))
    }
}

impl<B> Classifier for BurnClassifier<B>
where
    B: Backend,
    LeafClassifier<B>: Send,
    B::Device: Send + Sync,
{
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn input_shape(&self) -> [usize; 4] {
        let size = self.config.input_size;
        [1, size, size, INPUT_CHANNELS]
    }

    fn score(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let model = self.handle()?;

        let data = TensorData::new(input.as_slice().to_vec(), input.shape());
        let tensor = Tensor::<B, 4>::from_data(data, &self.device);

        model
            .forward_nhwc_softmax(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| CropCareError::Inference(format!("failed to read probabilities: {:?}", e)))
    }

    fn describe(&self) -> String {
        format!(
            "LeafClassifier ({} classes, {} stages from {} filters, {})",
            self.config.num_classes,
            self.config.depth,
            self.config.base_filters,
            backend_name()
        )
    }
}

/// Path the recorder actually reads for `path`
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension(RECORD_EXTENSION)
}

/// Shared, read-only handle to the loaded classifier
#[derive(Clone)]
pub struct ModelRuntime {
    classifier: Arc<dyn Classifier>,
}

impl std::fmt::Debug for ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("classifier", &self.classifier.describe())
            .finish()
    }
}

impl ModelRuntime {
    /// Load the classifier artifact on the inference backend
    ///
    /// Missing or unreadable artifacts are `ModelUnavailable`; there is no
    /// degraded mode without a model.
    pub fn load(path: &Path, config: &LeafClassifierConfig) -> Result<Self> {
        let classifier = BurnClassifier::<InferenceBackend>::load(path, config, default_device())?;
        info!("Loaded {} from {:?}", classifier.describe(), path);
        Ok(Self::from_classifier(classifier))
    }

    /// Use an already constructed classifier
    pub fn from_classifier<C: Classifier + 'static>(classifier: C) -> Self {
        Self {
            classifier: Arc::new(classifier),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    pub fn input_shape(&self) -> [usize; 4] {
        self.classifier.input_shape()
    }

    pub fn describe(&self) -> String {
        self.classifier.describe()
    }

    /// Score one preprocessed image
    ///
    /// Rejects inputs of the wrong shape and classifiers that return a vector
    /// of the wrong length.
    pub fn score(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let expected = self.classifier.input_shape();
        if input.shape() != expected {
            return Err(CropCareError::InvalidInput(format!(
                "classifier expects input shape {:?}, got {:?}",
                expected,
                input.shape()
            )));
        }

        let probabilities = self.classifier.score(input)?;
        if probabilities.len() != self.classifier.num_classes() {
            return Err(CropCareError::Inference(format!(
                "classifier returned {} probabilities, expected {}",
                probabilities.len(),
                self.classifier.num_classes()
            )));
        }

        Ok(probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> LeafClassifierConfig {
        LeafClassifierConfig::new()
            .with_input_size(32)
            .with_base_filters(4)
            .with_hidden_units(16)
    }

    fn save_random_model(dir: &Path, config: &LeafClassifierConfig) -> PathBuf {
        let device = default_device();
        let model = LeafClassifier::<InferenceBackend>::new(config, &device);
        let path = dir.join("leaf_classifier.mpk");
        model
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();
        path
    }

    fn gradient_input(size: usize) -> InputTensor {
        let values = (0..size * size * 3)
            .map(|i| (i % 255) as f32 / 127.5 - 1.0)
            .collect();
        InputTensor::new(values, [1, size, size, 3]).unwrap()
    }

    #[test]
    fn test_load_and_score_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let path = save_random_model(dir.path(), &config);

        let runtime = ModelRuntime::load(&path, &config).unwrap();
        assert_eq!(runtime.num_classes(), 15);
        assert_eq!(runtime.input_shape(), [1, 32, 32, 3]);

        let probs = runtime.score(&gradient_input(32)).unwrap();
        assert_eq!(probs.len(), 15);
        assert!(probs.iter().all(|&p| p >= 0.0));
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum was {}", sum);
    }

    #[test]
    fn test_score_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let path = save_random_model(dir.path(), &config);
        let runtime = ModelRuntime::load(&path, &config).unwrap();

        let input = gradient_input(32);
        assert_eq!(runtime.score(&input).unwrap(), runtime.score(&input).unwrap());
    }

    #[test]
    fn test_extension_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        save_random_model(dir.path(), &config);

        assert!(ModelRuntime::load(&dir.path().join("leaf_classifier"), &config).is_ok());
    }

    #[test]
    fn test_missing_artifact_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelRuntime::load(&dir.path().join("absent.mpk"), &small_config()).unwrap_err();
        assert!(matches!(err, CropCareError::ModelUnavailable(_)));
    }

    #[test]
    fn test_corrupt_artifact_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf_classifier.mpk");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();

        let err = ModelRuntime::load(&path, &small_config()).unwrap_err();
        assert!(matches!(err, CropCareError::ModelUnavailable(_)));
    }

    #[test]
    fn test_wrong_input_shape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let path = save_random_model(dir.path(), &config);
        let runtime = ModelRuntime::load(&path, &config).unwrap();

        let err = runtime.score(&gradient_input(16)).unwrap_err();
        assert!(matches!(err, CropCareError::InvalidInput(_)));
    }

    #[test]
    fn test_concurrent_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let path = save_random_model(dir.path(), &config);
        let runtime = ModelRuntime::load(&path, &config).unwrap();
        let expected = runtime.score(&gradient_input(32)).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let runtime = runtime.clone();
                let expected = expected.clone();
                scope.spawn(move || {
                    assert_eq!(runtime.score(&gradient_input(32)).unwrap(), expected);
                });
            }
        });
    }
}
