//! Prediction Service
//!
//! The single public entry point of the core. Each request walks
//! `received -> decoded -> preprocessed -> scored -> restricted -> resolved`;
//! the service holds no per-request state and is shared read-only between
//! concurrent callers.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::inference::class_map::ClassIndexMap;
use crate::inference::crop_groups::CropClassGroups;
use crate::inference::preprocess::Preprocessor;
use crate::model::runtime::ModelRuntime;
use crate::utils::error::{CropCareError, Result};
use crate::utils::format_millis;

/// One uploaded leaf photo plus its optional form fields
///
/// Numeric fields stay as the raw strings the caller sent; they are parsed
/// best-effort when the result is built.
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    pub image_bytes: Vec<u8>,
    pub crop_type: Option<String>,
    pub crop_stage: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub acc: Option<String>,
}

impl PredictionRequest {
    pub fn new(image_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            image_bytes: image_bytes.into(),
            ..Default::default()
        }
    }

    /// Read the image from disk; a missing or unreadable file is an `Io` error
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    pub fn with_crop_type(mut self, crop_type: impl Into<String>) -> Self {
        self.crop_type = Some(crop_type.into());
        self
    }

    pub fn with_crop_stage(mut self, crop_stage: impl Into<String>) -> Self {
        self.crop_stage = Some(crop_stage.into());
        self
    }

    pub fn with_location(
        mut self,
        lat: impl Into<String>,
        lon: impl Into<String>,
        acc: impl Into<String>,
    ) -> Self {
        self.lat = Some(lat.into());
        self.lon = Some(lon.into());
        self.acc = Some(acc.into());
        self
    }

    /// Set a text form field by name; returns `false` for unknown names
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "crop_type" => &mut self.crop_type,
            "crop_stage" => &mut self.crop_stage,
            "lat" => &mut self.lat,
            "lon" => &mut self.lon,
            "acc" => &mut self.acc,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Immutable outcome of one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub crop_type: Option<String>,
    pub crop_stage: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub acc: Option<f64>,
}

/// Immutable service context: model, labels, crop table and input pipeline
#[derive(Debug, Clone)]
pub struct PredictionService {
    runtime: ModelRuntime,
    class_map: ClassIndexMap,
    crop_groups: CropClassGroups,
    preprocessor: Preprocessor,
}

impl PredictionService {
    /// Assemble the service and run the startup validation pass
    ///
    /// Fails with `Config` when the preprocessor output does not fit the
    /// classifier input, or when a crop group references an id the model or
    /// the class index does not know.
    pub fn new(
        runtime: ModelRuntime,
        class_map: ClassIndexMap,
        crop_groups: CropClassGroups,
        preprocessor: Preprocessor,
    ) -> Result<Self> {
        if preprocessor.output_shape() != runtime.input_shape() {
            return Err(CropCareError::Config(format!(
                "preprocessing produces {:?} but the classifier expects {:?}",
                preprocessor.output_shape(),
                runtime.input_shape()
            )));
        }

        crop_groups.validate(&class_map, runtime.num_classes())?;

        if class_map.is_empty() {
            warn!("Class index is empty; every prediction will be labelled \"Unknown\"");
        } else if let Some(max_id) = class_map.max_id() {
            if max_id >= runtime.num_classes() {
                warn!(
                    "Class index has labels up to id {} but the model only has {} classes",
                    max_id,
                    runtime.num_classes()
                );
            }
        }

        Ok(Self {
            runtime,
            class_map,
            crop_groups,
            preprocessor,
        })
    }

    /// Load model, labels and the default crop table from configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let runtime = ModelRuntime::load(&config.model.path, &config.classifier_config())?;
        let class_map = ClassIndexMap::load(&config.labels.class_index_path)?;
        let preprocessor = Preprocessor::new()
            .with_image_size(config.preprocess.image_size)
            .with_max_image_dimension(config.preprocess.max_image_dimension);

        Self::new(runtime, class_map, CropClassGroups::default(), preprocessor)
    }

    /// Classify one image, optionally limited to a crop's classes
    ///
    /// `DecodeError` is the only failure a caller can trigger. An unknown crop
    /// type widens the search to every class; an id with no label resolves to
    /// `"Unknown"`.
    pub fn predict(&self, image_bytes: &[u8], crop_type: Option<&str>) -> Result<PredictionResult> {
        let start = Instant::now();

        let tensor = self.preprocessor.preprocess(image_bytes)?;
        let preprocessed_at = start.elapsed();

        // The full vector is always scored; crop restriction only changes selection
        let probabilities = self.runtime.score(&tensor)?;
        let scored_at = start.elapsed();

        let selection = self
            .crop_groups
            .restrict(crop_type, &probabilities)
            .ok_or_else(|| {
                CropCareError::Inference("classifier returned no finite probabilities".to_string())
            })?;

        if selection.restricted_to.is_none() {
            if let Some(crop) = crop_type.map(str::trim).filter(|c| !c.is_empty()) {
                debug!("Crop type {:?} is not registered; selecting over all classes", crop);
            }
        }

        let label = self.class_map.lookup(selection.class_id).to_string();

        debug!(
            preprocess = %format_millis(preprocessed_at.as_secs_f64() * 1000.0),
            score = %format_millis((scored_at - preprocessed_at).as_secs_f64() * 1000.0),
            "Scored {} classes",
            probabilities.len()
        );
        info!(
            class_id = selection.class_id,
            confidence = selection.confidence,
            restricted_to = selection.restricted_to.as_deref().unwrap_or("-"),
            elapsed = %format_millis(start.elapsed().as_secs_f64() * 1000.0),
            "Predicted {}",
            label
        );

        Ok(PredictionResult {
            class_id: selection.class_id,
            label,
            confidence: selection.confidence,
            crop_type: non_blank(crop_type),
            crop_stage: None,
            lat: None,
            lon: None,
            acc: None,
        })
    }

    /// Classify a full request and attach its pass-through fields
    ///
    /// `crop_stage`, `lat`, `lon` and `acc` are best-effort: values that are
    /// blank or do not parse as finite numbers are dropped from the result.
    pub fn handle(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        let mut result = self.predict(&request.image_bytes, request.crop_type.as_deref())?;

        result.crop_stage = non_blank(request.crop_stage.as_deref());
        result.lat = parse_coordinate("lat", request.lat.as_deref());
        result.lon = parse_coordinate("lon", request.lon.as_deref());
        result.acc = parse_coordinate("acc", request.acc.as_deref());

        Ok(result)
    }

    pub fn runtime(&self) -> &ModelRuntime {
        &self.runtime
    }

    pub fn class_map(&self) -> &ClassIndexMap {
        &self.class_map
    }

    pub fn crop_groups(&self) -> &CropClassGroups {
        &self.crop_groups
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_coordinate(field: &str, value: Option<&str>) -> Option<f64> {
    let raw = value.map(str::trim).filter(|v| !v.is_empty())?;
    match raw.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(parsed),
        _ => {
            debug!("Dropping invalid {} value {:?}", field, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::class_map::UNKNOWN_LABEL;
    use crate::inference::preprocess::tests::leaf_png;
    use crate::inference::preprocess::InputTensor;
    use crate::model::runtime::Classifier;

    /// Returns the same table for every image
    struct FixedClassifier {
        probabilities: Vec<f32>,
    }

    impl Classifier for FixedClassifier {
        fn num_classes(&self) -> usize {
            self.probabilities.len()
        }

        fn input_shape(&self) -> [usize; 4] {
            [1, 224, 224, 3]
        }

        fn score(&self, _input: &InputTensor) -> Result<Vec<f32>> {
            Ok(self.probabilities.clone())
        }
    }

    /// Softmax over per-class distances to the image's mean value, so
    /// different images give different answers
    struct BrightnessClassifier;

    impl Classifier for BrightnessClassifier {
        fn num_classes(&self) -> usize {
            15
        }

        fn input_shape(&self) -> [usize; 4] {
            [1, 224, 224, 3]
        }

        fn score(&self, input: &InputTensor) -> Result<Vec<f32>> {
            let values = input.as_slice();
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            let logits: Vec<f32> = (0..15)
                .map(|i| -((mean - (i as f32 / 7.0 - 1.0)) * 10.0).powi(2))
                .collect();
            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
            let sum: f32 = exp.iter().sum();
            Ok(exp.into_iter().map(|e| e / sum).collect())
        }
    }

    const LABELS: [&str; 15] = [
        "Pepper__bell___Bacterial_spot",
        "Pepper__bell___healthy",
        "Potato___Early_blight",
        "Potato___healthy",
        "Potato___Late_blight",
        "Tomato__Target_Spot",
        "Tomato__Tomato_mosaic_virus",
        "Tomato__Tomato_YellowLeaf__Curl_Virus",
        "Tomato_Bacterial_spot",
        "Tomato_Early_blight",
        "Tomato_healthy",
        "Tomato_Late_blight",
        "Tomato_Leaf_Mold",
        "Tomato_Septoria_leaf_spot",
        "Tomato_Spider_mites_Two_spotted_spider_mite",
    ];

    fn fixed(probabilities: Vec<f32>) -> ModelRuntime {
        ModelRuntime::from_classifier(FixedClassifier { probabilities })
    }

    fn service_with(runtime: ModelRuntime, class_map: ClassIndexMap) -> PredictionService {
        PredictionService::new(
            runtime,
            class_map,
            CropClassGroups::default(),
            Preprocessor::new(),
        )
        .unwrap()
    }

    /// Pepper is the global favourite, tomato late blight leads the tomato ids
    fn pepper_heavy() -> Vec<f32> {
        let mut probs = vec![0.01; 15];
        probs[0] = 0.55;
        probs[11] = 0.2;
        probs[3] = 0.12;
        let sum: f32 = probs.iter().sum();
        probs.iter().map(|p| p / sum).collect()
    }

    #[test]
    fn test_unrestricted_prediction() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let result = service.predict(&leaf_png(120, 90), None).unwrap();

        assert_eq!(result.class_id, 0);
        assert_eq!(result.label, "Pepper__bell___Bacterial_spot");
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert!(result.crop_type.is_none());
    }

    #[test]
    fn test_tomato_restriction() {
        let probs = pepper_heavy();
        let service = service_with(fixed(probs.clone()), ClassIndexMap::from_labels(LABELS));
        let result = service.predict(&leaf_png(120, 90), Some("tomato")).unwrap();

        assert!((5..=14).contains(&result.class_id));
        assert_eq!(result.class_id, 11);
        assert_eq!(result.label, "Tomato_Late_blight");
        assert!(result.label.starts_with("Tomato"));
        assert_eq!(result.confidence, probs[11]);
        assert_eq!(result.crop_type.as_deref(), Some("tomato"));
    }

    #[test]
    fn test_unregistered_crop_falls_back() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let result = service.predict(&leaf_png(64, 64), Some("durian")).unwrap();

        assert_eq!(result.class_id, 0);
        assert_eq!(result.crop_type.as_deref(), Some("durian"));
    }

    #[test]
    fn test_empty_class_map_still_predicts() {
        let probs = pepper_heavy();
        let service = service_with(fixed(probs.clone()), ClassIndexMap::empty());
        let result = service.predict(&leaf_png(64, 64), None).unwrap();

        assert_eq!(result.label, UNKNOWN_LABEL);
        assert_eq!(result.class_id, 0);
        assert_eq!(result.confidence, probs[0]);
    }

    #[test]
    fn test_decode_error_has_no_partial_result() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let err = service.predict(b"\x89PNG but not really", Some("tomato")).unwrap_err();

        assert!(matches!(err, CropCareError::Decode(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_identical_inputs_identical_outputs() {
        let service = service_with(
            ModelRuntime::from_classifier(BrightnessClassifier),
            ClassIndexMap::from_labels(LABELS),
        );
        let bytes = leaf_png(200, 150);

        let first = service.predict(&bytes, Some("potato")).unwrap();
        let second = service.predict(&bytes, Some("potato")).unwrap();
        assert_eq!(first, second);
        assert!((2..=4).contains(&first.class_id));
    }

    #[test]
    fn test_handle_pass_through_fields() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let request = PredictionRequest::new(leaf_png(80, 80))
            .with_crop_type("Potato")
            .with_crop_stage("flowering")
            .with_location("12.97", "77.59", "15.5");

        let result = service.handle(&request).unwrap();
        assert_eq!(result.class_id, 3);
        assert_eq!(result.crop_stage.as_deref(), Some("flowering"));
        assert_eq!(result.lat, Some(12.97));
        assert_eq!(result.lon, Some(77.59));
        assert_eq!(result.acc, Some(15.5));
    }

    #[test]
    fn test_invalid_pass_through_fields_are_dropped() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let request = PredictionRequest::new(leaf_png(80, 80))
            .with_crop_stage("   ")
            .with_location("north", "NaN", "");

        let result = service.handle(&request).unwrap();
        assert_eq!(result.class_id, 0);
        assert!(result.crop_stage.is_none());
        assert!(result.lat.is_none());
        assert!(result.lon.is_none());
        assert!(result.acc.is_none());
    }

    #[test]
    fn test_request_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        std::fs::write(&path, leaf_png(40, 30)).unwrap();

        let request = PredictionRequest::from_path(&path).unwrap();
        assert_eq!(request.image_bytes, leaf_png(40, 30));
        assert!(request.crop_type.is_none());

        let err = PredictionRequest::from_path(&dir.path().join("missing.png")).unwrap_err();
        assert!(matches!(err, CropCareError::Io(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_set_field() {
        let mut request = PredictionRequest::new(Vec::new());
        assert!(request.set_field("lat", "1.5".to_string()));
        assert!(request.set_field("crop_type", "pepper".to_string()));
        assert!(!request.set_field("weather", "sunny".to_string()));
        assert_eq!(request.lat.as_deref(), Some("1.5"));
        assert_eq!(request.crop_type.as_deref(), Some("pepper"));
    }

    #[test]
    fn test_result_json_shape() {
        let service = service_with(fixed(pepper_heavy()), ClassIndexMap::from_labels(LABELS));
        let result = service.predict(&leaf_png(64, 64), None).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        for key in ["class_id", "label", "confidence", "crop_type", "crop_stage", "lat", "lon", "acc"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json["lat"].is_null());
    }

    #[test]
    fn test_startup_validation() {
        // Crop table references ids 0..15 but the model only has 4 classes
        let err = PredictionService::new(
            fixed(vec![0.25; 4]),
            ClassIndexMap::empty(),
            CropClassGroups::default(),
            Preprocessor::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CropCareError::Config(_)));

        // Labels exist but do not cover the tomato ids
        let err = PredictionService::new(
            fixed(pepper_heavy()),
            ClassIndexMap::from_labels(LABELS[..5].iter().copied()),
            CropClassGroups::default(),
            Preprocessor::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CropCareError::Config(_)));

        // Preprocessor output must match the classifier input
        let err = PredictionService::new(
            fixed(pepper_heavy()),
            ClassIndexMap::from_labels(LABELS),
            CropClassGroups::default(),
            Preprocessor::new().with_image_size(128),
        )
        .unwrap_err();
        assert!(matches!(err, CropCareError::Config(_)));
    }

    #[test]
    fn test_wrong_length_vector_is_inference_error() {
        struct Short;
        impl Classifier for Short {
            fn num_classes(&self) -> usize {
                15
            }
            fn input_shape(&self) -> [usize; 4] {
                [1, 224, 224, 3]
            }
            fn score(&self, _input: &InputTensor) -> Result<Vec<f32>> {
                Ok(vec![1.0])
            }
        }

        let service = service_with(ModelRuntime::from_classifier(Short), ClassIndexMap::empty());
        let err = service.predict(&leaf_png(32, 32), None).unwrap_err();
        assert!(matches!(err, CropCareError::Inference(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_from_config_with_burn_model() {
        use crate::backend::{default_device, InferenceBackend};
        use crate::model::cnn::LeafClassifier;
        use burn::module::Module;
        use burn::record::CompactRecorder;

        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.model.path = dir.path().join("leaf_classifier.mpk");
        config.model.base_filters = 2;
        config.preprocess.image_size = 32;
        config.labels.class_index_path = dir.path().join("class_indices.json");

        LeafClassifier::<InferenceBackend>::new(&config.classifier_config(), &default_device())
            .save_file(config.model.path.clone(), &CompactRecorder::new())
            .unwrap();
        let labels: serde_json::Map<String, serde_json::Value> = LABELS
            .iter()
            .enumerate()
            .map(|(i, l)| (i.to_string(), serde_json::Value::from(*l)))
            .collect();
        std::fs::write(
            &config.labels.class_index_path,
            serde_json::to_string_pretty(&labels).unwrap(),
        )
        .unwrap();

        let service = PredictionService::from_config(&config).unwrap();
        let result = service.predict(&leaf_png(90, 60), Some("tomato")).unwrap();

        assert!((5..=14).contains(&result.class_id));
        assert_eq!(result.label, LABELS[result.class_id]);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_from_config_without_model_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.model.path = dir.path().join("missing.mpk");

        let err = PredictionService::from_config(&config).unwrap_err();
        assert!(matches!(err, CropCareError::ModelUnavailable(_)));
        assert!(err.is_startup_error());
    }
}
