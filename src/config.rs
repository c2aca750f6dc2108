//! Service Configuration
//!
//! TOML configuration for the inference core. Every field has a default, so a
//! partial file (or none at all) is valid. Tables the core does not know, such
//! as the server's `[server]`, are ignored.
//!
//! ```toml
//! [model]
//! path = "model/leaf_classifier.mpk"
//! num_classes = 15
//!
//! [labels]
//! class_index_path = "model/class_indices.json"
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::inference::preprocess::{DEFAULT_IMAGE_SIZE, DEFAULT_MAX_IMAGE_DIMENSION};
use crate::model::cnn::LeafClassifierConfig;
use crate::utils::error::{CropCareError, Result};
use crate::utils::logging::{LogConfig, LogLevel};

/// Top-level configuration of the inference core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub model: ModelSettings,
    pub labels: LabelSettings,
    pub preprocess: PreprocessSettings,
    pub logging: LoggingSettings,
}

/// Classifier artifact and architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Burn `CompactRecorder` file
    pub path: PathBuf,
    pub num_classes: usize,
    pub base_filters: usize,
    /// Downsampling stages; `image_size >> depth` must stay above zero
    pub depth: usize,
    pub hidden_units: usize,
    pub dropout_rate: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model/leaf_classifier.mpk"),
            num_classes: crate::NUM_CLASSES,
            base_filters: 32,
            depth: 4,
            hidden_units: 256,
            dropout_rate: 0.3,
        }
    }
}

/// Persisted class-index table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub class_index_path: PathBuf,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            class_index_path: PathBuf::from("model/class_indices.json"),
        }
    }
}

/// Input pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    pub image_size: u32,
    pub max_image_dimension: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingSettings {
    /// Apply the configured level and ANSI switch on top of `preset`
    pub fn apply_to(&self, preset: LogConfig) -> LogConfig {
        preset
            .with_level(LogLevel::parse(&self.level))
            .with_ansi(self.ansi)
    }

    /// Logging for a binary whose normal preset is `preset`
    ///
    /// `verbose` switches to the debug preset and ignores the configured level.
    pub fn log_config(&self, preset: LogConfig, verbose: bool) -> LogConfig {
        if verbose {
            LogConfig::verbose().with_ansi(self.ansi)
        } else {
            self.apply_to(preset)
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file
    ///
    /// A missing file means "all defaults"; an unreadable or malformed one is
    /// a `Config` error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let config: Self = load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no classifier could be built from
    pub fn validate(&self) -> Result<()> {
        if self.model.num_classes == 0 {
            return Err(CropCareError::Config(
                "model.num_classes must be greater than 0".to_string(),
            ));
        }
        if self.model.base_filters == 0 {
            return Err(CropCareError::Config(
                "model.base_filters must be greater than 0".to_string(),
            ));
        }
        if self.model.hidden_units == 0 {
            return Err(CropCareError::Config(
                "model.hidden_units must be greater than 0".to_string(),
            ));
        }
        if self.model.depth == 0 || (self.preprocess.image_size as usize) >> self.model.depth == 0 {
            return Err(CropCareError::Config(format!(
                "model.depth must be between 1 and log2(preprocess.image_size), got {}",
                self.model.depth
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout_rate) {
            return Err(CropCareError::Config(
                "model.dropout_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }
        if self.preprocess.image_size == 0 {
            return Err(CropCareError::Config(
                "preprocess.image_size must be greater than 0".to_string(),
            ));
        }
        if self.preprocess.max_image_dimension < self.preprocess.image_size {
            return Err(CropCareError::Config(
                "preprocess.max_image_dimension must be at least preprocess.image_size".to_string(),
            ));
        }
        Ok(())
    }

    /// Architecture of the classifier stored at `model.path`
    pub fn classifier_config(&self) -> LeafClassifierConfig {
        LeafClassifierConfig::new()
            .with_num_classes(self.model.num_classes)
            .with_input_size(self.preprocess.image_size as usize)
            .with_base_filters(self.model.base_filters)
            .with_depth(self.model.depth)
            .with_hidden_units(self.model.hidden_units)
            .with_dropout_rate(self.model.dropout_rate)
    }
}

/// Read and deserialize any TOML config file
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        CropCareError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        CropCareError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}
