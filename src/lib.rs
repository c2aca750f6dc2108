//! # CropCare
//!
//! Leaf disease inference for the CropCare field app, built on the Burn framework.
//!
//! A photo of a single leaf goes in; the most likely disease class, its
//! human-readable label and a confidence come out. Callers may name the crop in
//! the photo, which limits the answer to that crop's diseases.
//!
//! ## Modules
//!
//! - `model`: the CNN classifier and the runtime that loads and scores it
//! - `inference`: preprocessing, labels, crop groups and the prediction service
//! - `config`: TOML configuration
//! - `backend`: Burn backend selection
//! - `utils`: errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cropcare::{PredictionService, ServiceConfig};
//!
//! let service = PredictionService::from_config(&ServiceConfig::default())?;
//! let bytes = std::fs::read("leaf.jpg")?;
//! let result = service.predict(&bytes, Some("tomato"))?;
//! println!("{} ({:.1}%)", result.label, result.confidence * 100.0);
//! ```

pub mod backend;
pub mod config;
pub mod inference;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::ServiceConfig;
pub use inference::class_map::ClassIndexMap;
pub use inference::crop_groups::CropClassGroups;
pub use inference::preprocess::{InputTensor, Preprocessor};
pub use inference::service::{PredictionRequest, PredictionResult, PredictionService};
pub use model::cnn::{LeafClassifier, LeafClassifierConfig};
pub use model::runtime::{Classifier, ModelRuntime};
pub use utils::error::{CropCareError, Result};

/// Classes produced by the shipped leaf model
pub const NUM_CLASSES: usize = 15;

/// Side length the shipped model was trained on
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
