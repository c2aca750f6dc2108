//! Inference pipeline: everything between uploaded bytes and a labelled result
//!
//! - `preprocess`: decode, resize and normalise into an NHWC tensor
//! - `class_map`: class id -> human-readable label
//! - `crop_groups`: crop keyword -> plausible class ids, restricted argmax
//! - `service`: the `predict` entry point tying the stages together

pub mod class_map;
pub mod crop_groups;
pub mod preprocess;
pub mod service;

// Re-export main types for convenience
pub use class_map::{ClassIndexMap, UNKNOWN_LABEL};
pub use crop_groups::{CropClassGroups, Selection, DEFAULT_CROP_GROUPS};
pub use preprocess::{InputTensor, Preprocessor};
pub use service::{PredictionRequest, PredictionResult, PredictionService};
