//! Model module: the Burn CNN and the runtime that serves it
//!
//! - `cnn`: the leaf disease classifier architecture
//! - `runtime`: artifact loading and the concurrent-safe scoring handle

pub mod cnn;
pub mod runtime;

// Re-export main types for convenience
pub use cnn::{LeafClassifier, LeafClassifierConfig};
pub use runtime::{BurnClassifier, Classifier, ModelRuntime};
