//! Backend selection for inference
//!
//! Serving runs on the NdArray CPU backend without autodiff, so dropout is a
//! no-op and batch norm uses its running statistics.

use burn::tensor::backend::Backend;

/// The backend every loaded classifier runs on
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

/// Get the default device
pub fn default_device() -> <InferenceBackend as Backend>::Device {
    <InferenceBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    "NdArray (CPU)"
}
