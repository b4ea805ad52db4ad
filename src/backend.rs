//! Backend selection
//!
//! The pipeline trains on the ndarray backend by default so it runs on any host;
//! the aliases below are the single swap point for a GPU backend.

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;

/// Inference/evaluation backend
pub type DefaultBackend = NdArray<f32>;

/// Autodiff backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Human-readable name for the active backend
pub fn backend_name() -> &'static str {
    "ndarray (CPU)"
}
