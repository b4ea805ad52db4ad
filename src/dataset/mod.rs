//! Dataset module for paired image/coefficient data
//!
//! This module provides:
//! - Enumeration and lazy loading of (image, coefficient-vector) pairs from two
//!   parallel directories
//! - A deterministic resize/normalize preprocessing pipeline
//! - Reproducible train/validation splits
//! - Burn `Dataset`/`Batcher` integration for multi-worker loading

pub mod batch;
pub mod split;
pub mod store;
pub mod transform;

// Re-export main types for convenience
pub use batch::{CoefficientBatch, CoefficientBatcher, CoefficientDataset, CoefficientItem};
pub use split::{split_indices, DatasetSplit};
pub use store::{PairedSampleStore, Sample, StoreConfig};
pub use transform::Preprocessor;

/// Recognized image file extensions (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Extension expected for coefficient label files
pub const LABEL_EXTENSION: &str = "txt";
