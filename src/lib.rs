//! # shlight
//!
//! Training and hyperparameter-search pipeline for a regression model that maps an
//! input image to a fixed-length vector of spherical-harmonic lighting coefficients,
//! built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: paired image/coefficient sample store, deterministic preprocessing,
//!   reproducible train/validation splits, Burn dataset/batcher integration
//! - `model`: CNN regressor emitting the coefficient vector
//! - `training`: training loop with loss scaling, plateau learning-rate control,
//!   atomic checkpointing, and black-box hyperparameter search
//! - `utils`: error types and logging
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use shlight::dataset::PairedSampleStore;
//! use shlight::training::{Trainer, TrainingConfig};
//!
//! let store = PairedSampleStore::open("data/pngs", "data/sh", Default::default())?;
//! // ... split, build loaders, train
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::batch::{CoefficientBatch, CoefficientBatcher, CoefficientDataset};
pub use dataset::split::{split_indices, DatasetSplit};
pub use dataset::store::{PairedSampleStore, Sample, StoreConfig};
pub use dataset::transform::Preprocessor;
pub use model::regressor::{ShRegressor, ShRegressorConfig};
pub use training::checkpoint::CheckpointManager;
pub use training::scaler::GradScaler;
pub use training::scheduler::PlateauScheduler;
pub use training::search::{HyperparameterSearch, SearchConfig, Trial, TrialStatus};
pub use training::trainer::{Trainer, TrainingReport, TrainingState};
pub use training::TrainingConfig;
pub use utils::error::{Result, ShlightError};

/// Length of the spherical-harmonic coefficient vector (9 bands x RGB)
pub const NUM_COEFFICIENTS: usize = 27;

/// Default input image width
pub const IMAGE_WIDTH: usize = 256;

/// Default input image height
pub const IMAGE_HEIGHT: usize = 128;

/// Per-channel normalization mean (ImageNet statistics)
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel normalization standard deviation (ImageNet statistics)
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
