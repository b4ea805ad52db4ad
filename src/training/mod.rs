//! Training module
//!
//! This module provides:
//! - The training loop with loss-scale management and a rolling loss window
//! - A validation gate feeding plateau-based learning-rate control
//! - Atomic step-named checkpoints with retention and resume
//! - A black-box hyperparameter search over repeated shortened runs

pub mod checkpoint;
pub mod scaler;
pub mod scheduler;
pub mod search;
pub mod trainer;

pub use checkpoint::{CheckpointManager, CheckpointMeta};
pub use scaler::GradScaler;
pub use scheduler::PlateauScheduler;
pub use search::{HyperparameterSearch, SearchConfig, SearchSpace, Trial, TrialStatus};
pub use trainer::{Trainer, TrainingReport, TrainingState};

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::dataset::batch::{CoefficientBatch, CoefficientBatcher, CoefficientDataset};
use crate::dataset::split::DatasetSplit;
use crate::dataset::store::PairedSampleStore;
use crate::utils::error::{Result, ShlightError};

/// Steps between validation gates (and checkpoints)
pub const DEFAULT_EVAL_INTERVAL: u64 = 1000;

/// Size of the rolling step-loss window
pub const DEFAULT_LOSS_WINDOW: usize = 50;

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,

    /// Batch size for training and validation
    pub batch_size: usize,

    /// Initial learning rate
    pub learning_rate: f64,

    /// Weight decay (L2 regularization)
    pub weight_decay: f64,

    /// Fraction of samples assigned to the training split
    pub train_fraction: f64,

    /// Random seed for split assignment and shuffling
    pub seed: u64,

    /// Run the validation gate every N global steps
    pub eval_interval: u64,

    /// Rolling loss window size
    pub loss_window: usize,

    /// Number of data loading workers
    pub num_workers: usize,

    /// Directory for step-named checkpoints
    pub checkpoint_dir: String,

    /// Keep at most this many checkpoints (None keeps all)
    pub keep_checkpoints: Option<usize>,

    /// Validation results without improvement before the learning rate drops
    pub patience: usize,

    /// Multiplier applied to the learning rate on plateau
    pub lr_factor: f64,

    /// Minimum improvement over the best-seen validation loss that counts
    pub min_delta: f64,

    /// Learning-rate floor
    pub min_lr: f64,

    /// Consecutive overflow-skipped steps tolerated before the run aborts
    pub max_overflow_skips: u32,

    /// Optional wall-clock budget for the whole run, checked at epoch boundaries
    pub max_seconds: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 16,
            learning_rate: 4.5127039469197727e-4,
            weight_decay: 5.71817601139671e-4,
            train_fraction: 0.98,
            seed: 1234,
            eval_interval: DEFAULT_EVAL_INTERVAL,
            loss_window: DEFAULT_LOSS_WINDOW,
            num_workers: 4,
            checkpoint_dir: "output/checkpoints".to_string(),
            keep_checkpoints: Some(5),
            patience: 10,
            lr_factor: 0.1,
            min_delta: 1e-6,
            min_lr: 1e-8,
            max_overflow_skips: 8,
            max_seconds: None,
        }
    }
}

impl TrainingConfig {
    /// Validate the configuration; fails fast before any training starts.
    pub fn validate(&self) -> Result<()> {
        if !self.train_fraction.is_finite()
            || self.train_fraction <= 0.0
            || self.train_fraction >= 1.0
        {
            return Err(ShlightError::InvalidFraction {
                fraction: self.train_fraction,
                detail: "must lie strictly between 0 and 1".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ShlightError::Config("batch_size must be positive".into()));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(ShlightError::Config(
                "learning_rate must be positive and finite".into(),
            ));
        }
        if self.lr_factor <= 0.0 || self.lr_factor >= 1.0 {
            return Err(ShlightError::Config(
                "lr_factor must lie strictly between 0 and 1".into(),
            ));
        }
        if self.eval_interval == 0 {
            return Err(ShlightError::Config("eval_interval must be positive".into()));
        }
        if self.loss_window == 0 {
            return Err(ShlightError::Config("loss_window must be positive".into()));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Build the train and validation dataloaders for a split.
///
/// The training loader reshuffles every epoch from the run seed and prefetches
/// through a bounded worker pool; the validation loader iterates in order on the
/// inner (non-autodiff) backend.
pub fn build_dataloaders<B: AutodiffBackend>(
    store: Arc<PairedSampleStore>,
    split: &DatasetSplit,
    config: &TrainingConfig,
    device: &B::Device,
) -> (
    Arc<dyn DataLoader<CoefficientBatch<B>>>,
    Arc<dyn DataLoader<CoefficientBatch<B::InnerBackend>>>,
) {
    let train_batcher = CoefficientBatcher::<B>::new(device.clone(), &store);
    let train_loader = DataLoaderBuilder::new(train_batcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(CoefficientDataset::new(store.clone(), split.train.clone()));

    let val_batcher = CoefficientBatcher::<B::InnerBackend>::new(device.clone(), &store);
    let val_loader = DataLoaderBuilder::new(val_batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(CoefficientDataset::new(store, split.validation.clone()));

    (train_loader, val_loader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_fraction_fails_fast() {
        let config = TrainingConfig {
            train_fraction: 1.2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ShlightError::InvalidFraction { .. })
        ));
    }

    #[test]
    fn test_invalid_factor_rejected() {
        let config = TrainingConfig {
            lr_factor: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = TrainingConfig {
            epochs: 3,
            batch_size: 2,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.batch_size, 2);
        assert_eq!(loaded.learning_rate, config.learning_rate);
    }
}
