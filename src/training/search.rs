//! Random hyperparameter search
//!
//! Treats a shortened training run as a black box: each trial draws a learning rate
//! and weight decay log-uniformly from the search space, trains for a few epochs on
//! the same seeded split, and reports the final-epoch average training loss as its
//! objective. A numerically divergent run fails its trial (recorded with an infinite
//! objective) without stopping the search. Trials run sequentially and the sampling
//! stream is seeded, so a search is reproducible end to end.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::trainer::Trainer;
use super::{build_dataloaders, TrainingConfig};
use crate::dataset::split::{split_indices, DatasetSplit};
use crate::dataset::store::PairedSampleStore;
use crate::model::regressor::ShRegressorConfig;
use crate::utils::error::{Result, ShlightError};
use burn::tensor::backend::AutodiffBackend;

/// Objective value recorded for a failed trial
const FAILED_OBJECTIVE: f64 = f64::INFINITY;

/// Log-uniform sampling ranges, as (low, high) bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Learning-rate bounds
    pub learning_rate: (f64, f64),
    /// Weight-decay bounds
    pub weight_decay: (f64, f64),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            learning_rate: (1e-5, 1e-2),
            weight_decay: (1e-6, 1e-2),
        }
    }
}

impl SearchSpace {
    fn validate(&self) -> Result<()> {
        for (name, (lo, hi)) in [
            ("learning_rate", self.learning_rate),
            ("weight_decay", self.weight_decay),
        ] {
            if !(lo > 0.0 && hi >= lo && hi.is_finite()) {
                return Err(ShlightError::Config(format!(
                    "search bounds for {name} must satisfy 0 < low <= high, got ({lo}, {hi})"
                )));
            }
        }
        Ok(())
    }

    /// Draw one (learning_rate, weight_decay) pair, each log-uniform in its bounds
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> (f64, f64) {
        (
            sample_log_uniform(rng, self.learning_rate),
            sample_log_uniform(rng, self.weight_decay),
        )
    }
}

fn sample_log_uniform(rng: &mut ChaCha8Rng, (lo, hi): (f64, f64)) -> f64 {
    let u: f64 = rng.gen();
    (lo.ln() + u * (hi.ln() - lo.ln())).exp()
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of trials to run
    pub trials: usize,
    /// Epochs per shortened trial run
    pub epochs_per_trial: usize,
    /// Seed for the sampling stream
    pub seed: u64,
    /// Sampling ranges
    pub space: SearchSpace,
    /// Optional wall-clock budget per trial
    pub max_trial_seconds: Option<u64>,
    /// Base training configuration shared by all trials
    pub training: TrainingConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            trials: 50,
            epochs_per_trial: 4,
            seed: 1234,
            space: SearchSpace::default(),
            max_trial_seconds: None,
            training: TrainingConfig::default(),
        }
    }
}

/// Outcome of a single trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Ran to completion with a finite objective
    Completed,
    /// Diverged or produced no usable objective
    Failed,
}

/// One sampled hyperparameter combination and its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// Trial index (0-based)
    pub id: usize,
    /// Sampled learning rate
    pub learning_rate: f64,
    /// Sampled weight decay
    pub weight_decay: f64,
    /// Final-epoch average training loss (infinite for failed trials)
    pub objective: f64,
    /// Completion status
    pub status: TrialStatus,
    /// Global step the trial run reached
    pub global_step: u64,
    /// Trial wall-clock duration in seconds
    pub duration_secs: f64,
}

/// Sequential random search over training hyperparameters
pub struct HyperparameterSearch {
    config: SearchConfig,
    trials: Vec<Trial>,
}

impl HyperparameterSearch {
    /// Create a search; fails fast on an unusable configuration.
    pub fn new(config: SearchConfig) -> Result<Self> {
        if config.trials == 0 {
            return Err(ShlightError::Config("trials must be positive".into()));
        }
        if config.epochs_per_trial == 0 {
            return Err(ShlightError::Config(
                "epochs_per_trial must be positive".into(),
            ));
        }
        config.space.validate()?;
        config.training.validate()?;

        Ok(Self {
            config,
            trials: Vec::new(),
        })
    }

    /// All trials run so far, in execution order
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// The completed trial with the lowest objective, if any
    pub fn best(&self) -> Option<&Trial> {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .min_by(|a, b| a.objective.total_cmp(&b.objective))
    }

    /// Run all trials and return the best one.
    ///
    /// Every trial trains a fresh model on the same seeded split so objectives are
    /// comparable. Divergent trials are recorded and skipped over; any other error
    /// aborts the search.
    pub fn run<B: AutodiffBackend>(
        &mut self,
        store: Arc<PairedSampleStore>,
        model_config: &ShRegressorConfig,
        device: B::Device,
    ) -> Result<Trial> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let split = split_indices(
            store.len(),
            self.config.training.train_fraction,
            self.config.training.seed,
        )?;

        for id in 0..self.config.trials {
            let (learning_rate, weight_decay) = self.config.space.sample(&mut rng);
            info!(
                "Trial {}/{}: lr {:.3e}, wd {:.3e}",
                id + 1,
                self.config.trials,
                learning_rate,
                weight_decay
            );

            let trial_config = self.trial_config(id, learning_rate, weight_decay);
            let started = Instant::now();
            let trial = match run_trial::<B>(&store, &split, trial_config, model_config, &device) {
                Ok(report) => {
                    if report.interrupted {
                        warn!(
                            "Trial {} hit the wall-clock budget after {} epoch(s)",
                            id, report.epochs_run
                        );
                    }
                    // A cut-short trial saw fewer epochs than its peers, so its
                    // objective is not comparable; record it as failed.
                    let status = if report.final_train_loss.is_finite() && !report.interrupted {
                        TrialStatus::Completed
                    } else {
                        TrialStatus::Failed
                    };
                    Trial {
                        id,
                        learning_rate,
                        weight_decay,
                        objective: if status == TrialStatus::Completed {
                            report.final_train_loss
                        } else {
                            FAILED_OBJECTIVE
                        },
                        status,
                        global_step: report.global_step,
                        duration_secs: started.elapsed().as_secs_f64(),
                    }
                }
                Err(e @ ShlightError::NumericDivergence { .. }) => {
                    warn!("Trial {} failed: {}", id, e);
                    Trial {
                        id,
                        learning_rate,
                        weight_decay,
                        objective: FAILED_OBJECTIVE,
                        status: TrialStatus::Failed,
                        global_step: 0,
                        duration_secs: started.elapsed().as_secs_f64(),
                    }
                }
                Err(e) => return Err(e),
            };

            info!(
                "Trial {} done in {:.1}s: objective {:.6}",
                id, trial.duration_secs, trial.objective
            );
            self.trials.push(trial);
        }

        let best = self.best().cloned().ok_or_else(|| {
            ShlightError::Config(format!(
                "all {} trials failed, no hyperparameters to report",
                self.config.trials
            ))
        })?;
        info!(
            "Best trial {}: lr {:.3e}, wd {:.3e}, objective {:.6}",
            best.id, best.learning_rate, best.weight_decay, best.objective
        );
        Ok(best)
    }

    fn trial_config(&self, id: usize, learning_rate: f64, weight_decay: f64) -> TrainingConfig {
        let mut config = self.config.training.clone();
        config.epochs = self.config.epochs_per_trial;
        config.learning_rate = learning_rate;
        config.weight_decay = weight_decay;
        config.max_seconds = self.config.max_trial_seconds;
        config.checkpoint_dir = Path::new(&self.config.training.checkpoint_dir)
            .join(format!("trial-{id}"))
            .to_string_lossy()
            .into_owned();
        config
    }

    /// Write all trial results to a JSON file
    pub fn save_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.trials)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn run_trial<B: AutodiffBackend>(
    store: &Arc<PairedSampleStore>,
    split: &DatasetSplit,
    config: TrainingConfig,
    model_config: &ShRegressorConfig,
    device: &B::Device,
) -> Result<crate::training::TrainingReport> {
    let (train_loader, val_loader) =
        build_dataloaders::<B>(store.clone(), split, &config, device);
    let model = model_config.init::<B>(device);
    let mut trainer = Trainer::new(model, config, device.clone())?;
    trainer.fit(train_loader, val_loader)
}
