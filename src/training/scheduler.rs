//! Plateau-based learning-rate control
//!
//! Reduces the learning rate when the validation loss stops improving. The rate is
//! monotonically non-increasing for the lifetime of one training run.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Reduce-on-plateau learning-rate scheduler (min mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauScheduler {
    best: f64,
    num_bad: usize,
    current_lr: f64,
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_lr: f64,
}

impl PlateauScheduler {
    /// Create a scheduler starting at `initial_lr`.
    ///
    /// A validation result counts as an improvement when it beats the best-seen
    /// value by more than `min_delta`. Once more than `patience` consecutive
    /// results fail to improve, the rate is multiplied by `factor` (clamped at
    /// `min_lr`) and the patience counter resets.
    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_delta: f64, min_lr: f64) -> Self {
        Self {
            best: f64::INFINITY,
            num_bad: 0,
            current_lr: initial_lr,
            factor,
            patience,
            min_delta,
            min_lr,
        }
    }

    /// Feed a validation result and return the (possibly reduced) learning rate.
    pub fn step(&mut self, val_loss: f64) -> f64 {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.num_bad = 0;
            return self.current_lr;
        }

        self.num_bad += 1;
        if self.num_bad > self.patience {
            let reduced = (self.current_lr * self.factor).max(self.min_lr);
            if reduced < self.current_lr {
                info!(
                    "Validation plateau ({} results without improvement): lr {:.3e} -> {:.3e}",
                    self.num_bad, self.current_lr, reduced
                );
                self.current_lr = reduced;
            }
            self.num_bad = 0;
        }

        self.current_lr
    }

    /// Current learning rate
    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// Best validation loss seen so far
    pub fn best(&self) -> f64 {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_reduces_after_patience_exceeded() {
        // patience=2, factor=0.1, lr=1e-3; losses [1.0, 1.0, 1.0, 1.0]:
        // the first result sets the best, the 3rd non-improving result trips the
        // reduction.
        let mut sched = PlateauScheduler::new(1e-3, 0.1, 2, 0.0, 0.0);
        assert_eq!(sched.step(1.0), 1e-3);
        assert_eq!(sched.step(1.0), 1e-3);
        assert_eq!(sched.step(1.0), 1e-3);
        let lr = sched.step(1.0);
        assert!((lr - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_improvement_resets_patience() {
        let mut sched = PlateauScheduler::new(1e-3, 0.1, 1, 0.0, 0.0);
        sched.step(1.0);
        sched.step(1.1); // bad 1
        sched.step(0.5); // improvement, reset
        sched.step(0.6); // bad 1
        assert_eq!(sched.lr(), 1e-3);
        sched.step(0.6); // bad 2 > patience -> reduce
        assert!((sched.lr() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_min_delta_gates_improvement() {
        let mut sched = PlateauScheduler::new(1e-3, 0.1, 0, 0.05, 0.0);
        sched.step(1.0);
        // 0.97 is better but not by more than min_delta: counts as bad, patience=0
        sched.step(0.97);
        assert!((sched.lr() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_lr_is_monotone_non_increasing() {
        let mut sched = PlateauScheduler::new(1e-2, 0.5, 1, 1e-6, 1e-6);
        let losses = [1.0, 0.9, 0.95, 0.96, 0.85, 0.85, 0.85, 0.85, 0.2, 0.9, 0.9];
        let mut prev = sched.lr();
        for loss in losses {
            let lr = sched.step(loss);
            assert!(lr <= prev);
            prev = lr;
        }
    }

    #[test]
    fn test_lr_floor() {
        let mut sched = PlateauScheduler::new(1e-7, 0.1, 0, 0.0, 1e-8);
        sched.step(1.0);
        for _ in 0..10 {
            sched.step(1.0);
        }
        assert!(sched.lr() >= 1e-8);
    }
}
