//! Loss-scale management for mixed-precision training
//!
//! Explicit overflow-detect-and-backoff policy. A non-finite loss marks the step as
//! overflowed: the update is skipped and the scale backs off. After a run of
//! consecutive skipped steps the training run is declared numerically divergent.
//! Successful steps grow the scale back on a fixed interval, and the scale is
//! clamped to a fixed range. On reduced-precision backends the scale would also
//! multiply the loss before the backward pass; in f32 the gradients are left
//! untouched and the scale acts purely as the skip/backoff budget.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::error::{Result, ShlightError};

/// Dynamic loss scaler with overflow backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradScaler {
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: u32,
    growth_tracker: u32,
    consecutive_skips: u32,
    max_consecutive_skips: u32,
    min_scale: f64,
    max_scale: f64,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self {
            scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
            consecutive_skips: 0,
            max_consecutive_skips: 8,
            min_scale: 1.0,
            max_scale: 65536.0,
        }
    }
}

impl GradScaler {
    /// Scaler with a custom consecutive-skip budget
    pub fn with_max_skips(max_consecutive_skips: u32) -> Self {
        Self {
            max_consecutive_skips: max_consecutive_skips.max(1),
            ..Default::default()
        }
    }

    /// Current scale factor
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Consecutive overflow-skipped steps since the last applied update
    pub fn consecutive_skips(&self) -> u32 {
        self.consecutive_skips
    }

    /// Record an applied update: reset the skip run, grow the scale after the
    /// configured number of uninterrupted successes.
    pub fn record_success(&mut self) {
        self.consecutive_skips = 0;
        self.growth_tracker += 1;
        if self.growth_tracker >= self.growth_interval {
            let grown = (self.scale * self.growth_factor).clamp(self.min_scale, self.max_scale);
            if grown > self.scale {
                debug!("Loss scale grown: {} -> {}", self.scale, grown);
            }
            self.scale = grown;
            self.growth_tracker = 0;
        }
    }

    /// Record an overflowed (skipped) step at the given global step: back the
    /// scale off and fail the run once the skip budget is exhausted.
    pub fn record_overflow(&mut self, step: u64) -> Result<()> {
        self.consecutive_skips += 1;
        self.growth_tracker = 0;
        let reduced = (self.scale * self.backoff_factor).clamp(self.min_scale, self.max_scale);
        warn!(
            "Non-finite loss at step {}; update skipped, scale {} -> {} ({}/{} skips)",
            step, self.scale, reduced, self.consecutive_skips, self.max_consecutive_skips
        );
        self.scale = reduced;

        if self.consecutive_skips >= self.max_consecutive_skips {
            return Err(ShlightError::NumericDivergence {
                step,
                skipped: self.consecutive_skips,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_backs_off() {
        let mut scaler = GradScaler::default();
        assert_eq!(scaler.scale(), 65536.0);
        scaler.record_overflow(1).unwrap();
        assert_eq!(scaler.scale(), 32768.0);
        scaler.record_overflow(2).unwrap();
        assert_eq!(scaler.scale(), 16384.0);
    }

    #[test]
    fn test_success_resets_skip_run() {
        let mut scaler = GradScaler::with_max_skips(3);
        scaler.record_overflow(1).unwrap();
        scaler.record_overflow(2).unwrap();
        scaler.record_success();
        assert_eq!(scaler.consecutive_skips(), 0);
        // budget is available again
        scaler.record_overflow(3).unwrap();
        scaler.record_overflow(4).unwrap();
    }

    #[test]
    fn test_divergence_after_skip_budget() {
        let mut scaler = GradScaler::with_max_skips(3);
        scaler.record_overflow(10).unwrap();
        scaler.record_overflow(11).unwrap();
        let err = scaler.record_overflow(12).unwrap_err();
        match err {
            ShlightError::NumericDivergence { step, skipped } => {
                assert_eq!(step, 12);
                assert_eq!(skipped, 3);
            }
            other => panic!("expected NumericDivergence, got {other}"),
        }
    }

    #[test]
    fn test_growth_on_interval() {
        let mut scaler = GradScaler {
            scale: 1024.0,
            growth_interval: 3,
            ..Default::default()
        };
        scaler.record_success();
        scaler.record_success();
        assert_eq!(scaler.scale(), 1024.0);
        scaler.record_success();
        assert_eq!(scaler.scale(), 2048.0);
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut scaler = GradScaler {
            scale: 65536.0,
            growth_interval: 1,
            ..Default::default()
        };
        scaler.record_success();
        assert_eq!(scaler.scale(), 65536.0);

        let mut scaler = GradScaler {
            scale: 1.0,
            ..Default::default()
        };
        scaler.record_overflow(1).unwrap();
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn test_overflow_resets_growth_tracker() {
        let mut scaler = GradScaler {
            scale: 1024.0,
            growth_interval: 2,
            ..Default::default()
        };
        scaler.record_success();
        scaler.record_overflow(1).unwrap();
        scaler.record_success();
        // tracker restarted after the overflow, no growth yet
        assert_eq!(scaler.scale(), 512.0);
    }
}
