//! Train/validation split
//!
//! Partitions a dataset's index range into two disjoint sets using a seeded
//! pseudo-random permutation. The same seed and length always produce the same
//! partition, so splits are reproducible across runs and across resumed trainings.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{Result, ShlightError};

/// A reproducible train/validation index partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplit {
    /// Indices assigned to the training subset
    pub train: Vec<usize>,
    /// Indices assigned to the validation subset
    pub validation: Vec<usize>,
    /// Seed the permutation was drawn from
    pub seed: u64,
    /// Configured training fraction
    pub train_fraction: f64,
}

/// Split `0..len` into train/validation index sets.
///
/// The first `floor(train_fraction * len)` indices of a ChaCha8-seeded permutation
/// go to train, the remainder to validation. Fails with
/// [`ShlightError::InvalidFraction`] if the fraction is outside (0, 1) or either
/// side would end up empty.
pub fn split_indices(len: usize, train_fraction: f64, seed: u64) -> Result<DatasetSplit> {
    if !train_fraction.is_finite() || train_fraction <= 0.0 || train_fraction >= 1.0 {
        return Err(ShlightError::InvalidFraction {
            fraction: train_fraction,
            detail: "must lie strictly between 0 and 1".to_string(),
        });
    }

    let train_len = (train_fraction * len as f64).floor() as usize;
    if train_len == 0 || train_len == len {
        return Err(ShlightError::InvalidFraction {
            fraction: train_fraction,
            detail: format!(
                "would leave an empty subset for {} samples (train {}, validation {})",
                len,
                train_len,
                len - train_len
            ),
        });
    }

    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let validation = indices.split_off(train_len);

    info!(
        "Split {} samples: {} train / {} validation (fraction {:.3}, seed {})",
        len,
        indices.len(),
        validation.len(),
        train_fraction,
        seed
    );

    Ok(DatasetSplit {
        train: indices,
        validation,
        seed,
        train_fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_split_is_reproducible() {
        let a = split_indices(100, 0.98, 42).unwrap();
        let b = split_indices(100, 0.98, 42).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.validation, b.validation);
    }

    #[test]
    fn test_split_proportions() {
        let split = split_indices(100, 0.98, 42).unwrap();
        assert_eq!(split.train.len(), 98);
        assert_eq!(split.validation.len(), 2);
    }

    #[test]
    fn test_split_is_disjoint_and_covers() {
        let split = split_indices(257, 0.9, 7).unwrap();
        let train: HashSet<_> = split.train.iter().copied().collect();
        let val: HashSet<_> = split.validation.iter().copied().collect();

        assert!(train.is_disjoint(&val));
        assert_eq!(train.len() + val.len(), 257);
        assert!(train.union(&val).all(|&i| i < 257));
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = split_indices(100, 0.9, 1).unwrap();
        let b = split_indices(100, 0.9, 2).unwrap();
        assert_ne!(a.train, b.train);
    }

    #[test]
    fn test_invalid_fractions() {
        assert!(matches!(
            split_indices(100, 0.0, 0),
            Err(ShlightError::InvalidFraction { .. })
        ));
        assert!(matches!(
            split_indices(100, 1.0, 0),
            Err(ShlightError::InvalidFraction { .. })
        ));
        assert!(matches!(
            split_indices(100, f64::NAN, 0),
            Err(ShlightError::InvalidFraction { .. })
        ));
    }

    #[test]
    fn test_empty_subset_rejected() {
        // 1 sample can never be split in two
        assert!(matches!(
            split_indices(1, 0.5, 0),
            Err(ShlightError::InvalidFraction { .. })
        ));
        // fraction small enough to floor to zero train samples
        assert!(matches!(
            split_indices(10, 0.05, 0),
            Err(ShlightError::InvalidFraction { .. })
        ));
    }
}
