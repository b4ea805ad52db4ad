//! Error Handling Module
//!
//! Defines the error taxonomy for the training pipeline. Uses thiserror for
//! ergonomic error definitions.
//!
//! Containment policy: per-sample errors (`MissingLabel`, `CoefficientCount`,
//! `InvalidCoefficient`, `ImageLoad`) are counted and skipped by the caller;
//! `InvalidFraction` and `Config` fail fast before training starts;
//! `NumericDivergence` aborts one training run (a surrounding search records it as a
//! failed trial); `CorruptCheckpoint` is recoverable by falling back to fresh state.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for shlight operations
#[derive(Error, Debug)]
pub enum ShlightError {
    /// An image has no matching coefficient file
    #[error("No coefficient file for image '{image}' (expected '{expected}')")]
    MissingLabel { image: PathBuf, expected: PathBuf },

    /// A coefficient file holds the wrong number of values
    #[error("Coefficient file '{path}' holds {found} values, expected {expected}")]
    CoefficientCount {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// A coefficient file contains a value that does not parse as a float
    #[error("Coefficient file '{path}' is malformed: {detail}")]
    InvalidCoefficient { path: PathBuf, detail: String },

    /// Error decoding or reading an image
    #[error("Failed to load image '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Malformed split configuration
    #[error("Invalid train fraction {fraction}: {detail}")]
    InvalidFraction { fraction: f64, detail: String },

    /// Loss stayed NaN/Inf after scale-factor backoff
    #[error("Numeric divergence at step {step} after {skipped} skipped updates")]
    NumericDivergence { step: u64, skipped: u32 },

    /// A checkpoint is missing components or unreadable
    #[error("Corrupt checkpoint at '{path}': {detail}")]
    CorruptCheckpoint { path: PathBuf, detail: String },

    /// Dataset-level error (empty directories, no valid pairs, ...)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type for shlight operations
pub type Result<T> = std::result::Result<T, ShlightError>;

impl ShlightError {
    /// Whether the error is contained at the sample level (skip-and-log)
    /// rather than propagated up the run.
    pub fn is_sample_error(&self) -> bool {
        matches!(
            self,
            Self::MissingLabel { .. }
                | Self::CoefficientCount { .. }
                | Self::InvalidCoefficient { .. }
                | Self::ImageLoad(..)
        )
    }
}
