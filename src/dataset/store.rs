//! Paired sample store
//!
//! Enumerates (image, coefficient-vector) pairs from two parallel directories. The
//! image directory is scanned for recognized extensions; for each image the expected
//! label path is derived by extension substitution (`a.png` -> `a.txt`). Images
//! without a matching label file are skipped with a logged [`ShlightError::MissingLabel`]
//! and counted, never synthesized.
//!
//! The store is stateless across `get` calls and `Send + Sync`, so dataloader
//! workers can share it read-only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::transform::Preprocessor;
use super::{IMAGE_EXTENSIONS, LABEL_EXTENSION};
use crate::utils::error::{Result, ShlightError};
use crate::NUM_COEFFICIENTS;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Expected length of every coefficient vector
    pub expected_coefficients: usize,
    /// Preprocessing pipeline applied to every image
    pub preprocessor: Preprocessor,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            expected_coefficients: NUM_COEFFICIENTS,
            preprocessor: Preprocessor::default(),
        }
    }
}

/// One enumerated image/label pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Identifier derived from the image file stem
    pub id: String,
    /// Path to the image file
    pub image_path: PathBuf,
    /// Path to the matching coefficient file
    pub label_path: PathBuf,
}

/// A fully loaded sample: preprocessed image tensor plus coefficient vector
#[derive(Debug, Clone)]
pub struct Sample {
    /// Identifier derived from the image filename
    pub id: String,
    /// CHW image tensor data, normalized
    pub image: Vec<f32>,
    /// Target coefficient vector
    pub coefficients: Vec<f32>,
}

/// Paired image/coefficient sample store with lazy loading
#[derive(Debug)]
pub struct PairedSampleStore {
    /// Directory holding the images
    pub image_dir: PathBuf,
    /// Directory holding the coefficient files
    pub label_dir: PathBuf,
    config: StoreConfig,
    records: Vec<SampleRecord>,
    skipped: usize,
}

impl PairedSampleStore {
    /// Enumerate both directories and build the pair index.
    ///
    /// The record order is fixed (sorted by image filename) so that index-based
    /// splits are reproducible across runs on the same directory contents.
    pub fn open<P: AsRef<Path>>(image_dir: P, label_dir: P, config: StoreConfig) -> Result<Self> {
        let image_dir = image_dir.as_ref().to_path_buf();
        let label_dir = label_dir.as_ref().to_path_buf();

        if !image_dir.is_dir() {
            return Err(ShlightError::Dataset(format!(
                "image directory does not exist: {}",
                image_dir.display()
            )));
        }
        if !label_dir.is_dir() {
            return Err(ShlightError::Dataset(format!(
                "label directory does not exist: {}",
                label_dir.display()
            )));
        }

        info!(
            "Indexing samples from {} / {}",
            image_dir.display(),
            label_dir.display()
        );

        let mut image_paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&image_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                image_paths.push(path);
            }
        }
        image_paths.sort();

        let mut records = Vec::with_capacity(image_paths.len());
        let mut skipped = 0usize;

        for image_path in image_paths {
            let label_path = image_path
                .with_extension(LABEL_EXTENSION)
                .file_name()
                .map(|name| label_dir.join(name))
                .unwrap_or_else(|| label_dir.clone());

            if !label_path.is_file() {
                let err = ShlightError::MissingLabel {
                    image: image_path.clone(),
                    expected: label_path,
                };
                warn!("Skipping sample: {}", err);
                skipped += 1;
                continue;
            }

            let id = image_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            records.push(SampleRecord {
                id,
                image_path,
                label_path,
            });
        }

        info!(
            "Indexed {} samples ({} skipped without labels)",
            records.len(),
            skipped
        );

        Ok(Self {
            image_dir,
            label_dir,
            config,
            records,
            skipped,
        })
    }

    /// Number of valid pairs found at construction time
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no valid pair was found
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of images skipped for lack of a matching label file
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The enumerated pair records, in index order
    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// The store's preprocessing pipeline
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.config.preprocessor
    }

    /// Expected coefficient vector length
    pub fn expected_coefficients(&self) -> usize {
        self.config.expected_coefficients
    }

    /// Load the i-th sample: decode + preprocess the image, parse the label file.
    pub fn get(&self, index: usize) -> Result<Sample> {
        let record = self.records.get(index).ok_or_else(|| {
            ShlightError::Dataset(format!(
                "sample index {} out of range (len {})",
                index,
                self.records.len()
            ))
        })?;

        let image = self.config.preprocessor.load(&record.image_path)?;
        let coefficients =
            parse_coefficients(&record.label_path, self.config.expected_coefficients)?;

        debug!("Loaded sample '{}'", record.id);

        Ok(Sample {
            id: record.id.clone(),
            image,
            coefficients,
        })
    }
}

/// Parse a coefficient file: one or more lines of comma-separated floats,
/// concatenated in file order. The value count must match `expected` exactly;
/// vectors are never truncated or padded.
pub fn parse_coefficients(path: &Path, expected: usize) -> Result<Vec<f32>> {
    let text = std::fs::read_to_string(path)?;
    let mut values = Vec::with_capacity(expected);

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        for field in line.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let value: f32 = field.parse().map_err(|_| ShlightError::InvalidCoefficient {
                path: path.to_path_buf(),
                detail: format!("'{}' is not a float", field),
            })?;
            values.push(value);
        }
    }

    if values.len() != expected {
        return Err(ShlightError::CoefficientCount {
            path: path.to_path_buf(),
            expected,
            found: values.len(),
        });
    }

    Ok(values)
}
