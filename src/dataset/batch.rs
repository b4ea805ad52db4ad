//! Burn dataset and batcher integration
//!
//! `CoefficientDataset` is an index-subset view over a shared [`PairedSampleStore`]
//! implementing Burn's `Dataset` trait, so the dataloader's bounded worker pool can
//! prefetch and preprocess samples in parallel. Malformed samples are logged and
//! dropped here (the batch simply gets smaller); they never abort a step.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use tracing::{error, warn};

use super::store::PairedSampleStore;

/// A single loaded item ready for batching
#[derive(Clone, Debug)]
pub struct CoefficientItem {
    /// CHW image tensor data
    pub image: Vec<f32>,
    /// Target coefficient vector
    pub coefficients: Vec<f32>,
    /// Sample identifier (for logging)
    pub id: String,
}

/// Subset view over a shared sample store
#[derive(Debug, Clone)]
pub struct CoefficientDataset {
    store: Arc<PairedSampleStore>,
    indices: Vec<usize>,
}

impl CoefficientDataset {
    /// View over an explicit index subset (one side of a split)
    pub fn new(store: Arc<PairedSampleStore>, indices: Vec<usize>) -> Self {
        Self { store, indices }
    }
}

impl Dataset<CoefficientItem> for CoefficientDataset {
    fn get(&self, index: usize) -> Option<CoefficientItem> {
        let &store_index = self.indices.get(index)?;
        match self.store.get(store_index) {
            Ok(sample) => Some(CoefficientItem {
                image: sample.image,
                coefficients: sample.coefficients,
                id: sample.id,
            }),
            // Sample-level errors are expected and contained here; anything else
            // still cannot abort a step, but is logged louder.
            Err(e) if e.is_sample_error() => {
                warn!("Dropping sample {}: {}", store_index, e);
                None
            }
            Err(e) => {
                error!("Failed to load sample {}: {}", store_index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// A batch of samples for training or evaluation
#[derive(Clone, Debug)]
pub struct CoefficientBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Coefficient targets with shape [batch_size, num_coefficients]
    pub targets: Tensor<B, 2>,
}

/// Batcher stacking items into image/target tensors
#[derive(Clone, Debug)]
pub struct CoefficientBatcher<B: Backend> {
    device: B::Device,
    height: usize,
    width: usize,
    num_coefficients: usize,
}

impl<B: Backend> CoefficientBatcher<B> {
    /// Create a batcher matching the store's preprocessing output shape
    pub fn new(device: B::Device, store: &PairedSampleStore) -> Self {
        let pre = store.preprocessor();
        Self {
            device,
            height: pre.height as usize,
            width: pre.width as usize,
            num_coefficients: store.expected_coefficients(),
        }
    }

    /// Create a batcher with explicit dimensions
    pub fn with_shape(
        device: B::Device,
        height: usize,
        width: usize,
        num_coefficients: usize,
    ) -> Self {
        Self {
            device,
            height,
            width,
            num_coefficients,
        }
    }
}

impl<B: Backend> Batcher<CoefficientItem, CoefficientBatch<B>> for CoefficientBatcher<B> {
    fn batch(&self, items: Vec<CoefficientItem>) -> CoefficientBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, 3, self.height, self.width]),
            &self.device,
        );

        let targets_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.coefficients.clone())
            .collect();
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets_data, [batch_size, self.num_coefficients]),
            &self.device,
        );

        CoefficientBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    fn item(fill: f32) -> CoefficientItem {
        CoefficientItem {
            image: vec![fill; 3 * 4 * 8],
            coefficients: vec![fill; 5],
            id: format!("item-{fill}"),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = CoefficientBatcher::<DefaultBackend>::with_shape(default_device(), 4, 8, 5);
        let batch = batcher.batch(vec![item(0.0), item(1.0), item(2.0)]);

        assert_eq!(batch.images.dims(), [3, 3, 4, 8]);
        assert_eq!(batch.targets.dims(), [3, 5]);
    }

    #[test]
    fn test_malformed_sample_is_dropped() {
        use crate::dataset::store::{PairedSampleStore, StoreConfig};
        use crate::dataset::transform::Preprocessor;
        use image::{Rgb, RgbImage};
        use tempfile::TempDir;

        let images = TempDir::new().unwrap();
        let labels = TempDir::new().unwrap();
        let mut img = RgbImage::new(8, 8);
        for p in img.pixels_mut() {
            *p = Rgb([10, 20, 30]);
        }
        img.save(images.path().join("a.png")).unwrap();
        std::fs::write(labels.path().join("a.txt"), "1.0,nope,3.0").unwrap();

        let store = PairedSampleStore::open(
            images.path(),
            labels.path(),
            StoreConfig {
                expected_coefficients: 3,
                preprocessor: Preprocessor::with_size(4, 4),
            },
        )
        .unwrap();

        let dataset = CoefficientDataset::new(Arc::new(store), vec![0]);
        assert_eq!(dataset.len(), 1);
        // the malformed label is contained here, never aborting a batch
        assert!(dataset.get(0).is_none());
    }

    #[test]
    fn test_batch_preserves_values() {
        let batcher = CoefficientBatcher::<DefaultBackend>::with_shape(default_device(), 4, 8, 5);
        let batch = batcher.batch(vec![item(0.5), item(-1.5)]);

        let targets: Vec<f32> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(&targets[..5], &[0.5; 5]);
        assert_eq!(&targets[5..], &[-1.5; 5]);
    }
}
