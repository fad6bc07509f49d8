//! Burn Dataset Integration
//!
//! Lesion items and the Burn batcher that stacks them into tensors.
//! Batches keep pixel values in [0, 1]; ImageNet normalization happens inside the
//! backbone stem so every stream feeds the model the same way.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use image::ImageReader;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::Augmenter;
use crate::utils::error::{PipelineError, Result};

/// A single lesion item ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LesionItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl LesionItem {
    /// Decode an image and run it through the augmenter
    ///
    /// With `rng` set the augmenter's random transforms are applied; without it the
    /// image is only resized and rescaled.
    pub fn from_path(
        path: &Path,
        label: usize,
        augmenter: &Augmenter,
        rng: Option<&mut ChaCha8Rng>,
    ) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| PipelineError::Image(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| PipelineError::Image(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| PipelineError::Image(path.to_path_buf(), e.to_string()))?;

        Ok(Self {
            image: augmenter.preprocess(img, rng),
            label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Create from pre-loaded image data
    pub fn from_data(image: Vec<f32>, label: usize, path: String) -> Self {
        Self { image, label, path }
    }

    /// Explicit one-hot label vector over `num_classes`
    pub fn one_hot(&self, num_classes: usize) -> Vec<f32> {
        let mut encoded = vec![0.0f32; num_classes];
        if let Some(slot) = encoded.get_mut(self.label) {
            *slot = 1.0;
        }
        encoded
    }
}

/// A batch of lesion images
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width], values in [0, 1]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> LesionBatch<B> {
    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batcher for creating lesion batches
#[derive(Clone, Debug)]
pub struct LesionBatcher {
    image_size: usize,
}

impl LesionBatcher {
    /// Create a batcher for square images of `image_size`
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let batch_size = items.len();
        let channels = 3;
        let height = self.image_size;
        let width = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * channels * height * width);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LesionBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_one_hot_sets_single_slot() {
        let item = LesionItem::from_data(vec![], 2, "x.jpg".into());
        assert_eq!(item.one_hot(4), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(item.one_hot(4).iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_undecodable_image_is_image_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let err = LesionItem::from_path(&path, 0, &Augmenter::no_augmentation(8), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Image(..)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let items = vec![
            LesionItem::from_data(vec![0.5; 3 * 4 * 4], 0, "a".into()),
            LesionItem::from_data(vec![0.25; 3 * 4 * 4], 1, "b".into()),
            LesionItem::from_data(vec![1.0; 3 * 4 * 4], 1, "c".into()),
        ];

        let batch: LesionBatch<TestBackend> = LesionBatcher::new(4).batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 4, 4]);
        assert_eq!(batch.len(), 3);
        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1, 1]);
    }
}
