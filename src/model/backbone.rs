//! Convolutional Feature Extractor
//!
//! An ordered stack of conv blocks, each halving the spatial resolution. Inputs are
//! raw [0, 1] RGB batches; ImageNet normalization is applied by the stem so that a
//! pretrained record sees the statistics it was trained on.

use std::path::Path;

use burn::{
    module::{AutodiffModule, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, backend::Backend, Tensor, TensorData},
};

use crate::model::partition::BackbonePartition;
use crate::utils::error::{PipelineError, Result};

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Conv2d -> BatchNorm -> ReLU -> MaxPool(2)
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Pretrained feature extractor without a classification head
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> Backbone<B> {
    /// Build a randomly initialized backbone with the given block widths
    pub fn new(channels: &[usize], device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(channels.len());
        let mut in_channels = 3;
        for &out_channels in channels {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }
        Self { blocks }
    }

    /// Number of blocks
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Feature channels produced by the last block
    pub fn out_channels(&self) -> usize {
        self.blocks
            .last()
            .map(|block| block.bn.gamma.val().dims()[0])
            .unwrap_or(3)
    }

    /// Apply ImageNet normalization: (x - mean) / std
    pub fn normalize(x: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = x.device();
        let mean = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]), &device);
        let std = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]), &device);
        (x - mean) / std
    }

    /// Full forward pass, every block trainable
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(Self::normalize(x), |x, block| block.forward(x))
    }

    /// Load a pretrained record saved with the compact recorder
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        self.load_file(path, &CompactRecorder::new(), device).map_err(|e| {
            PipelineError::Training(format!(
                "failed to load pretrained backbone from {}: {:?}",
                path.display(),
                e
            ))
        })
    }

    /// Persist the backbone weights with the compact recorder
    pub fn save_pretrained(&self, path: &Path) -> Result<()> {
        self.clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| PipelineError::Training(format!("failed to save backbone: {:?}", e)))
    }
}

impl<B: AutodiffBackend> Backbone<B> {
    /// Forward pass honoring a freeze partition
    ///
    /// Frozen blocks run on the inner backend in inference mode: no gradients reach
    /// their parameters and their batch-norm statistics stay fixed.
    pub fn forward_partitioned(&self, x: Tensor<B, 4>, partition: &BackbonePartition) -> Tensor<B, 4> {
        let frozen = partition.frozen_range();
        let trainable = partition.trainable_range();

        let mut inner = Backbone::<B::InnerBackend>::normalize(x.inner());
        for block in &self.blocks[frozen] {
            inner = block.valid().forward(inner);
        }

        self.blocks[trainable]
            .iter()
            .fold(Tensor::from_inner(inner), |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type TrainBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_backbone_halves_resolution_per_block() {
        let device = Default::default();
        let backbone = Backbone::<TestBackend>::new(&[4, 8, 16], &device);

        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let features = backbone.forward(x);

        assert_eq!(features.dims(), [2, 16, 4, 4]);
        assert_eq!(backbone.num_blocks(), 3);
        assert_eq!(backbone.out_channels(), 16);
    }

    #[test]
    fn test_normalize_centers_imagenet_mean() {
        let device = Default::default();
        let data: Vec<f32> = IMAGENET_MEAN.to_vec();
        let x = Tensor::<TestBackend, 4>::from_floats(TensorData::new(data, [1, 3, 1, 1]), &device);

        let normalized: Vec<f32> = Backbone::normalize(x).into_data().to_vec().unwrap();
        assert!(normalized.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_frozen_blocks_receive_no_gradients() {
        let device = Default::default();
        let backbone = Backbone::<TrainBackend>::new(&[4, 8], &device);
        let partition = BackbonePartition::fine_tune_last(2, 1);

        let x = Tensor::<TrainBackend, 4>::ones([2, 3, 8, 8], &device);
        let loss = backbone.forward_partitioned(x, &partition).sum();
        let grads = loss.backward();

        assert!(backbone.blocks[0].conv.weight.grad(&grads).is_none());
        assert!(backbone.blocks[1].conv.weight.grad(&grads).is_some());
    }

    #[test]
    fn test_pretrained_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("backbone.mpk");
        let device = Default::default();

        let saved = Backbone::<TestBackend>::new(&[4], &device);
        saved.save_pretrained(&path).unwrap();

        let loaded = Backbone::<TestBackend>::new(&[4], &device)
            .load_pretrained(&path, &device)
            .unwrap();
        let a: Vec<f32> = saved.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            // compact records store half precision
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_missing_pretrained_record_is_training_error() {
        let device = Default::default();
        let err = Backbone::<TestBackend>::new(&[4], &device)
            .load_pretrained(Path::new("/nonexistent/backbone.mpk"), &device)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Training(_)));
    }
}
