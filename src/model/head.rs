//! Classification Head
//!
//! Global average pooling followed by dense blocks
//! (Linear -> ReLU -> BatchNorm -> Dropout) and the output layer.

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Linear -> ReLU -> BatchNorm -> Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
    pub relu: Relu,
    pub bn: BatchNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(in_features: usize, out_features: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(in_features, out_features).init(device),
            relu: Relu::new(),
            bn: BatchNormConfig::new(out_features).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = self.relu.forward(x);

        // batch norm expects channels on dim 1 with spatial dims after it
        let [batch_size, features] = x.dims();
        let x = self.bn.forward(x.reshape([batch_size, features, 1, 1]));
        let x = x.reshape([batch_size, features]);

        self.dropout.forward(x)
    }
}

/// Custom head placed on top of the backbone
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub global_pool: AdaptiveAvgPool2d,
    pub blocks: Vec<DenseBlock<B>>,
    pub output: Linear<B>,
}

impl<B: Backend> ClassificationHead<B> {
    /// Build the head for `in_features` backbone channels
    ///
    /// `units` and `dropout` are index-aligned.
    pub fn new(
        in_features: usize,
        units: &[usize],
        dropout: &[f64],
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let mut blocks = Vec::with_capacity(units.len());
        let mut width = in_features;
        for (&out, &rate) in units.iter().zip(dropout) {
            blocks.push(DenseBlock::new(width, out, rate, device));
            width = out;
        }

        Self {
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            blocks,
            output: LinearConfig::new(width, num_classes).init(device),
        }
    }

    /// Map backbone features [B, C, H, W] to logits [B, num_classes]
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.output.forward(x)
    }
}
