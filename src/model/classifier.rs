//! Transfer-Learning Lesion Classifier
//!
//! Architecture:
//! - Pretrained convolutional backbone (original classification head removed)
//! - Global average pooling
//! - Dense blocks with batch norm and decreasing dropout
//! - Output layer; softmax is applied by [`LesionClassifier::forward_softmax`]

use std::path::Path;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, backend::Backend, Tensor},
};

use crate::config::PipelineConfig;
use crate::model::backbone::Backbone;
use crate::model::head::ClassificationHead;
use crate::model::partition::BackbonePartition;
use crate::utils::error::{PipelineError, Result};

/// Skin lesion classifier
#[derive(Module, Debug)]
pub struct LesionClassifier<B: Backend> {
    /// Feature extractor (public for partitioned training and export)
    pub backbone: Backbone<B>,
    /// Custom classification head
    pub head: ClassificationHead<B>,

    num_classes: usize,
}

impl<B: Backend> LesionClassifier<B> {
    /// Create a randomly initialized classifier shaped by `config`
    pub fn new(config: &PipelineConfig, device: &B::Device) -> Self {
        let backbone = Backbone::new(&config.model.backbone_channels, device);
        let head = ClassificationHead::new(
            backbone.out_channels(),
            &config.model.head_units,
            &config.model.head_dropout,
            config.data.num_classes,
            device,
        );

        Self {
            backbone,
            head,
            num_classes: config.data.num_classes,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width], values in [0, 1]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(x))
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Persist the full model with the compact recorder
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| {
                PipelineError::Training(format!(
                    "failed to write checkpoint {}: {:?}",
                    path.display(),
                    e
                ))
            })
    }

    /// Load weights from a checkpoint into this skeleton
    ///
    /// Errors are returned as `Export` because the checkpoint is read back only when
    /// evaluating or exporting a finished run.
    pub fn load_checkpoint(self, path: &Path, device: &B::Device) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::Export(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
        self.load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| {
                PipelineError::Export(format!(
                    "failed to load checkpoint {}: {:?}",
                    path.display(),
                    e
                ))
            })
    }
}

impl<B: AutodiffBackend> LesionClassifier<B> {
    /// Training forward pass; frozen backbone blocks get no gradient updates
    pub fn forward_partitioned(&self, x: Tensor<B, 4>, partition: &BackbonePartition) -> Tensor<B, 2> {
        self.head
            .forward(self.backbone.forward_partitioned(x, partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::smoke_config;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type TrainBackend = Autodiff<NdArray<f32>>;

    fn tiny_config() -> PipelineConfig {
        smoke_config(Path::new("/tmp/unused"))
    }

    #[test]
    fn test_default_topology_output_shape() {
        let device = Default::default();
        let mut config = PipelineConfig::default();
        // keep the default head but a cheap backbone
        config.model.backbone_channels = vec![8, 16];
        config.data.image_size = 16;
        let model = LesionClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [2, 7]);
        assert_eq!(model.num_classes(), 7);
        assert_eq!(model.head.blocks.len(), 3);
    }

    #[test]
    fn test_softmax_is_probability_distribution() {
        let device = Default::default();
        let model = LesionClassifier::<TestBackend>::new(&tiny_config(), &device);

        let input = Tensor::<TestBackend, 4>::random([4, 3, 16, 16], Distribution::Uniform(0.0, 1.0), &device);
        let probs = model.forward_softmax(input);
        assert_eq!(probs.dims(), [4, 2]);

        let values: Vec<f32> = probs.into_data().to_vec().unwrap();
        for row in values.chunks(2) {
            assert!(row.iter().all(|&p| p >= 0.0));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_partitioned_forward_trains_head_only_when_frozen() {
        let device = Default::default();
        let model = LesionClassifier::<TrainBackend>::new(&tiny_config(), &device);
        let partition = BackbonePartition::all_frozen(model.backbone.num_blocks());

        let input = Tensor::<TrainBackend, 4>::ones([2, 3, 16, 16], &device);
        let grads = model.forward_partitioned(input, &partition).sum().backward();

        assert!(model.backbone.blocks[1].conv.weight.grad(&grads).is_none());
        assert!(model.head.output.weight.grad(&grads).is_some());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("checkpoints/best_model.mpk");
        let device = Default::default();
        let config = tiny_config();

        let model = LesionClassifier::<TestBackend>::new(&config, &device);
        model.save_checkpoint(&path).unwrap();
        assert!(path.exists());

        let loaded = LesionClassifier::<TestBackend>::new(&config, &device)
            .load_checkpoint(&path, &device)
            .unwrap();
        assert_eq!(loaded.num_classes(), 2);
    }

    #[test]
    fn test_missing_checkpoint_is_export_error() {
        let device = Default::default();
        let err = LesionClassifier::<TestBackend>::new(&tiny_config(), &device)
            .load_checkpoint(Path::new("/nonexistent/best_model.mpk"), &device)
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
