//! Model Builder
//!
//! Assembles the classifier from the configured backbone and head, loads pretrained
//! backbone weights when configured and hands back the initial (fully frozen)
//! partition.

use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::model::classifier::LesionClassifier;
use crate::model::partition::BackbonePartition;
use crate::utils::error::Result;

/// A freshly built classifier and its freeze partition
#[derive(Debug)]
pub struct BuiltModel<B: Backend> {
    pub model: LesionClassifier<B>,
    pub partition: BackbonePartition,
}

impl<B: Backend> BuiltModel<B> {
    /// Total parameter count
    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    /// Parameter count of the backbone alone
    pub fn backbone_params(&self) -> usize {
        self.model.backbone.num_params()
    }
}

/// Builds classifiers from a pipeline configuration
pub struct ModelBuilder;

impl ModelBuilder {
    /// Build the classifier with its backbone frozen
    ///
    /// A configured pretrained record that fails to load is a training error; no
    /// record at all falls back to random initialization with a warning.
    pub fn build<B: Backend>(config: &PipelineConfig, device: &B::Device) -> Result<BuiltModel<B>> {
        let mut model = LesionClassifier::<B>::new(config, device);

        match &config.model.pretrained_weights {
            Some(path) => {
                info!("Loading pretrained backbone from {:?}", path);
                model.backbone = model.backbone.load_pretrained(path, device)?;
            }
            None => {
                warn!("No pretrained backbone configured; using random initialization");
            }
        }

        let partition = BackbonePartition::all_frozen(model.backbone.num_blocks());
        let built = BuiltModel { model, partition };

        info!(
            "Built classifier: {} parameters ({} in backbone), {}",
            built.num_params(),
            built.backbone_params(),
            built.partition
        );

        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::smoke_config;
    use crate::utils::error::PipelineError;
    use burn_ndarray::NdArray;
    use std::path::PathBuf;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_build_starts_fully_frozen() {
        let dir = TempDir::new().unwrap();
        let config = smoke_config(dir.path());
        let device = Default::default();

        let built = ModelBuilder::build::<TestBackend>(&config, &device).unwrap();

        assert_eq!(built.partition, BackbonePartition::all_frozen(2));
        assert_eq!(built.model.num_classes(), 2);
        assert!(built.num_params() > built.backbone_params());
    }

    #[test]
    fn test_build_loads_pretrained_backbone() {
        let dir = TempDir::new().unwrap();
        let mut config = smoke_config(dir.path());
        let device = Default::default();

        let donor = ModelBuilder::build::<TestBackend>(&config, &device).unwrap();
        let record = dir.path().join("backbone.mpk");
        donor.model.backbone.save_pretrained(&record).unwrap();
        config.model.pretrained_weights = Some(record);

        let built = ModelBuilder::build::<TestBackend>(&config, &device).unwrap();
        let a: Vec<f32> = donor.model.backbone.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = built.model.backbone.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2));
    }

    #[test]
    fn test_unloadable_pretrained_backbone_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = smoke_config(dir.path());
        config.model.pretrained_weights = Some(PathBuf::from("/nonexistent/backbone.mpk"));

        let err = ModelBuilder::build::<TestBackend>(&config, &Default::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Training(_)));
    }
}
