//! Checkpoint to deployment-artifact export

use std::path::PathBuf;

use burn::{module::Module, prelude::*};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::export::artifact::Artifact;
use crate::export::quantize::{quantize_model, QuantizedModel};
use crate::model::LesionClassifier;
use crate::utils::error::Result;
use crate::utils::format_megabytes;

/// Summary of a written artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Parameters stored as int8
    pub quantized_tensors: usize,
    pub num_parameters: usize,
}

impl ExportReport {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Converts the persisted checkpoint into a quantized artifact
pub struct Exporter;

impl Exporter {
    /// Load the checkpoint into a fresh skeleton, quantize it and write the artifact
    pub fn export<B: Backend>(config: &PipelineConfig, device: &B::Device) -> Result<ExportReport> {
        let checkpoint = config.output.checkpoint_file();
        info!("Loading checkpoint {:?} for export", checkpoint);

        let model = LesionClassifier::<B>::new(config, device).load_checkpoint(&checkpoint, device)?;
        let num_parameters = model.num_params();
        let artifact = Self::build_artifact(model, config)?;

        // the deployable record must decode into the same topology
        artifact.load_model::<B>(config, device)?;
        debug!("Quantized record decodes into a {}-class model", config.data.num_classes);

        let path = config.output.export_path.clone();
        let size_bytes = artifact.write(&path)?;

        let report = ExportReport {
            path,
            size_bytes,
            quantized_tensors: artifact.quantized.len(),
            num_parameters,
        };

        info!(
            "Exported {} parameters ({} int8 tensors) to {:?}: {} bytes ({})",
            report.num_parameters,
            report.quantized_tensors,
            report.path,
            report.size_bytes,
            format_megabytes(report.size_bytes)
        );

        Ok(report)
    }

    /// Quantize `model` and package it with the deployment metadata
    pub fn build_artifact<B: Backend>(model: LesionClassifier<B>, config: &PipelineConfig) -> Result<Artifact> {
        let QuantizedModel { model, quantized } = quantize_model(model)?;
        Artifact::from_model(model, quantized, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::{class_list, smoke_config};
    use crate::utils::error::PipelineError;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn saved_checkpoint(dir: &TempDir) -> PipelineConfig {
        let config = smoke_config(dir.path());
        let device = Default::default();
        LesionClassifier::<TestBackend>::new(&config, &device)
            .save_checkpoint(&config.output.checkpoint_file())
            .unwrap();
        config
    }

    fn weights<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_export_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let mut config = saved_checkpoint(&dir);
        let device = Default::default();

        let first = Exporter::export::<TestBackend>(&config, &device).unwrap();
        let first_bytes = std::fs::read(&first.path).unwrap();

        config.output.export_path = dir.path().join("models/second.dfq");
        let second = Exporter::export::<TestBackend>(&config, &device).unwrap();
        let second_bytes = std::fs::read(&second.path).unwrap();

        assert_eq!(first.size_bytes, second.size_bytes);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(first.size_bytes, first_bytes.len() as u64);
    }

    #[test]
    fn test_artifact_holds_quantized_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = saved_checkpoint(&dir);
        let device = Default::default();

        let report = Exporter::export::<TestBackend>(&config, &device).unwrap();
        let artifact = Artifact::read(&report.path).unwrap();

        assert_eq!(artifact.class_names, config.data.class_names);
        assert_eq!(artifact.image_size, 16);
        // 2 conv blocks + 2 dense blocks + output layer
        assert_eq!(report.quantized_tensors, 5);
        assert_eq!(artifact.quantized.len(), 5);
        assert!(report.num_parameters > 0);
        assert!(report.size_mb() > 0.0);

        let checkpoint = LesionClassifier::<TestBackend>::new(&config, &device)
            .load_checkpoint(&config.output.checkpoint_file(), &device)
            .unwrap();
        let deployed = artifact.load_model::<TestBackend>(&config, &device).unwrap();

        let original = weights(checkpoint.head.output.weight.val());
        let restored = weights(deployed.head.output.weight.val().dequantize());
        let max_abs = original.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        for (a, b) in original.iter().zip(&restored) {
            assert!((a - b).abs() <= max_abs / 127.0 + 1e-5);
        }

        let bias = weights(deployed.head.output.bias.as_ref().unwrap().val());
        assert_eq!(bias, weights(checkpoint.head.output.bias.as_ref().unwrap().val()));
    }

    #[test]
    fn test_artifact_refuses_foreign_class_list() {
        let dir = TempDir::new().unwrap();
        let mut config = saved_checkpoint(&dir);
        let device = Default::default();

        let report = Exporter::export::<TestBackend>(&config, &device).unwrap();
        let artifact = Artifact::read(&report.path).unwrap();

        config.data.class_names = class_list(&["melanoma", "dermatofibroma"]);
        let err = artifact.load_model::<TestBackend>(&config, &device).unwrap_err();
        assert!(matches!(err, PipelineError::Export(_)));
    }

    #[test]
    fn test_missing_checkpoint_is_export_error() {
        let dir = TempDir::new().unwrap();
        let config = smoke_config(dir.path());

        let err = Exporter::export::<TestBackend>(&config, &Default::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Export(_)));
        assert!(!config.output.export_path.exists());
    }
}
