//! Pipeline Configuration
//!
//! A single immutable [`PipelineConfig`] is read once (TOML) and threaded by reference
//! through every stage. Defaults mirror the shipping DermFuse training setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::utils::error::{PipelineError, Result};

/// Skin lesion classes, index-aligned with the model output
pub const DEFAULT_CLASS_NAMES: [&str; 7] = [
    "melanoma",
    "basal_cell_carcinoma",
    "squamous_cell_carcinoma",
    "benign_nevi",
    "dermatofibroma",
    "vascular_lesions",
    "other_conditions",
];

/// Top-level configuration for a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub augmentation: AugmentationConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

/// Dataset locations, geometry and class list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Training partition root (one subdirectory per class)
    pub train_dir: PathBuf,
    /// Validation partition root
    pub val_dir: PathBuf,
    /// Test partition root
    pub test_dir: PathBuf,
    /// Square target size images are resized to
    pub image_size: usize,
    /// Samples per batch
    pub batch_size: usize,
    /// Number of classes; must equal `class_names.len()`
    pub num_classes: usize,
    /// Ordered class names, index-aligned with the model output
    pub class_names: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/processed/train"),
            val_dir: PathBuf::from("data/processed/val"),
            test_dir: PathBuf::from("data/processed/test"),
            image_size: 224,
            batch_size: 32,
            num_classes: DEFAULT_CLASS_NAMES.len(),
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DataConfig {
    /// Point all three partitions at `<root>/{train,val,test}`
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        self.train_dir = root.join("train");
        self.val_dir = root.join("val");
        self.test_dir = root.join("test");
        self
    }
}

/// Classifier architecture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Output channels of each backbone block, shallow to deep
    pub backbone_channels: Vec<usize>,
    /// Pretrained backbone record (CompactRecorder); random init when absent
    pub pretrained_weights: Option<PathBuf>,
    /// Widths of the dense head layers
    pub head_units: Vec<usize>,
    /// Dropout after each dense head layer
    pub head_dropout: Vec<f64>,
    /// Deepest backbone blocks unfrozen for phase 2
    pub fine_tune_blocks: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone_channels: vec![32, 64, 128, 256, 512],
            pretrained_weights: None,
            head_units: vec![512, 256, 128],
            head_dropout: vec![0.5, 0.4, 0.3],
            fine_tune_blocks: 2,
        }
    }
}

/// Optimization schedule and monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Epoch budget with the backbone frozen
    pub phase1_epochs: usize,
    /// Additional epoch budget for fine-tuning
    pub phase2_epochs: usize,
    /// Base learning rate for phase 1
    pub learning_rate: f64,
    /// Multiplier applied to the base rate in phase 2
    pub fine_tune_lr_factor: f64,
    /// Adam weight decay penalty (0 disables)
    pub weight_decay: f32,
    /// Epochs without val_loss improvement before a phase halts
    pub early_stopping_patience: usize,
    /// Epochs of val_loss plateau before the rate is reduced
    pub reduce_lr_patience: usize,
    /// Factor applied on plateau
    pub reduce_lr_factor: f64,
    /// Smallest val_loss decrease that counts as an improvement for the decay
    pub reduce_lr_min_delta: f64,
    /// Learning-rate floor
    pub min_learning_rate: f64,
    /// Seed for shuffling and augmentation
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            phase1_epochs: 20,
            phase2_epochs: 30,
            learning_rate: 0.001,
            fine_tune_lr_factor: 0.1,
            weight_decay: 0.0,
            early_stopping_patience: 10,
            reduce_lr_patience: 5,
            reduce_lr_factor: 0.5,
            reduce_lr_min_delta: 1e-4,
            min_learning_rate: 1e-7,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Learning rate phase 2 starts from
    pub fn fine_tune_learning_rate(&self) -> f64 {
        self.learning_rate * self.fine_tune_lr_factor
    }

    /// Total epoch budget across both phases
    pub fn total_epochs(&self) -> usize {
        self.phase1_epochs + self.phase2_epochs
    }
}

/// Where artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Best-model checkpoint (the recorder stores it with an `.mpk` extension)
    pub checkpoint_path: PathBuf,
    /// Quantized deployment artifact
    pub export_path: PathBuf,
    /// Charts, CSV and JSON reports
    pub results_dir: PathBuf,
    /// Draw per-batch progress bars
    pub show_progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("models/checkpoints/best_model.mpk"),
            export_path: PathBuf::from("models/dermfuse_model.dfq"),
            results_dir: PathBuf::from("results"),
            show_progress: true,
        }
    }
}

impl OutputConfig {
    /// Path the recorder actually writes
    pub fn checkpoint_file(&self) -> PathBuf {
        self.checkpoint_path.with_extension("mpk")
    }

    /// Metadata sidecar next to the checkpoint
    pub fn checkpoint_metadata_file(&self) -> PathBuf {
        self.checkpoint_path.with_extension("json")
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write the resolved configuration as JSON (run provenance)
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check every invariant; nothing is silently defaulted afterwards
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));

        let data = &self.data;
        if data.class_names.is_empty() {
            return fail("class_names must not be empty".into());
        }
        if data.num_classes != data.class_names.len() {
            return fail(format!(
                "num_classes ({}) does not match class_names length ({})",
                data.num_classes,
                data.class_names.len()
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for name in &data.class_names {
            if name.trim().is_empty() {
                return fail("class names must not be blank".into());
            }
            if !seen.insert(name.as_str()) {
                return fail(format!("duplicate class name '{}'", name));
            }
        }
        if data.batch_size == 0 {
            return fail("batch_size must be greater than 0".into());
        }
        if data.image_size == 0 {
            return fail("image_size must be greater than 0".into());
        }

        let model = &self.model;
        if model.backbone_channels.is_empty() || model.backbone_channels.contains(&0) {
            return fail("backbone_channels must list at least one non-zero width".into());
        }
        // every block halves the resolution
        let min_size = u32::try_from(model.backbone_channels.len())
            .ok()
            .and_then(|blocks| 1usize.checked_shl(blocks))
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "{} backbone blocks would shrink any image below one pixel",
                    model.backbone_channels.len()
                ))
            })?;
        if data.image_size < min_size {
            return fail(format!(
                "image_size {} is too small for {} backbone blocks (minimum {})",
                data.image_size,
                model.backbone_channels.len(),
                min_size
            ));
        }
        if model.head_units.is_empty() || model.head_units.contains(&0) {
            return fail("head_units must list at least one non-zero width".into());
        }
        if model.head_dropout.len() != model.head_units.len() {
            return fail(format!(
                "head_dropout has {} entries but head_units has {}",
                model.head_dropout.len(),
                model.head_units.len()
            ));
        }
        if let Some(rate) = model.head_dropout.iter().find(|r| !(0.0..1.0).contains(*r)) {
            return fail(format!("dropout rate {} must be in [0.0, 1.0)", rate));
        }
        if model.fine_tune_blocks > model.backbone_channels.len() {
            return fail(format!(
                "fine_tune_blocks ({}) exceeds the backbone's {} blocks",
                model.fine_tune_blocks,
                model.backbone_channels.len()
            ));
        }

        let training = &self.training;
        if training.phase1_epochs == 0 || training.phase2_epochs == 0 {
            return fail("epoch counts must be greater than 0 for both phases".into());
        }
        if !(training.learning_rate > 0.0) {
            return fail("learning_rate must be positive".into());
        }
        if !(training.fine_tune_lr_factor > 0.0) {
            return fail("fine_tune_lr_factor must be positive".into());
        }
        if !(training.reduce_lr_factor > 0.0 && training.reduce_lr_factor < 1.0) {
            return fail("reduce_lr_factor must be in (0.0, 1.0)".into());
        }
        if !(training.reduce_lr_min_delta >= 0.0 && training.reduce_lr_min_delta.is_finite()) {
            return fail("reduce_lr_min_delta must be a non-negative number".into());
        }
        if training.min_learning_rate < 0.0 {
            return fail("min_learning_rate must not be negative".into());
        }
        if training.weight_decay < 0.0 {
            return fail("weight_decay must not be negative".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.data.num_classes, 7);
        assert_eq!(config.training.total_epochs(), 50);
        assert!((config.training.fine_tune_learning_rate() - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn test_class_count_mismatch_rejected() {
        let mut config = PipelineConfig::default();
        config.data.num_classes = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_empty_class_list_rejected() {
        let mut config = PipelineConfig::default();
        config.data.class_names.clear();
        config.data.num_classes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_and_epochs_rejected() {
        let mut config = PipelineConfig::default();
        config.data.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.phase2_epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fine_tune_blocks_bounded_by_backbone() {
        let mut config = PipelineConfig::default();
        config.model.fine_tune_blocks = 6;
        assert!(config.validate().is_err());

        config.model.fine_tune_blocks = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_very_deep_backbone_rejected_without_overflow() {
        let mut config = PipelineConfig::default();
        config.model.backbone_channels = vec![8; 64];
        config.model.fine_tune_blocks = 2;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        config.model.backbone_channels = vec![8; 200];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reduce_lr_min_delta_checked() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.training.reduce_lr_min_delta, 1e-4);

        config.training.reduce_lr_min_delta = -1e-3;
        assert!(config.validate().is_err());
        config.training.reduce_lr_min_delta = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dropout_range_checked() {
        let mut config = PipelineConfig::default();
        config.model.head_dropout = vec![0.5, 1.0, 0.3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dermfuse.toml");

        let mut config = PipelineConfig::default();
        config.data.batch_size = 8;
        config.model.fine_tune_blocks = 3;
        config.save_toml(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.data.batch_size, 8);
        assert_eq!(loaded.model.fine_tune_blocks, 3);
        assert_eq!(loaded.data.class_names, config.data.class_names);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [training]
            phase1_epochs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.training.phase1_epochs, 3);
        assert_eq!(config.training.phase2_epochs, 30);
        assert_eq!(config.data.image_size, 224);
    }

    #[test]
    fn test_checkpoint_paths() {
        let output = OutputConfig::default();
        assert_eq!(
            output.checkpoint_file(),
            PathBuf::from("models/checkpoints/best_model.mpk")
        );
        assert_eq!(
            output.checkpoint_metadata_file(),
            PathBuf::from("models/checkpoints/best_model.json")
        );
    }
}
