//! Best-model checkpointing.
//!
//! This module provides:
//! - The [`ModelCheckpoint`] monitor, which persists the model whenever validation
//!   accuracy reaches a new best
//! - The JSON metadata sidecar written next to each checkpoint

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{EpochMetrics, Monitor, MonitorAction, MonitorContext, Phase};
use crate::model::LesionClassifier;
use crate::utils::error::Result;

/// Anything the checkpoint monitor can persist
pub trait Checkpointable {
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
}

impl<B: Backend> Checkpointable for LesionClassifier<B> {
    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        LesionClassifier::save_checkpoint(self, path)
    }
}

/// Metadata written next to the checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Global 0-based epoch the weights come from
    pub epoch: usize,
    pub phase: Phase,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub class_names: Vec<String>,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(metrics: &EpochMetrics, class_names: &[String]) -> Self {
        use chrono::Utc;

        Self {
            epoch: metrics.epoch,
            phase: metrics.phase,
            val_accuracy: metrics.val_accuracy,
            val_loss: metrics.val_loss,
            class_names: class_names.to_vec(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Save metadata to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Persists the model whenever `val_accuracy` beats every earlier epoch of the phase
///
/// The best value is cleared at each phase start, so the first fine-tuning epoch
/// always overwrites the frozen-phase checkpoint.
pub struct ModelCheckpoint {
    checkpoint_path: PathBuf,
    metadata_path: PathBuf,
    class_names: Vec<String>,
    best_accuracy: Option<f64>,
    saves: usize,
}

impl ModelCheckpoint {
    pub fn new(checkpoint_path: PathBuf, metadata_path: PathBuf, class_names: Vec<String>) -> Self {
        Self {
            checkpoint_path,
            metadata_path,
            class_names,
            best_accuracy: None,
            saves: 0,
        }
    }

    /// Best validation accuracy persisted in the current phase
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy
    }

    /// Number of times the checkpoint was written
    pub fn saves(&self) -> usize {
        self.saves
    }

    fn is_improvement(&self, accuracy: f64) -> bool {
        match self.best_accuracy {
            Some(best) => accuracy > best,
            None => true,
        }
    }
}

impl<M: Checkpointable> Monitor<M> for ModelCheckpoint {
    fn name(&self) -> &'static str {
        "model_checkpoint"
    }

    fn on_phase_start(&mut self, _phase: Phase) {
        self.best_accuracy = None;
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        ctx: &mut MonitorContext<'_, M>,
    ) -> Result<MonitorAction> {
        if !self.is_improvement(metrics.val_accuracy) {
            return Ok(MonitorAction::Continue);
        }

        ctx.model.save_checkpoint(&self.checkpoint_path)?;
        CheckpointMetadata::new(metrics, &self.class_names).save(&self.metadata_path)?;

        self.best_accuracy = Some(metrics.val_accuracy);
        self.saves += 1;
        ctx.logger.log_new_best(metrics.val_accuracy);
        info!("Checkpoint saved to {:?}", self.checkpoint_path);

        Ok(MonitorAction::Continue)
    }
}
