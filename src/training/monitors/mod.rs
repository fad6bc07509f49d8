//! Epoch-End Monitors
//!
//! After every epoch the orchestrator hands the epoch's metrics to each monitor in
//! order. A monitor may halt the phase, persist the model or adjust the learning
//! rate through the [`MonitorContext`].

pub mod checkpoint;
pub mod early_stopping;
pub mod history;
pub mod reduce_lr;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;
use crate::utils::logging::TrainingLogger;

pub use checkpoint::{CheckpointMetadata, Checkpointable, ModelCheckpoint};
pub use early_stopping::EarlyStopping;
pub use history::{HistoryLogger, SharedHistory, TrainingHistory};
pub use reduce_lr::ReduceLrOnPlateau;

/// Which optimization phase an epoch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Backbone frozen, head only
    #[serde(rename = "phase1")]
    FeatureExtraction,
    /// Deepest backbone blocks unfrozen
    #[serde(rename = "phase2")]
    FineTuning,
}

impl Phase {
    /// Short label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Phase::FeatureExtraction => "phase1",
            Phase::FineTuning => "phase2",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::FeatureExtraction => write!(f, "Phase 1 (frozen backbone)"),
            Phase::FineTuning => write!(f, "Phase 2 (fine-tuning)"),
        }
    }
}

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Global 0-based epoch index (continues across phases)
    pub epoch: usize,
    pub phase: Phase,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_auc: f64,
    pub val_precision: f64,
    /// Learning rate the epoch was trained with
    pub learning_rate: f64,
}

/// What the orchestrator should do after the monitors ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Continue,
    Stop,
}

/// Mutable view of the running phase handed to monitors
pub struct MonitorContext<'a, M> {
    /// Model after this epoch's updates
    pub model: &'a M,
    /// Learning rate for the next epoch
    pub learning_rate: &'a mut f64,
    pub logger: &'a TrainingLogger,
}

/// Epoch-end hook
pub trait Monitor<M> {
    fn name(&self) -> &'static str;

    /// Called before the first epoch of each phase
    fn on_phase_start(&mut self, _phase: Phase) {}

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        ctx: &mut MonitorContext<'_, M>,
    ) -> Result<MonitorAction>;

    /// Called when a phase ends; may replace the model (e.g. with restored weights)
    fn on_phase_end(&mut self, model: M) -> M {
        model
    }
}

/// Tracks the best value of a minimized metric and the epochs since it improved
#[derive(Debug, Clone)]
pub struct PlateauTracker {
    best: f64,
    wait: usize,
    min_delta: f64,
}

impl PlateauTracker {
    pub fn new(min_delta: f64) -> Self {
        Self {
            best: f64::INFINITY,
            wait: 0,
            min_delta,
        }
    }

    /// Record a value; returns true when it improved on the best by more than `min_delta`
    pub fn update(&mut self, value: f64) -> bool {
        if value < self.best - self.min_delta {
            self.best = value;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Epochs since the last improvement
    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn reset_wait(&mut self) {
        self.wait = 0;
    }

    pub fn reset(&mut self) {
        self.best = f64::INFINITY;
        self.wait = 0;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving monitors without a real model

    use super::*;

    pub fn metrics(epoch: usize, val_loss: f64, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            phase: Phase::FeatureExtraction,
            loss: val_loss,
            accuracy: val_accuracy,
            val_loss,
            val_accuracy,
            val_auc: 0.5,
            val_precision: val_accuracy,
            learning_rate: 1e-3,
        }
    }

    /// Feed one epoch to a monitor with `model` as the current weights
    pub fn step<M>(
        monitor: &mut dyn Monitor<M>,
        model: &M,
        lr: &mut f64,
        metrics: &EpochMetrics,
    ) -> MonitorAction {
        let logger = TrainingLogger::new(100);
        let mut ctx = MonitorContext {
            model,
            learning_rate: lr,
            logger: &logger,
        };
        monitor.on_epoch_end(metrics, &mut ctx).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_tracker_counts_stagnant_epochs() {
        let mut tracker = PlateauTracker::new(0.0);
        assert!(tracker.update(1.0));
        assert!(tracker.update(0.9));
        assert!(!tracker.update(0.9));
        assert!(!tracker.update(1.2));
        assert_eq!(tracker.wait(), 2);
        assert_eq!(tracker.best(), 0.9);

        tracker.reset();
        assert!(tracker.update(5.0));
    }

    #[test]
    fn test_plateau_tracker_min_delta() {
        let mut tracker = PlateauTracker::new(1e-4);
        tracker.update(1.0);
        assert!(!tracker.update(0.99995));
        assert!(tracker.update(0.9));
    }

    #[test]
    fn test_phase_labels_match_serde_names() {
        for phase in [Phase::FeatureExtraction, Phase::FineTuning] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.label()));
        }
    }
}
