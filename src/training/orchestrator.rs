//! Two-phase training orchestrator
//!
//! Drives the state machine
//! `Phase1Training -> Phase1Converged -> Phase2Training -> Phase2Converged -> Done`.
//! Any error moves it to the terminal `Aborted` state instead.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::dataset::DataSupply;
use crate::model::{BackbonePartition, BuiltModel, LesionClassifier};
use crate::training::monitors::{
    EarlyStopping, HistoryLogger, ModelCheckpoint, Phase, ReduceLrOnPlateau, SharedHistory,
    TrainingHistory,
};
use crate::training::trainer::{MonitorList, PhasePlan, PhaseResult, Trainer};
use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::TrainingLogger;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Phase1Training,
    Phase1Converged,
    Phase2Training,
    Phase2Converged,
    Done,
    Aborted,
}

impl TrainingPhase {
    /// Successor on the success path; terminal states map to themselves
    pub fn next(self) -> Self {
        match self {
            TrainingPhase::Phase1Training => TrainingPhase::Phase1Converged,
            TrainingPhase::Phase1Converged => TrainingPhase::Phase2Training,
            TrainingPhase::Phase2Training => TrainingPhase::Phase2Converged,
            TrainingPhase::Phase2Converged => TrainingPhase::Done,
            TrainingPhase::Done => TrainingPhase::Done,
            TrainingPhase::Aborted => TrainingPhase::Aborted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrainingPhase::Done | TrainingPhase::Aborted)
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingPhase::Phase1Training => "phase 1 training",
            TrainingPhase::Phase1Converged => "phase 1 converged",
            TrainingPhase::Phase2Training => "phase 2 training",
            TrainingPhase::Phase2Converged => "phase 2 converged",
            TrainingPhase::Done => "done",
            TrainingPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of a completed two-phase run
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    /// Model at the end of phase 2 (best weights if early stopping fired)
    pub model: LesionClassifier<B>,
    /// Partition the model finished with
    pub partition: BackbonePartition,
    pub history: TrainingHistory,
    pub phase1_epochs: usize,
    pub phase2_epochs: usize,
    pub phase1_stopped_early: bool,
    pub phase2_stopped_early: bool,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.history.best_val_accuracy()
    }

    pub fn epochs_run(&self) -> usize {
        self.phase1_epochs + self.phase2_epochs
    }
}

/// Runs both optimization phases with the epoch-end monitors
pub struct TrainingOrchestrator<'a, B: AutodiffBackend> {
    config: &'a PipelineConfig,
    trainer: Trainer<'a, B>,
    monitors: MonitorList<B>,
    history: SharedHistory,
    state: TrainingPhase,
}

impl<'a, B: AutodiffBackend> TrainingOrchestrator<'a, B> {
    /// Wire the monitors in their fixed order: early stopping, checkpointing,
    /// learning-rate decay, history
    pub fn new(config: &'a PipelineConfig, supply: &'a DataSupply, device: B::Device) -> Self {
        let training = &config.training;
        let history: SharedHistory = Rc::new(RefCell::new(TrainingHistory::new()));

        let monitors: MonitorList<B> = vec![
            Box::new(EarlyStopping::new(training.early_stopping_patience)),
            Box::new(ModelCheckpoint::new(
                config.output.checkpoint_file(),
                config.output.checkpoint_metadata_file(),
                config.data.class_names.clone(),
            )),
            Box::new(ReduceLrOnPlateau::new(
                training.reduce_lr_patience,
                training.reduce_lr_factor,
                training.min_learning_rate,
                training.reduce_lr_min_delta,
            )),
            Box::new(HistoryLogger::new(Rc::clone(&history))),
        ];

        Self {
            config,
            trainer: Trainer::new(config, supply, device),
            monitors,
            history,
            state: TrainingPhase::Phase1Training,
        }
    }

    pub fn state(&self) -> TrainingPhase {
        self.state
    }

    /// Names of the registered monitors in call order
    pub fn monitor_names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|m| m.name()).collect()
    }

    /// Run both phases; on failure the orchestrator ends in `Aborted`
    pub fn run(&mut self, built: BuiltModel<B>) -> Result<TrainingOutcome<B>> {
        if self.state != TrainingPhase::Phase1Training {
            return Err(PipelineError::Training(format!(
                "orchestrator already ran (state: {})",
                self.state
            )));
        }

        match self.drive(built) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Training aborted during {}: {}", self.state, e);
                self.state = TrainingPhase::Aborted;
                Err(e)
            }
        }
    }

    fn drive(&mut self, built: BuiltModel<B>) -> Result<TrainingOutcome<B>> {
        let config = self.config;
        let training = &config.training;
        let mut logger = TrainingLogger::new(training.total_epochs());
        let BuiltModel {
            mut model,
            mut partition,
        } = built;

        let mut phase1 = (0, false);
        let mut phase2 = (0, false);

        while !self.state.is_terminal() {
            match self.state {
                TrainingPhase::Phase1Training => {
                    println!("\n{}", "Phase 1: transfer learning (frozen backbone)".cyan().bold());
                    let plan = PhasePlan {
                        phase: Phase::FeatureExtraction,
                        partition,
                        first_epoch: 0,
                        epochs: training.phase1_epochs,
                        learning_rate: training.learning_rate,
                    };
                    let result = self.trainer.run_phase(model, &plan, &mut self.monitors, &mut logger)?;
                    log_phase_result(&plan, &result);
                    model = result.model;
                    phase1 = (result.epochs_run, result.stopped_early);
                }
                TrainingPhase::Phase1Converged => {
                    partition = partition.unfreeze_last(config.model.fine_tune_blocks);
                    info!("Phase transition: {}", partition);
                }
                TrainingPhase::Phase2Training => {
                    println!("\n{}", "Phase 2: fine-tuning".cyan().bold());
                    let plan = PhasePlan {
                        phase: Phase::FineTuning,
                        partition,
                        first_epoch: training.phase1_epochs,
                        epochs: training.phase2_epochs,
                        learning_rate: training.fine_tune_learning_rate(),
                    };
                    let result = self.trainer.run_phase(model, &plan, &mut self.monitors, &mut logger)?;
                    log_phase_result(&plan, &result);
                    model = result.model;
                    phase2 = (result.epochs_run, result.stopped_early);
                }
                TrainingPhase::Phase2Converged => {
                    let best = self.history.borrow().best_val_accuracy().unwrap_or(0.0);
                    logger.log_complete(best);
                }
                TrainingPhase::Done | TrainingPhase::Aborted => {}
            }
            self.state = self.state.next();
        }

        let history = self.history.borrow().clone();
        Ok(TrainingOutcome {
            model,
            partition,
            history,
            phase1_epochs: phase1.0,
            phase2_epochs: phase2.0,
            phase1_stopped_early: phase1.1,
            phase2_stopped_early: phase2.1,
        })
    }
}

fn log_phase_result<B: AutodiffBackend>(plan: &PhasePlan, result: &PhaseResult<B>) {
    info!(
        "{} finished after {}/{} epochs{}; final learning rate {:.2e}",
        plan.phase,
        result.epochs_run,
        plan.epochs,
        if result.stopped_early { " (early stop)" } else { "" },
        result.final_learning_rate
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::{smoke_config, write_image_folder};
    use crate::model::ModelBuilder;
    use crate::training::monitors::CheckpointMetadata;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TrainBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_state_sequence() {
        let mut state = TrainingPhase::Phase1Training;
        let mut seen = vec![state];
        while !state.is_terminal() {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                TrainingPhase::Phase1Training,
                TrainingPhase::Phase1Converged,
                TrainingPhase::Phase2Training,
                TrainingPhase::Phase2Converged,
                TrainingPhase::Done,
            ]
        );
        assert_eq!(TrainingPhase::Aborted.next(), TrainingPhase::Aborted);
    }

    #[test]
    fn test_two_phase_run_records_continuous_epochs() {
        let dir = TempDir::new().unwrap();
        let mut config = smoke_config(dir.path());
        config.training.phase1_epochs = 2;
        config.training.phase2_epochs = 1;
        for split in ["train", "val", "test"] {
            write_image_folder(&dir.path().join(split), &config.data.class_names, 2, 20);
        }
        let supply = DataSupply::new(&config).unwrap();
        let device = Default::default();
        let built = ModelBuilder::build::<TrainBackend>(&config, &device).unwrap();

        let mut orchestrator = TrainingOrchestrator::<TrainBackend>::new(&config, &supply, device);
        assert_eq!(
            orchestrator.monitor_names(),
            vec!["early_stopping", "model_checkpoint", "reduce_lr_on_plateau", "history_logger"]
        );

        let outcome = orchestrator.run(built).unwrap();
        assert_eq!(orchestrator.state(), TrainingPhase::Done);

        let epochs: Vec<usize> = outcome.history.epochs.iter().map(|m| m.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2]);
        assert_eq!(outcome.history.phase_boundary(), Some(2));
        assert_eq!(outcome.partition, BackbonePartition::fine_tune_last(2, 1));

        let phase2_lr = outcome.history.phase(Phase::FineTuning).next().unwrap().learning_rate;
        assert!((phase2_lr - config.training.fine_tune_learning_rate()).abs() < 1e-12);

        assert!(config.output.checkpoint_file().exists());
        // the first fine-tuning epoch always replaces the frozen-phase checkpoint
        let meta = CheckpointMetadata::load(&config.output.checkpoint_metadata_file()).unwrap();
        assert_eq!(meta.phase, Phase::FineTuning);
        assert_eq!(meta.epoch, 2);

        // a second run is refused
        let again = ModelBuilder::build::<TrainBackend>(&config, &Default::default()).unwrap();
        assert!(orchestrator.run(again).is_err());
    }

    #[test]
    fn test_empty_training_stream_aborts() {
        let dir = TempDir::new().unwrap();
        let config = smoke_config(dir.path());
        for split in ["train", "val", "test"] {
            write_image_folder(&dir.path().join(split), &config.data.class_names, 2, 20);
        }
        let supply = DataSupply::new(&config).unwrap();
        let empty = supply.without_training_samples();
        let device = Default::default();
        let built = ModelBuilder::build::<TrainBackend>(&config, &device).unwrap();

        let mut orchestrator = TrainingOrchestrator::<TrainBackend>::new(&config, &empty, device);
        let err = orchestrator.run(built).unwrap_err();

        assert!(matches!(err, PipelineError::Training(_)));
        assert_eq!(orchestrator.state(), TrainingPhase::Aborted);
    }
}
