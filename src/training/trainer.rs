//! Per-epoch training and validation passes

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
};
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::{BatchStream, DataSupply};
use crate::model::{BackbonePartition, LesionClassifier};
use crate::training::monitors::{EpochMetrics, Monitor, MonitorAction, MonitorContext, Phase};
use crate::utils::error::{PipelineError, Result, ResultExt};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{
    roc_auc_micro, AccuracyTracker, ClassificationReport, ConfusionMatrix, RunningAverage,
};
use crate::utils::progress_bar;

/// Monitors run after every epoch, in order
pub type MonitorList<B> = Vec<Box<dyn Monitor<LesionClassifier<B>>>>;

/// What one phase optimizes and for how long
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    pub phase: Phase,
    pub partition: BackbonePartition,
    /// Global index of the phase's first epoch
    pub first_epoch: usize,
    pub epochs: usize,
    pub learning_rate: f64,
}

/// A finished phase
#[derive(Debug)]
pub struct PhaseResult<B: AutodiffBackend> {
    pub model: LesionClassifier<B>,
    pub epochs_run: usize,
    pub stopped_early: bool,
    /// Learning rate after any plateau reductions
    pub final_learning_rate: f64,
}

/// Runs the epoch loop of a phase against the configured data supply
pub struct Trainer<'a, B: AutodiffBackend> {
    config: &'a PipelineConfig,
    supply: &'a DataSupply,
    device: B::Device,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(config: &'a PipelineConfig, supply: &'a DataSupply, device: B::Device) -> Self {
        Self {
            config,
            supply,
            device,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Train for `plan.epochs` epochs unless a monitor halts the phase
    ///
    /// Every phase starts with a fresh Adam state. After each epoch the model is
    /// validated and every monitor sees the metrics, even when an earlier one already
    /// asked to stop.
    pub fn run_phase(
        &self,
        mut model: LesionClassifier<B>,
        plan: &PhasePlan,
        monitors: &mut MonitorList<B>,
        logger: &mut TrainingLogger,
    ) -> Result<PhaseResult<B>> {
        let training = &self.config.training;
        let weight_decay = (training.weight_decay > 0.0)
            .then(|| WeightDecayConfig::new(training.weight_decay));
        let mut optimizer = AdamConfig::new()
            .with_weight_decay(weight_decay)
            .init::<B, LesionClassifier<B>>();

        logger.start_phase(&plan.phase.to_string(), plan.epochs, plan.learning_rate);
        info!("Backbone partition: {}", plan.partition);
        for monitor in monitors.iter_mut() {
            monitor.on_phase_start(plan.phase);
        }

        let mut learning_rate = plan.learning_rate;
        let mut epochs_run = 0;
        let mut stopped_early = false;

        for epoch in plan.first_epoch..plan.first_epoch + plan.epochs {
            logger.start_epoch(epoch);

            let (trained, train) = train_epoch(
                model,
                &mut optimizer,
                self.supply.training_stream(epoch),
                &plan.partition,
                learning_rate,
                &self.device,
                self.config.output.show_progress,
            )?;
            model = trained;

            let val = validate(
                &model.valid(),
                self.supply.validation_stream(),
                &self.config.data.class_names,
                &self.device,
            )?;
            logger.end_epoch(train.loss, val.loss, val.accuracy, learning_rate);
            epochs_run += 1;

            let metrics = EpochMetrics {
                epoch,
                phase: plan.phase,
                loss: train.loss,
                accuracy: train.accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                val_auc: val.auc,
                val_precision: val.precision,
                learning_rate,
            };

            let mut ctx = MonitorContext {
                model: &model,
                learning_rate: &mut learning_rate,
                logger: &*logger,
            };
            let mut action = MonitorAction::Continue;
            for monitor in monitors.iter_mut() {
                if monitor.on_epoch_end(&metrics, &mut ctx)? == MonitorAction::Stop {
                    info!("{} requested stop after epoch {}", monitor.name(), epoch + 1);
                    action = MonitorAction::Stop;
                }
            }

            if action == MonitorAction::Stop {
                stopped_early = true;
                break;
            }
        }

        for monitor in monitors.iter_mut() {
            model = monitor.on_phase_end(model);
        }

        Ok(PhaseResult {
            model,
            epochs_run,
            stopped_early,
            final_learning_rate: learning_rate,
        })
    }
}

/// Loss and accuracy over one pass of the training stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Validation metrics of one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub auc: f64,
    pub precision: f64,
}

/// Run one epoch of mini-batch updates
///
/// Only blocks trainable under `partition` and the head receive updates. An empty
/// stream or a non-finite loss is a training error.
pub fn train_epoch<B, O>(
    mut model: LesionClassifier<B>,
    optimizer: &mut O,
    stream: BatchStream,
    partition: &BackbonePartition,
    learning_rate: f64,
    device: &B::Device,
    show_progress: bool,
) -> Result<(LesionClassifier<B>, TrainMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<LesionClassifier<B>, B>,
{
    let num_batches = stream.num_batches();
    if num_batches == 0 {
        return Err(PipelineError::Training(
            "training stream yielded zero batches".to_string(),
        ));
    }

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut epoch_loss = RunningAverage::new();
    let mut accuracy = AccuracyTracker::new();
    let pb = progress_bar(num_batches, show_progress);

    for batch in stream.batches::<B>(device) {
        let batch = batch?;
        let batch_size = batch.len();

        let output = model.forward_partitioned(batch.images, partition);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            pb.abandon();
            return Err(PipelineError::Training(format!(
                "training loss diverged ({})",
                loss_value
            )));
        }
        epoch_loss.add_weighted(loss_value, batch_size);

        let predictions = output.argmax(1).reshape([batch_size]);
        let batch_correct: i64 = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        accuracy.add_counts(batch_correct as usize, batch_size);

        // Backward pass
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);

        // Update model
        model = optimizer.step(learning_rate, model, grads);

        pb.set_message(format!("loss {:.4}", loss_value));
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok((
        model,
        TrainMetrics {
            loss: epoch_loss.average(),
            accuracy: accuracy.accuracy(),
        },
    ))
}

/// Score the model on a held-out stream without gradient updates
pub fn validate<B: Backend>(
    model: &LesionClassifier<B>,
    stream: BatchStream,
    class_names: &[String],
    device: &B::Device,
) -> Result<ValidationMetrics> {
    if stream.num_batches() == 0 {
        return Err(PipelineError::Training(
            "validation stream yielded zero batches".to_string(),
        ));
    }

    let num_classes = model.num_classes();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut loss_avg = RunningAverage::new();
    let mut confusion = ConfusionMatrix::new(num_classes);
    let mut probabilities: Vec<Vec<f32>> = Vec::with_capacity(stream.num_samples());
    let mut labels: Vec<usize> = Vec::with_capacity(stream.num_samples());

    for batch in stream.batches::<B>(device) {
        let batch = batch?;
        let batch_size = batch.len();

        let output = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss_avg.add_weighted(loss, batch_size);

        let probs: Vec<f32> = softmax(output, 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .training("failed to read probabilities")?;
        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .training("failed to read targets")?;

        for (row, &target) in probs.chunks(num_classes).zip(&targets) {
            let label = target as usize;
            confusion.add(label, argmax(row));
            probabilities.push(row.to_vec());
            labels.push(label);
        }
    }

    let report = ClassificationReport::from_confusion_matrix(&confusion, class_names);

    Ok(ValidationMetrics {
        loss: loss_avg.average(),
        accuracy: confusion.accuracy(),
        auc: roc_auc_micro(&probabilities, &labels),
        precision: report.macro_precision,
    })
}

/// Index of the highest score; the first one wins ties
pub fn argmax(scores: &[f32]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_idx, best), (idx, &score)| {
            if score > best {
                (idx, score)
            } else {
                (best_idx, best)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::{smoke_config, write_image_folder};
    use crate::dataset::DataSupply;
    use burn::backend::Autodiff;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TrainBackend = Autodiff<NdArray<f32>>;

    fn supply(dir: &TempDir) -> (crate::config::PipelineConfig, DataSupply) {
        let config = smoke_config(dir.path());
        for split in ["train", "val", "test"] {
            write_image_folder(&dir.path().join(split), &config.data.class_names, 2, 20);
        }
        let supply = DataSupply::new(&config).unwrap();
        (config, supply)
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn test_train_epoch_updates_head_only_when_frozen() {
        let dir = TempDir::new().unwrap();
        let (config, supply) = supply(&dir);
        let device = Default::default();

        let model = LesionClassifier::<TrainBackend>::new(&config, &device);
        let partition = BackbonePartition::all_frozen(model.backbone.num_blocks());
        let backbone_before: Vec<f32> = model.backbone.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        let head_before: Vec<f32> = model.head.output.weight.val().into_data().to_vec().unwrap();

        let mut optimizer = AdamConfig::new().init::<TrainBackend, LesionClassifier<TrainBackend>>();
        let (model, metrics) = train_epoch(
            model,
            &mut optimizer,
            supply.training_stream(0),
            &partition,
            1e-2,
            &device,
            false,
        )
        .unwrap();

        assert!(metrics.loss.is_finite());
        assert!((0.0..=1.0).contains(&metrics.accuracy));

        let backbone_after: Vec<f32> = model.backbone.blocks[0].conv.weight.val().into_data().to_vec().unwrap();
        let head_after: Vec<f32> = model.head.output.weight.val().into_data().to_vec().unwrap();
        assert_eq!(backbone_before, backbone_after);
        assert_ne!(head_before, head_after);
    }

    #[test]
    fn test_validate_reports_bounded_metrics() {
        let dir = TempDir::new().unwrap();
        let (config, supply) = supply(&dir);
        let device = Default::default();

        let model = LesionClassifier::<NdArray<f32>>::new(&config, &device);
        let metrics = validate(&model, supply.validation_stream(), &config.data.class_names, &device).unwrap();

        assert!(metrics.loss.is_finite());
        for value in [metrics.accuracy, metrics.auc, metrics.precision] {
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
