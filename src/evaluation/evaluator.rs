//! Model evaluation on the test partition.
//!
//! This module provides:
//! - Arg-max predictions with the full output distribution per sample
//! - Accuracy and the class-confusion tally
//! - Per-class precision, recall and F1

use std::time::Instant;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::BatchStream;
use crate::model::LesionClassifier;
use crate::training::trainer::argmax;
use crate::utils::error::{PipelineError, Result, ResultExt};
use crate::utils::metrics::{ClassificationReport, ConfusionMatrix};
use crate::utils::progress_bar;

/// Result of model evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Softmax output per sample, in stream order
    pub probabilities: Vec<Vec<f32>>,
    pub predictions: Vec<usize>,
    pub labels: Vec<usize>,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl EvaluationResult {
    pub fn num_samples(&self) -> usize {
        self.predictions.len()
    }
}

/// Scores a trained classifier without gradient updates
pub struct Evaluator<'a> {
    class_names: &'a [String],
    show_progress: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(class_names: &'a [String], show_progress: bool) -> Self {
        Self {
            class_names,
            show_progress,
        }
    }

    /// Run inference over the whole test stream in one pass
    ///
    /// A stream with zero samples is a data-source error.
    pub fn evaluate<B: Backend>(
        &self,
        model: &LesionClassifier<B>,
        test_stream: BatchStream,
        device: &B::Device,
    ) -> Result<EvaluationResult> {
        let total = test_stream.num_samples();
        if total == 0 {
            return Err(PipelineError::DataSource(
                "test partition holds no samples".to_string(),
            ));
        }

        let num_classes = model.num_classes();
        info!("Evaluating on {} test samples", total);

        let start = Instant::now();
        let pb = progress_bar(test_stream.num_batches(), self.show_progress);
        let mut probabilities = Vec::with_capacity(total);
        let mut predictions = Vec::with_capacity(total);
        let mut labels = Vec::with_capacity(total);

        for batch in test_stream.batches::<B>(device) {
            let batch = batch?;

            let probs: Vec<f32> = model
                .forward_softmax(batch.images)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .training("failed to read predictions")?;
            let targets: Vec<i64> = batch
                .targets
                .into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .training("failed to read labels")?;

            for (row, &target) in probs.chunks(num_classes).zip(&targets) {
                predictions.push(argmax(row));
                probabilities.push(row.to_vec());
                labels.push(target as usize);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let confusion = ConfusionMatrix::from_predictions(&predictions, &labels, num_classes);
        let report = ClassificationReport::from_confusion_matrix(&confusion, self.class_names);
        let accuracy = confusion.accuracy();

        info!(
            "Evaluation finished in {:.2}s: accuracy {:.2}%",
            start.elapsed().as_secs_f64(),
            accuracy * 100.0
        );

        Ok(EvaluationResult {
            probabilities,
            predictions,
            labels,
            accuracy,
            confusion,
            report,
        })
    }
}
