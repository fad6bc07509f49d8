//! End-to-end pipeline entry points
//!
//! Stages run strictly in sequence:
//! data loading, build, phase 1, phase 2, evaluation, reporting, export.
//! Every stage failure is fatal; export never runs after a failed training stage.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use colored::Colorize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::{DataSupply, DatasetStats};
use crate::evaluation::{EvaluationResult, Evaluator};
use crate::export::{ExportReport, Exporter};
use crate::model::{LesionClassifier, ModelBuilder};
use crate::training::{TrainingHistory, TrainingOrchestrator};
use crate::utils::charts::{self, DataSeries, Panel, COLOR_PRIMARY, COLOR_SECONDARY};
use crate::utils::error::{PipelineError, Result};
use crate::utils::{format_megabytes, format_number};

pub const CONFIG_DUMP_FILE: &str = "config.json";
pub const HISTORY_CSV_FILE: &str = "training_history.csv";
pub const HISTORY_JSON_FILE: &str = "training_history.json";
pub const HISTORY_CHART_FILE: &str = "training_history.svg";
pub const CONFUSION_CHART_FILE: &str = "confusion_matrix.svg";
pub const CONFUSION_CSV_FILE: &str = "confusion_matrix.csv";
pub const REPORT_JSON_FILE: &str = "classification_report.json";

/// Result of the training stages
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub history: TrainingHistory,
    pub phase1_epochs: usize,
    pub phase2_epochs: usize,
    pub phase1_stopped_early: bool,
    pub phase2_stopped_early: bool,
    pub best_val_accuracy: f64,
    pub checkpoint: PathBuf,
}

/// Result of a full run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub training: TrainReport,
    pub evaluation: EvaluationResult,
    pub export: ExportReport,
}

/// Run every stage: train, evaluate the trained model, export the best checkpoint
pub fn run_pipeline<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<PipelineReport> {
    config.validate()?;
    print_run_summary(config);
    prepare_results_dir(config)?;

    let supply = DataSupply::new(config)?;
    let (model, training) = train_stages::<B>(config, &supply, device)?;

    println!("\n{}", "Evaluating on the test partition...".cyan().bold());
    let evaluation = Evaluator::new(&config.data.class_names, config.output.show_progress)
        .evaluate(&model.valid(), supply.test_stream(), device)?;
    write_evaluation_reports(&evaluation, config)?;
    print_evaluation(&evaluation, config);

    println!("\n{}", "Exporting quantized model...".cyan().bold());
    let export = Exporter::export::<B::InnerBackend>(config, device)?;

    let report = PipelineReport {
        training,
        evaluation,
        export,
    };
    print_final_summary(&report, config);
    Ok(report)
}

/// Data loading, build and both training phases, plus the history reports
pub fn train<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<TrainReport> {
    config.validate()?;
    print_run_summary(config);
    prepare_results_dir(config)?;

    let supply = DataSupply::new(config)?;
    let (_, report) = train_stages::<B>(config, &supply, device)?;

    println!(
        "\n{} {:?}",
        "Best checkpoint:".green().bold(),
        report.checkpoint
    );
    Ok(report)
}

/// Test-set evaluation of a saved checkpoint
pub fn evaluate_checkpoint<B: Backend>(
    config: &PipelineConfig,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<EvaluationResult> {
    config.validate()?;
    prepare_results_dir(config)?;

    let supply = DataSupply::new(config)?;
    let model = LesionClassifier::<B>::new(config, device).load_checkpoint(checkpoint, device)?;

    let evaluation = Evaluator::new(&config.data.class_names, config.output.show_progress)
        .evaluate(&model, supply.test_stream(), device)?;
    write_evaluation_reports(&evaluation, config)?;
    print_evaluation(&evaluation, config);

    Ok(evaluation)
}

/// Quantize the configured checkpoint
pub fn export<B: Backend>(config: &PipelineConfig, device: &B::Device) -> Result<ExportReport> {
    config.validate()?;
    let report = Exporter::export::<B>(config, device)?;

    println!(
        "{} {:?} ({} int8 tensors, {} bytes, {})",
        "Exported:".green().bold(),
        report.path,
        report.quantized_tensors,
        report.size_bytes,
        format_megabytes(report.size_bytes)
    );
    Ok(report)
}

/// Class distribution of every partition
pub fn dataset_stats(config: &PipelineConfig) -> Result<Vec<DatasetStats>> {
    config.validate()?;
    let stats = DataSupply::new(config)?.stats();
    for partition in &stats {
        partition.print();
    }
    Ok(stats)
}

fn train_stages<B: AutodiffBackend>(
    config: &PipelineConfig,
    supply: &DataSupply,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, TrainReport)> {
    for partition in supply.stats() {
        partition.print();
    }

    let built = ModelBuilder::build::<B>(config, device)?;
    println!(
        "\n{} {} parameters ({} in backbone)",
        "Model:".cyan().bold(),
        format_number(built.num_params()),
        format_number(built.backbone_params())
    );

    let mut orchestrator = TrainingOrchestrator::<B>::new(config, supply, device.clone());
    let outcome = orchestrator.run(built)?;

    write_training_reports(&outcome.history, config)?;

    let report = TrainReport {
        best_val_accuracy: outcome.best_val_accuracy().unwrap_or(0.0),
        phase1_epochs: outcome.phase1_epochs,
        phase2_epochs: outcome.phase2_epochs,
        phase1_stopped_early: outcome.phase1_stopped_early,
        phase2_stopped_early: outcome.phase2_stopped_early,
        history: outcome.history,
        checkpoint: config.output.checkpoint_file(),
    };
    info!(
        "Training finished after {}{} + {}{} epochs, best val accuracy {:.2}%",
        report.phase1_epochs,
        early_stop_marker(report.phase1_stopped_early),
        report.phase2_epochs,
        early_stop_marker(report.phase2_stopped_early),
        report.best_val_accuracy * 100.0
    );

    Ok((outcome.model, report))
}

fn early_stop_marker(stopped: bool) -> &'static str {
    if stopped {
        " (stopped early)"
    } else {
        ""
    }
}

fn prepare_results_dir(config: &PipelineConfig) -> Result<()> {
    let dir = &config.output.results_dir;
    fs::create_dir_all(dir)?;
    config.save_json(dir.join(CONFIG_DUMP_FILE))?;
    Ok(())
}

fn report_error(what: &str) -> impl Fn(std::io::Error) -> PipelineError + '_ {
    move |e| PipelineError::Report(format!("failed to write {}: {}", what, e))
}

/// History CSV/JSON and the training-curve chart
pub fn write_training_reports(history: &TrainingHistory, config: &PipelineConfig) -> Result<()> {
    let dir = &config.output.results_dir;
    fs::create_dir_all(dir)?;

    history.save_csv(&dir.join(HISTORY_CSV_FILE))?;
    history.save_json(&dir.join(HISTORY_JSON_FILE))?;

    let panels = vec![
        Panel {
            title: "Loss".to_string(),
            y_label: "Cross-entropy".to_string(),
            series: vec![
                DataSeries::new("Train", COLOR_PRIMARY, history.series(|m| m.loss)),
                DataSeries::new("Validation", COLOR_SECONDARY, history.series(|m| m.val_loss)),
            ],
            percent: false,
        },
        Panel {
            title: "Accuracy".to_string(),
            y_label: "Accuracy".to_string(),
            series: vec![
                DataSeries::new("Train", COLOR_PRIMARY, history.series(|m| m.accuracy)),
                DataSeries::new("Validation", COLOR_SECONDARY, history.series(|m| m.val_accuracy)),
            ],
            percent: true,
        },
        Panel {
            title: "Validation AUC / Precision".to_string(),
            y_label: "Score".to_string(),
            series: vec![
                DataSeries::new("AUC", COLOR_PRIMARY, history.series(|m| m.val_auc)),
                DataSeries::new("Precision", COLOR_SECONDARY, history.series(|m| m.val_precision)),
            ],
            percent: true,
        },
    ];

    // marker sits halfway between the last frozen epoch and the first fine-tuning one
    let boundary = history.phase_boundary().map(|epoch| epoch as f64 + 0.5);
    let chart = dir.join(HISTORY_CHART_FILE);
    charts::generate_training_chart("Training History", &panels, boundary, &chart)
        .map_err(report_error(HISTORY_CHART_FILE))?;

    info!("Training history written to {:?}", dir);
    Ok(())
}

/// Confusion matrix (SVG and CSV) and the classification report
pub fn write_evaluation_reports(result: &EvaluationResult, config: &PipelineConfig) -> Result<()> {
    let dir = &config.output.results_dir;
    let names = &config.data.class_names;
    fs::create_dir_all(dir)?;

    charts::generate_confusion_heatmap(
        "Confusion Matrix",
        &result.confusion.rows(),
        names,
        &dir.join(CONFUSION_CHART_FILE),
    )
    .map_err(report_error(CONFUSION_CHART_FILE))?;
    result
        .confusion
        .save_csv(&dir.join(CONFUSION_CSV_FILE), names)
        .map_err(report_error(CONFUSION_CSV_FILE))?;
    result
        .report
        .save_json(&dir.join(REPORT_JSON_FILE))
        .map_err(report_error(REPORT_JSON_FILE))?;

    info!("Evaluation reports written to {:?}", dir);
    Ok(())
}

fn print_run_summary(config: &PipelineConfig) {
    let data = &config.data;
    let training = &config.training;

    println!();
    println!("{}", "Run Configuration:".cyan().bold());
    println!("  Image size:     {}x{}", data.image_size, data.image_size);
    println!("  Batch size:     {}", data.batch_size);
    println!(
        "  Epochs:         {} ({} frozen + {} fine-tuning)",
        training.total_epochs(),
        training.phase1_epochs,
        training.phase2_epochs
    );
    println!("  Learning rate:  {}", training.learning_rate);
    println!("  Classes:        {}", data.num_classes);
    println!();
}

fn print_evaluation(result: &EvaluationResult, config: &PipelineConfig) {
    println!(
        "\n{} {:.2}% on {} samples",
        "Test accuracy:".green().bold(),
        result.accuracy * 100.0,
        result.num_samples()
    );
    println!("\n{}", result.confusion.display(&config.data.class_names));
    println!("{}", result.report.display());
}

fn print_final_summary(report: &PipelineReport, config: &PipelineConfig) {
    println!();
    println!("{}", "Pipeline complete".green().bold());
    println!(
        "  Best val accuracy: {:.2}%",
        report.training.best_val_accuracy * 100.0
    );
    println!("  Test accuracy:     {:.2}%", report.evaluation.accuracy * 100.0);
    println!("  Checkpoint:        {:?}", report.training.checkpoint);
    println!(
        "  Deployment model:  {:?} ({} bytes, {})",
        report.export.path,
        report.export.size_bytes,
        format_megabytes(report.export.size_bytes)
    );
    println!("  Results:           {:?}", config.output.results_dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::{smoke_config, write_image_folder};
    use crate::export::Artifact;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TrainBackend = Autodiff<NdArray<f32>>;
    type TestBackend = NdArray<f32>;

    fn smoke_run(dir: &TempDir) -> PipelineConfig {
        let config = smoke_config(dir.path());
        for split in ["train", "val", "test"] {
            write_image_folder(&dir.path().join(split), &config.data.class_names, 2, 24);
        }
        config
    }

    #[test]
    fn test_end_to_end_smoke_run() {
        let dir = TempDir::new().unwrap();
        let config = smoke_run(&dir);
        let device = Default::default();

        let report = run_pipeline::<TrainBackend>(&config, &device).unwrap();

        assert!(config.output.checkpoint_file().exists());
        assert_eq!(report.training.history.len(), 2);
        assert!((0.0..=1.0).contains(&report.evaluation.accuracy));
        assert_eq!(report.evaluation.confusion.num_classes, 2);
        assert_eq!(report.evaluation.confusion.total(), 4);

        let artifact = Artifact::read(&report.export.path).unwrap();
        assert_eq!(artifact.class_names, config.data.class_names);
        assert_eq!(artifact.quantized.len(), report.export.quantized_tensors);

        let results = &config.output.results_dir;
        for file in [
            CONFIG_DUMP_FILE,
            HISTORY_CSV_FILE,
            HISTORY_JSON_FILE,
            HISTORY_CHART_FILE,
            CONFUSION_CHART_FILE,
            CONFUSION_CSV_FILE,
            REPORT_JSON_FILE,
        ] {
            assert!(results.join(file).exists(), "missing {}", file);
        }
    }

    #[test]
    fn test_evaluate_saved_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = smoke_run(&dir);
        let device = Default::default();

        train::<TrainBackend>(&config, &device).unwrap();
        let result = evaluate_checkpoint::<TestBackend>(&config, &config.output.checkpoint_file(), &device).unwrap();

        assert_eq!(result.num_samples(), 4);
        assert_eq!(result.confusion.row_sums(), vec![2, 2]);
    }

    #[test]
    fn test_invalid_config_fails_before_any_work() {
        let dir = TempDir::new().unwrap();
        let mut config = smoke_config(dir.path());
        config.data.batch_size = 0;

        let err = run_pipeline::<TrainBackend>(&config, &Default::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!config.output.results_dir.exists());
    }

    #[test]
    fn test_missing_data_is_data_source_error() {
        let dir = TempDir::new().unwrap();
        let config = smoke_config(dir.path());

        let err = dataset_stats(&config).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
