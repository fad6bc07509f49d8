//! # DermFuse
//!
//! A Rust library for two-phase transfer-learning skin lesion classification using
//! the Burn framework.
//!
//! ## Features
//!
//! - **Transfer learning**: a pretrained convolutional backbone with a custom dense head
//! - **Two-phase schedule**: frozen-backbone training, then fine-tuning of the deepest blocks
//! - **Monitors**: early stopping, best-model checkpointing and learning-rate decay
//! - **Deployment export**: symmetric int8 quantization into a compact binary artifact
//!
//! ## Modules
//!
//! - `dataset`: Folder scanning, augmentation and lazy batch streams
//! - `model`: Backbone, head, freeze partition and the model builder
//! - `training`: Epoch loop, monitors and the two-phase orchestrator
//! - `evaluation`: Test-set scoring
//! - `export`: Quantization and the artifact format
//! - `pipeline`: End-to-end entry points and reports
//! - `utils`: Logging, metrics, charts and errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dermfuse::backend::{default_device, TrainingBackend};
//! use dermfuse::PipelineConfig;
//!
//! let config = PipelineConfig::load("dermfuse.toml")?;
//! let report = dermfuse::pipeline::run_pipeline::<TrainingBackend>(&config, &default_device())?;
//! println!("test accuracy: {:.2}%", report.evaluation.accuracy * 100.0);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{BatchStream, DataSupply, LesionBatch, LesionItem};
pub use evaluation::{EvaluationResult, Evaluator};
pub use export::{Artifact, ExportReport, Exporter};
pub use model::{BackbonePartition, BuiltModel, LesionClassifier, ModelBuilder};
pub use training::{TrainingHistory, TrainingOrchestrator, TrainingOutcome, TrainingPhase};
pub use utils::error::{PipelineError, Result};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dermfuse.toml";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
