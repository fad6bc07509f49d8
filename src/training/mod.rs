//! Training module for two-phase transfer learning
//!
//! This module provides:
//! - Per-epoch training and validation passes
//! - The epoch-end monitors (early stopping, checkpointing, LR decay, history)
//! - The orchestrator that runs the frozen and fine-tuning phases

pub mod monitors;
pub mod orchestrator;
pub mod trainer;

// Re-export main types for convenience
pub use monitors::{EpochMetrics, Monitor, MonitorAction, Phase, TrainingHistory};
pub use orchestrator::{TrainingOrchestrator, TrainingOutcome, TrainingPhase};
pub use trainer::{PhasePlan, Trainer};
