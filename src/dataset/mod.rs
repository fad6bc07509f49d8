//! Dataset module for skin lesion image handling
//!
//! This module provides functionality for:
//! - Scanning labeled image folders (one subdirectory per class)
//! - Data augmentation for training robustness
//! - Burn batching and lazy, restartable batch streams

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod stream;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{LesionBatch, LesionBatcher, LesionItem};
pub use loader::{DatasetStats, ImageFolder, ImageSample};
pub use stream::{BatchStream, DataSupply};
