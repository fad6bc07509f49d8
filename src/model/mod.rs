//! Model module for the transfer-learning classifier
//!
//! This module provides:
//! - The convolutional backbone and its freeze partition
//! - The dense classification head
//! - The assembled classifier and its builder

pub mod backbone;
pub mod builder;
pub mod classifier;
pub mod head;
pub mod partition;

// Re-export main types for convenience
pub use backbone::Backbone;
pub use builder::{BuiltModel, ModelBuilder};
pub use classifier::{LesionClassifier, LesionClassifierRecord};
pub use head::ClassificationHead;
pub use partition::BackbonePartition;
