//! Test-set evaluation
//!
//! Single inference pass over the held-out partition producing predictions, accuracy,
//! the confusion tally and the per-class classification report.

pub mod evaluator;

pub use evaluator::{EvaluationResult, Evaluator};
