//! Quantized deployment export
//!
//! This module provides:
//! - Int8 weight quantization through Burn's quantizer
//! - The DFQ1 container around the quantized model record
//! - The exporter that turns the best checkpoint into an artifact

pub mod artifact;
pub mod exporter;
pub mod quantize;

// Re-export main types for convenience
pub use artifact::Artifact;
pub use exporter::{ExportReport, Exporter};
pub use quantize::{quantize_model, QuantizedModel};
