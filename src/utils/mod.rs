//! Utilities module for logging, metrics, charts and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Metrics computation (accuracy, precision/recall/F1, AUC, confusion matrix)
//! - SVG report charts
//! - Error handling types
//! - General formatting helpers

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

// Re-export main types for convenience
pub use error::{PipelineError, Result};
pub use logging::init_logging;
pub use metrics::{ClassificationReport, ConfusionMatrix};

/// Per-batch progress bar; hidden when `visible` is false
pub fn progress_bar(len: usize, visible: bool) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Format a byte count as megabytes
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(42), "42");
    }

    #[test]
    fn test_format_megabytes() {
        assert_eq!(format_megabytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_megabytes(3 * 1024 * 1024 / 2), "1.50 MB");
    }
}
