//! Error Handling Module
//!
//! Defines the error taxonomy for the DermFuse pipeline.
//! Every variant is fatal to a run; the binary maps each kind to its own exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid settings, detected before any expensive work starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing or malformed dataset directory, or an unreadable image
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Backbone load failure, empty stream or numerical divergence
    #[error("Training error: {0}")]
    Training(String),

    /// Unreadable checkpoint or a model that cannot be quantized
    #[error("Export error: {0}")]
    Export(String),

    /// Error decoding an image file
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Failed to write a report artifact (charts, CSV)
    #[error("Report error: {0}")]
    Report(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Configuration(_) => 2,
            PipelineError::DataSource(_) | PipelineError::Image(..) => 3,
            PipelineError::Training(_) => 4,
            PipelineError::Export(_) => 5,
            _ => 1,
        }
    }

    /// Short name of the error kind, used in console output
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::DataSource(_) | PipelineError::Image(..) => "data source",
            PipelineError::Training(_) => "training",
            PipelineError::Export(_) => "export",
            PipelineError::Report(_) => "report",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for PipelineError {
    fn from(err: toml::ser::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for re-tagging foreign errors with a pipeline error kind
pub trait ResultExt<T> {
    /// Wrap the error as a `DataSource` error with a message prefix
    fn data_source(self, msg: &str) -> Result<T>;

    /// Wrap the error as a `Training` error with a message prefix
    fn training(self, msg: &str) -> Result<T>;

    /// Wrap the error as an `Export` error with a message prefix
    fn export(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    fn data_source(self, msg: &str) -> Result<T> {
        self.map_err(|e| PipelineError::DataSource(format!("{}: {:?}", msg, e)))
    }

    fn training(self, msg: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Training(format!("{}: {:?}", msg, e)))
    }

    fn export(self, msg: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Export(format!("{}: {:?}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::DataSource("test error".to_string());
        assert_eq!(format!("{}", err), "Data source error: test error");
    }

    #[test]
    fn test_image_error_mentions_path() {
        let path = PathBuf::from("/path/to/lesion.jpg");
        let err = PipelineError::Image(path, "truncated file".to_string());
        assert!(format!("{}", err).contains("lesion.jpg"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let codes = [
            PipelineError::Configuration(String::new()).exit_code(),
            PipelineError::DataSource(String::new()).exit_code(),
            PipelineError::Training(String::new()).exit_code(),
            PipelineError::Export(String::new()).exit_code(),
        ];
        assert_eq!(codes, [2, 3, 4, 5]);
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_result_ext_tags_kind() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let err = result.export("Failed to read checkpoint").unwrap_err();
        assert!(matches!(err, PipelineError::Export(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_toml_error_is_configuration() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("batch_size = = 3");
        let err: PipelineError = parsed.unwrap_err().into();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
