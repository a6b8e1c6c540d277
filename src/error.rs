//! Error types for Ethotrack

use thiserror::Error;

/// Errors that can occur while analysing a video's keypoint table
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate computation: {0}")]
    DegenerateComputation(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to parse keypoint table: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Short machine-readable code used in batch reports
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::MissingInput(_) => "MISSING_INPUT",
            AnalysisError::InsufficientData(_) => "INSUFFICIENT_DATA",
            AnalysisError::DegenerateComputation(_) => "DEGENERATE_COMPUTATION",
            AnalysisError::Configuration(_) => "CONFIGURATION_ERROR",
            AnalysisError::Parse(_) => "PARSE_ERROR",
            AnalysisError::Json(_) => "JSON_ERROR",
            AnalysisError::Csv(_) => "CSV_ERROR",
            AnalysisError::Io(_) => "IO_ERROR",
        }
    }
}
