//! Error types for the fusion pipeline.
//!
//! Failures fall into three classes:
//!
//! - [`PipelineError::InputValidation`]: a bad record, batch, or region polygon
//! - [`PipelineError::Configuration`]: a threshold or weight rejected at construction time
//! - [`PipelineError::Integrity`]: a fusion or aggregation invariant was violated
//!
//! Integrity errors are always defects in this crate and are never recoverable
//! by the caller. The remaining variants wrap errors from the readers used at
//! the input boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input validation error: {0}")]
    InputValidation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error {0}")]
    GeoJson(#[from] geojson::Error),
}

impl PipelineError {
    /// True if this error signals a bug rather than bad input or configuration.
    pub fn is_defect(&self) -> bool {
        matches!(self, PipelineError::Integrity(_))
    }

    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InputValidation(_)
            | PipelineError::Csv(_)
            | PipelineError::Json(_)
            | PipelineError::GeoJson(_) => "input_validation",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Integrity(_) => "integrity",
            PipelineError::Io(_) => "io",
        }
    }
}

pub fn input_error(msg: impl ToString) -> PipelineError {
    PipelineError::InputValidation(msg.to_string())
}

pub fn config_error(msg: impl ToString) -> PipelineError {
    PipelineError::Configuration(msg.to_string())
}

pub fn integrity_error(msg: impl ToString) -> PipelineError {
    PipelineError::Integrity(msg.to_string())
}
