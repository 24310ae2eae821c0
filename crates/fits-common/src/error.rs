//! Error types for FITS source and observation handling.

use thiserror::Error;

/// Result type alias using FitsError.
pub type FitsResult<T> = Result<T, FitsError>;

/// Errors raised while building or checking sources and observation batches.
#[derive(Debug, Error)]
pub enum FitsError {
    // === Source descriptor errors ===
    #[error("Invalid source JSON: {0}")]
    SourceJson(#[from] serde_json::Error),

    #[error("Found non Point type: {0}")]
    NotPoint(String),

    #[error("Didn't find correct coordinates for point: expected 2, found {0}")]
    Coordinates(usize),

    #[error("Missing required source property: {0}")]
    MissingProperty(&'static str),

    // === Observation errors ===
    #[error("Invalid observation time: {0}")]
    InvalidTime(String),

    #[error("Invalid {field} value: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Found {count} duplicate timestamp(s)")]
    DuplicateTimestamps { count: usize },
}
