//! Error types for the ingestion crate.

use std::path::PathBuf;
use thiserror::Error;

use fits_common::{FitsError, SourceDescriptor};
use storage::GatewayError;

use crate::reconcile::ReconcileState;

/// Errors that can occur while validating, decoding or reconciling a unit.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A source identifier is not registered in the reference data.
    #[error("{field} not found in the DB: {value}")]
    Referential { field: &'static str, value: String },

    #[error("found {count} duplicate timestamps in the observations")]
    DuplicateTimestamps { count: usize },

    /// Constraint violation inside the store. Not retried.
    #[error("write conflict while {stage}: {message}")]
    WriteConflict {
        stage: ReconcileState,
        message: String,
    },

    /// The store refused a site row.
    #[error("site {site_id} rejected by the store: {message}")]
    SiteConflict { site_id: String, message: String },

    #[error("store unavailable: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    /// A merge stopped part way. Records before `index` were written.
    #[error("merge aborted at record {index} after {committed} records were saved: {source}")]
    MergeAborted {
        index: usize,
        committed: usize,
        source: Box<ReconcileError>,
    },

    #[error("invalid source: {0}")]
    InvalidSource(FitsError),

    #[error("{path} line {line}: {message}")]
    Decode {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("no source file {0}")]
    MissingSource(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ReconcileError {
    /// Map a gateway failure raised during `stage`.
    pub fn at(stage: ReconcileState, err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { field, value } => ReconcileError::Referential { field, value },
            GatewayError::Conflict(message) => ReconcileError::WriteConflict { stage, message },
            GatewayError::Transport(msg) => ReconcileError::Transport(msg),
            GatewayError::Store(msg) => ReconcileError::Store(msg),
        }
    }

    /// Map a gateway failure raised while saving the site `site_id`.
    pub fn saving_site(site_id: &str, err: GatewayError) -> Self {
        match err {
            GatewayError::Conflict(message) => ReconcileError::SiteConflict {
                site_id: site_id.to_string(),
                message,
            },
            GatewayError::NotFound { field, value } => ReconcileError::Referential { field, value },
            GatewayError::Transport(msg) => ReconcileError::Transport(msg),
            GatewayError::Store(msg) => ReconcileError::Store(msg),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReconcileError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the unit may succeed if run again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Transport(_) => true,
            ReconcileError::MergeAborted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<FitsError> for ReconcileError {
    fn from(err: FitsError) -> Self {
        match err {
            FitsError::DuplicateTimestamps { count } => ReconcileError::DuplicateTimestamps { count },
            other => ReconcileError::InvalidSource(other),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// A failed unit of work, with enough context to find it again.
#[derive(Error, Debug)]
#[error("{unit}: {source}")]
pub struct UnitError {
    /// `siteID.typeID` once the source is decoded, otherwise the file name
    pub unit: String,
    pub site_id: Option<String>,
    pub type_id: Option<String>,
    pub files: Vec<PathBuf>,
    /// Where the unit stopped
    pub state: ReconcileState,
    pub source: ReconcileError,
}

impl UnitError {
    pub fn for_source(
        source_descriptor: &SourceDescriptor,
        state: ReconcileState,
        source: ReconcileError,
    ) -> Self {
        Self {
            unit: source_descriptor.to_string(),
            site_id: Some(source_descriptor.site_id().to_string()),
            type_id: Some(source_descriptor.type_id().to_string()),
            files: Vec::new(),
            state,
            source,
        }
    }

    /// A unit that failed before its source was decoded.
    pub fn for_file(path: impl Into<PathBuf>, source: ReconcileError) -> Self {
        let path = path.into();
        Self {
            unit: path.display().to_string(),
            site_id: None,
            type_id: None,
            files: vec![path],
            state: ReconcileState::Aborted,
            source,
        }
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.files = files.into_iter().collect();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}
