//! Error types for socdata-core.
//!
//! One typed taxonomy for the whole crate: normalization, cache, index, and
//! registry failures all surface as [`SocDataError`] variants so callers can
//! match on them instead of string-matching messages.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage attached to errors surfaced from registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Normalize,
    Write,
    Index,
    /// Direct read of an existing cache entry (the non-ingesting load path).
    Read,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Write => "write",
            Stage::Index => "index",
            Stage::Read => "read",
        };
        f.write_str(name)
    }
}

/// Main error type for socdata-core.
#[derive(Debug, Error)]
pub enum SocDataError {
    // Normalization errors
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("No data file found in archive: {detail}")]
    NoDataFileFound { detail: String },

    // Registry resolution errors
    #[error("No adapter registered for source: {source}")]
    AdapterNotFound {
        // r# opts out of thiserror's source-field detection: this is a data
        // source name, not an error cause.
        r#source: String,
    },

    #[error("Dataset not found: {id}")]
    DatasetNotFound { id: String },

    #[error("Invalid dataset id '{id}': {reason}")]
    InvalidDatasetId { id: String, reason: String },

    #[error("Invalid adapter for source '{source}': {reason}")]
    InvalidAdapter {
        // r# opts out of thiserror's source-field detection (see above).
        r#source: String,
        reason: String,
    },

    // Search index errors
    #[error("Search index unavailable: {message}")]
    IndexUnavailable { message: String },

    // Cache errors
    #[error("Cache write failed at {path:?}: {message}")]
    CacheWrite {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Stage attribution wrapper added at the registry boundary
    #[error("{stage} failed for {dataset}: {source}")]
    Failed {
        dataset: String,
        stage: Stage,
        #[source]
        source: Box<SocDataError>,
    },
}

/// Result type alias for socdata operations.
pub type Result<T> = std::result::Result<T, SocDataError>;

// Conversion implementations for common error types

impl From<std::io::Error> for SocDataError {
    fn from(err: std::io::Error) -> Self {
        SocDataError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SocDataError {
    fn from(err: serde_json::Error) -> Self {
        SocDataError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SocDataError {
    fn from(err: rusqlite::Error) -> Self {
        SocDataError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for SocDataError {
    fn from(err: csv::Error) -> Self {
        SocDataError::Parse {
            message: format!("delimited input: {}", err),
        }
    }
}

impl SocDataError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SocDataError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a cache write error with path context.
    pub fn cache_write(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SocDataError::CacheWrite {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        SocDataError::Parse {
            message: message.into(),
        }
    }

    /// Create an unsupported-format error.
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        SocDataError::UnsupportedFormat {
            message: message.into(),
        }
    }

    /// Attach dataset id and pipeline stage to an error.
    ///
    /// Errors that already carry attribution are returned unchanged so
    /// nested registry calls do not stack wrappers.
    pub fn at_stage(self, dataset: impl Into<String>, stage: Stage) -> Self {
        match self {
            already @ SocDataError::Failed { .. } => already,
            other => SocDataError::Failed {
                dataset: dataset.into(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Dataset id carried by this error, when attributed.
    pub fn dataset_id(&self) -> Option<&str> {
        match self {
            SocDataError::Failed { dataset, .. } => Some(dataset),
            SocDataError::DatasetNotFound { id } | SocDataError::InvalidDatasetId { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }

    /// True for the not-found family (missing adapter, dataset, or entry).
    pub fn is_not_found(&self) -> bool {
        match self {
            SocDataError::AdapterNotFound { .. } | SocDataError::DatasetNotFound { .. } => true,
            SocDataError::Failed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
