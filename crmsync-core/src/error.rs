//! Error types for crmsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the source snapshot from being built at all.
///
/// Individual bad rows are not errors at this level; they become
/// [`MalformedRecord`]s on the snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The export file could not be opened or read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV reader failed on the header row or on an I/O read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the header row.
    #[error("source export is missing the '{column}' column")]
    MissingColumn { column: &'static str },
}

/// A source row that could not be normalised; skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row}: {reason}")]
pub struct MalformedRecord {
    /// 1-based line number in the export, header included.
    pub row: usize,
    pub reason: String,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, including unknown keys.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no API token configured; set PIPEDRIVE_API_TOKEN or `api_token` in the config file")]
    MissingToken,

    #[error("no source export configured; pass --source or set `source` in the config file")]
    MissingSource,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) fn snapshot_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
