//! Error types for crmsync-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crmsync_core::SnapshotError;
use crmsync_crm::ApiError;

/// The part of the target state that could not be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Connection,
    Organizations,
    Persons,
    PersonFields,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::Connection => write!(f, "connection"),
            FetchStage::Organizations => write!(f, "organizations"),
            FetchStage::Persons => write!(f, "persons"),
            FetchStage::PersonFields => write!(f, "person fields"),
        }
    }
}

/// The target snapshot could not be established. Always fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not fetch CRM {stage}: {source}")]
pub struct FetchError {
    pub stage: FetchStage,
    #[source]
    pub source: ApiError,
}

impl FetchError {
    pub(crate) fn at(stage: FetchStage) -> impl FnOnce(ApiError) -> FetchError {
        move |source| FetchError { stage, source }
    }
}

/// All errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The source export could not be read.
    #[error("source export error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Audit CSV serialization error.
    #[error("audit log CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
