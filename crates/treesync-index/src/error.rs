//! Error types for the synchronisation engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by an extraction or enrichment collaborator for one unit.
///
/// These never abort a run; the dispatcher records them per unit.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read unit: {0}")]
    Io(#[from] std::io::Error),

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Unit timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unit abandoned after cancellation")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Errors from loading or saving persisted per-tree state.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to replace {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that end a synchronisation run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    #[error("Vector index update failed: {0}")]
    Index(#[source] anyhow::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Run cancelled before completion")]
    Cancelled,
}
