use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the pipeline.
pub(crate) type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Canonical error surface for the extraction pipeline.
///
/// Everything here is fatal: jobs are deterministic over read-only input,
/// so a failure indicates a data or logic defect, never a transient
/// condition. There are no retries anywhere.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),

    #[error("malformed tagged page '{file_name}': {reason}")]
    MalformedPage { file_name: String, reason: String },

    #[error("knowledge-base id '{0}' is missing from the vocabulary")]
    VocabularyMiss(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("training hook failed: {0}")]
    Hook(String),
}
