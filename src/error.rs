//! Error and skip types for the ingestion pipeline.
//!
//! Data-quality problems never abort a run: they become a [`SkipReason`]
//! attached to the offending file or record and are tallied in the run
//! summary. Only structural preconditions surface as [`IngestError`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures the caller has to act on.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The configured data directory does not exist or is not a directory.
    #[error("data directory not found: {0} (create it or set paths.data_dir / DATA_DIR)")]
    MissingDataDir(PathBuf),

    /// The run produced nothing while the caller required an index.
    #[error("no records produced from {0}; add readable files to the data directory")]
    NoRecords(PathBuf),

    /// The directory walk itself failed.
    #[error("failed to walk {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    /// Invalid discovery glob.
    #[error("invalid exclude glob '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    /// The audit export could not be written. Distinct from indexing failures.
    #[error("failed to write export to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One batch was rejected by the index back end. Earlier batches stay
    /// persisted; retry from `offset` with `size` records.
    #[error("index back end rejected batch at offset {offset} ({size} records): {source}")]
    Submission {
        offset: usize,
        size: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Why a file or record was left out of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("unreadable: {0}")]
    Unreadable(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("empty text")]
    EmptyText,
}

impl SkipReason {
    /// Short label used when aggregating skips in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Unreadable(_) => "unreadable",
            SkipReason::InvalidJson(_) => "invalid_json",
            SkipReason::UnsupportedFormat(_) => "unsupported_format",
            SkipReason::EmptyText => "empty_text",
        }
    }
}
