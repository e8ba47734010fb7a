//! Top-level error of the table API.

use crate::{format::FormatError, schema::SchemaError, snapshot::SnapshotError};

/// Error returned by every public table operation.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A row did not conform to the declared schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaError),
    /// The commit base was superseded by a conflicting commit.
    #[error("commit conflict: {0}")]
    CommitConflict(String),
    /// Invalid table options or table definition.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Physical file codec failure.
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    /// Snapshot or manifest store failure.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    /// Filesystem failure outside the codec and snapshot layers.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Background compaction failed; the affected bucket keeps its runs.
    #[error("compaction failed: {0}")]
    Compaction(String),
    /// Operation on a writer after `close`.
    #[error("writer is closed")]
    Closed,
}

impl TableError {
    /// True when the caller may retry after re-reading the latest snapshot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TableError::CommitConflict(_))
    }
}
