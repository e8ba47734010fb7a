//! Bucketed, snapshot-versioned table store over immutable columnar files.
//!
//! Rows are routed to a partition (by the partition columns) and a bucket
//! (by a stable hash of the primary key, or of the whole row). Each bucket
//! holds sorted runs of immutable Parquet files; a read merges the runs of a
//! bucket key by key through the table's [`MergeEngine`]. Writers produce
//! [`CommitMessage`]s that a [`TableCommit`] publishes as immutable
//! [`Snapshot`]s with optimistic concurrency and idempotent identities.
//!
//! ```no_run
//! use tablestore::{
//!     CoreOptions, DataType, Field, FileStoreTable, Row, ScalarValue, TableSchema,
//! };
//!
//! # fn main() -> Result<(), tablestore::TableError> {
//! let schema = TableSchema::new(vec![
//!     Field::new("id", DataType::Int64, false),
//!     Field::new("name", DataType::Utf8, true),
//! ])
//! .primary_keys(["id"]);
//! let table = FileStoreTable::create(CoreOptions::new("/tmp/users").bucket(2), schema)?;
//!
//! let mut write = table.new_write()?;
//! write.write(Row::insert(vec![ScalarValue::Int64(1), "ada".into()]))?;
//! let message = write.prepare_commit(true)?;
//! table.new_commit("loader").commit("batch-1", [message])?;
//!
//! let rows = table.new_read_builder().to_rows()?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod observability;

pub mod commit;
mod context;
pub mod data_file;
pub mod error;
pub mod format;
mod id;
pub mod key;
pub mod manifest;
pub mod merge;
pub mod options;
pub mod record;
pub mod scan;
pub mod schema;
pub mod snapshot;
pub mod table;
pub mod write;

pub use tablestore_predicate::{
    ColumnRef, ComparisonOp, Operand, Predicate, PredicateBuilder, PredicateNode, ScalarValue,
    Truth,
};

pub use crate::{
    commit::{CommitMessage, FileDelta, TableCommit},
    data_file::{ColumnStats, DataFileMeta, FileKind, SortedRun},
    error::TableError,
    format::{FileFormat, FormatError, FormatRegistry, ParquetFormat},
    id::FileId,
    key::KeyOwned,
    merge::MergeEngine,
    options::{Compression, CoreOptions, MergeEngineOption, WriteMode},
    record::{KeyValue, Row, RowKind},
    scan::{Plan, ReadBuilder, RecordBatchReader, RecordReader, Split},
    schema::{DataType, Field, SchemaError, TableSchema},
    snapshot::{CommitKind, Snapshot, SnapshotError},
    table::FileStoreTable,
    write::TableWrite,
};
