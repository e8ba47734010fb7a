//! Pluggable physical file codecs.
//!
//! A [`FileFormat`] turns one Arrow batch (user columns plus the system
//! columns) into an immutable file and streams it back.
//! Formats are looked up by tag in a [`FormatRegistry`]; the built-in tag
//! is `"parquet"`.

pub(crate) mod columnar;
mod parquet_file;

use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use arrow::{array::RecordBatch, error::ArrowError};
use parquet::errors::ParquetError;

pub use self::parquet_file::ParquetFormat;
use crate::options::Compression;

/// Lazily decoded batches of one file.
pub type BatchReader = Box<dyn Iterator<Item = Result<RecordBatch, FormatError>> + Send>;

/// Errors raised while encoding or decoding data files.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Batch construction or projection failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet encoding or decoding failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// No format is registered under the tag.
    #[error("unsupported file format `{0}`")]
    Unsupported(String),
    /// File contents disagree with the table schema.
    #[error("corrupt data file: {0}")]
    Corrupt(String),
}

/// Read/write capability for one physical codec.
pub trait FileFormat: Send + Sync {
    /// Tag stored in every data file's metadata.
    fn tag(&self) -> &'static str;

    /// File name extension, without the dot.
    fn extension(&self) -> &'static str {
        self.tag()
    }

    /// Writes `batch` to a new file at `path` and returns the file size.
    fn write(
        &self,
        path: &Path,
        batch: &RecordBatch,
        compression: Compression,
    ) -> Result<u64, FormatError>;

    /// Opens `path` for streaming reads.
    fn read(&self, path: &Path, batch_size: usize) -> Result<BatchReader, FormatError>;
}

/// Formats available to a table, keyed by tag.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn FileFormat>>,
}

impl FormatRegistry {
    /// Registry holding the built-in parquet format.
    pub fn new() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };
        registry.register(Arc::new(ParquetFormat));
        registry
    }

    /// Adds `format`, replacing any format with the same tag.
    pub fn register(&mut self, format: Arc<dyn FileFormat>) {
        self.formats.insert(format.tag().to_string(), format);
    }

    /// Format registered under `tag`, matched case-insensitively.
    pub fn get(&self, tag: &str) -> Result<Arc<dyn FileFormat>, FormatError> {
        self.formats
            .get(&tag.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| FormatError::Unsupported(tag.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.formats.keys()).finish()
    }
}
