//! Table options and their string keys.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use parquet::{
    basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel},
    file::properties::WriterProperties,
};

use crate::error::TableError;

/// Table root directory.
pub const PATH: &str = "path";
/// Number of hash buckets per partition.
pub const BUCKET: &str = "bucket";
/// Registered file format tag, `parquet` by default.
pub const FILE_FORMAT: &str = "file.format";
/// `change-log` or `append-only`.
pub const WRITE_MODE: &str = "write-mode";
/// Sorted runs a bucket may hold before a full compaction is scheduled.
pub const COMPACTION_MAX_SORTED_RUN_NUM: &str = "compaction.max-sorted-run-num";
/// Page compression codec.
pub const COMPRESS_TYPE: &str = "file.compression";
/// `deduplicate` or `partial-update`, for primary-key tables.
pub const MERGE_ENGINE: &str = "merge-engine";
/// Buffered rows per bucket that trigger a flush.
pub const WRITE_BUFFER_ROWS: &str = "write-buffer-rows";
/// Rows per data file before the writer rolls to a new one.
pub const TARGET_FILE_ROWS: &str = "target-file-rows";
/// Publish attempts a commit makes after losing a race.
pub const COMMIT_MAX_RETRIES: &str = "commit.max-retries";
/// Base manifests a snapshot may list before they are folded into one.
pub const MANIFEST_MERGE_MIN_COUNT: &str = "manifest.merge-min-count";
/// Rows per batch handed out by readers.
pub const READ_BATCH_SIZE: &str = "read.batch-size";
/// Entries kept by each of the snapshot and manifest caches.
pub const METADATA_CACHE_ENTRIES: &str = "cache.metadata-entries";

/// How rows reach the table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Keyed rows merged per key; row kinds are honoured.
    #[default]
    ChangeLog,
    /// Plain inserts, read back in write order without merging.
    AppendOnly,
}

impl FromStr for WriteMode {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "change-log" | "changelog" => Ok(WriteMode::ChangeLog),
            "append-only" => Ok(WriteMode::AppendOnly),
            other => Err(TableError::Config(format!("unknown {WRITE_MODE} `{other}`"))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteMode::ChangeLog => "change-log",
            WriteMode::AppendOnly => "append-only",
        })
    }
}

/// Merge policy requested for primary-key tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeEngineOption {
    /// Newest version of a key wins.
    #[default]
    Deduplicate,
    /// Newest non-null value of each field wins.
    PartialUpdate,
}

impl FromStr for MergeEngineOption {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "deduplicate" => Ok(MergeEngineOption::Deduplicate),
            "partial-update" => Ok(MergeEngineOption::PartialUpdate),
            other => Err(TableError::Config(format!(
                "unknown {MERGE_ENGINE} `{other}`"
            ))),
        }
    }
}

impl fmt::Display for MergeEngineOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeEngineOption::Deduplicate => "deduplicate",
            MergeEngineOption::PartialUpdate => "partial-update",
        })
    }
}

/// Block compression applied to data pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed pages.
    None,
    /// Snappy.
    #[default]
    Snappy,
    /// Gzip at the default level.
    Gzip,
    /// Deflate; stored with the gzip codec, the only deflate codec parquet has.
    Zlib,
    /// Raw LZ4.
    Lz4,
    /// Zstandard at the default level.
    Zstd,
}

impl Compression {
    pub(crate) fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip | Compression::Zlib => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Lz4 => ParquetCompression::LZ4_RAW,
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        }
    }

    pub(crate) fn writer_properties(self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.to_parquet())
            .build()
    }
}

impl FromStr for Compression {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Compression::None),
            "snappy" => Ok(Compression::Snappy),
            "gzip" => Ok(Compression::Gzip),
            "zlib" => Ok(Compression::Zlib),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(TableError::Config(format!(
                "unknown {COMPRESS_TYPE} `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Snappy => "snappy",
            Compression::Gzip => "gzip",
            Compression::Zlib => "zlib",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        })
    }
}

/// Table options. Built by value (`CoreOptions::new(path).bucket(2)`) or
/// parsed from string pairs with [`CoreOptions::from_map`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoreOptions {
    pub(crate) path: PathBuf,
    pub(crate) bucket: u32,
    pub(crate) file_format: String,
    pub(crate) write_mode: WriteMode,
    pub(crate) compaction_max_sorted_run_num: usize,
    pub(crate) compression: Compression,
    pub(crate) merge_engine: MergeEngineOption,
    pub(crate) write_buffer_rows: usize,
    pub(crate) target_file_rows: usize,
    pub(crate) commit_max_retries: usize,
    pub(crate) manifest_merge_min_count: usize,
    pub(crate) read_batch_size: usize,
    /// Capacity, in entries, of each of the snapshot and manifest caches.
    pub(crate) metadata_cache_entries: usize,
}

impl CoreOptions {
    /// Default options for a table rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CoreOptions {
            path: path.into(),
            bucket: 1,
            file_format: "parquet".to_string(),
            write_mode: WriteMode::ChangeLog,
            compaction_max_sorted_run_num: 5,
            compression: Compression::Snappy,
            merge_engine: MergeEngineOption::Deduplicate,
            write_buffer_rows: 64 * 1024,
            target_file_rows: 1024 * 1024,
            commit_max_retries: 10,
            manifest_merge_min_count: 30,
            read_batch_size: 1024,
            metadata_cache_entries: 256,
        }
    }

    /// Table root directory.
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        CoreOptions {
            path: path.into(),
            ..self
        }
    }

    /// Number of hash buckets per partition.
    pub fn bucket(self, bucket: u32) -> Self {
        CoreOptions { bucket, ..self }
    }

    /// Tag of the registered file format new files are written in.
    pub fn file_format(self, file_format: impl Into<String>) -> Self {
        CoreOptions {
            file_format: file_format.into(),
            ..self
        }
    }

    /// Whether rows are merged per key or appended.
    pub fn write_mode(self, write_mode: WriteMode) -> Self {
        CoreOptions { write_mode, ..self }
    }

    /// Sorted runs a bucket may hold before it is compacted.
    pub fn compaction_max_sorted_run_num(self, compaction_max_sorted_run_num: usize) -> Self {
        CoreOptions {
            compaction_max_sorted_run_num,
            ..self
        }
    }

    /// Page compression of new files.
    pub fn compression(self, compression: Compression) -> Self {
        CoreOptions {
            compression,
            ..self
        }
    }

    /// Merge policy of primary-key tables.
    pub fn merge_engine(self, merge_engine: MergeEngineOption) -> Self {
        CoreOptions {
            merge_engine,
            ..self
        }
    }

    /// Buffered rows per bucket that trigger a flush.
    pub fn write_buffer_rows(self, write_buffer_rows: usize) -> Self {
        CoreOptions {
            write_buffer_rows,
            ..self
        }
    }

    /// Rows per data file.
    pub fn target_file_rows(self, target_file_rows: usize) -> Self {
        CoreOptions {
            target_file_rows,
            ..self
        }
    }

    /// Publish attempts after a lost race before giving up with a conflict.
    pub fn commit_max_retries(self, commit_max_retries: usize) -> Self {
        CoreOptions {
            commit_max_retries,
            ..self
        }
    }

    /// Base manifests tolerated before they are folded into one.
    pub fn manifest_merge_min_count(self, manifest_merge_min_count: usize) -> Self {
        CoreOptions {
            manifest_merge_min_count,
            ..self
        }
    }

    /// Rows per batch handed out by readers.
    pub fn read_batch_size(self, read_batch_size: usize) -> Self {
        CoreOptions {
            read_batch_size,
            ..self
        }
    }

    /// Entries kept by each of the snapshot and manifest caches.
    pub fn metadata_cache_entries(self, metadata_cache_entries: usize) -> Self {
        CoreOptions {
            metadata_cache_entries,
            ..self
        }
    }
}

impl CoreOptions {
    /// Parses options from string pairs. `path` is required; unknown keys
    /// are ignored so engine-specific settings can ride along.
    pub fn from_map<K, V>(map: impl IntoIterator<Item = (K, V)>) -> Result<Self, TableError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let map: BTreeMap<String, String> = map
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.as_ref().trim().to_string()))
            .collect();
        let path = map
            .get(PATH)
            .ok_or_else(|| TableError::Config(format!("missing required option `{PATH}`")))?;
        let mut options = CoreOptions::new(path.as_str());
        options.apply(&map)?;
        Ok(options)
    }

    /// Overlays string options onto `self`, skipping `path`.
    pub(crate) fn apply(&mut self, map: &BTreeMap<String, String>) -> Result<(), TableError> {
        for (key, value) in map {
            match key.as_str() {
                BUCKET => self.bucket = parse_number(key, value)?,
                FILE_FORMAT => self.file_format = value.to_ascii_lowercase(),
                WRITE_MODE => self.write_mode = value.parse()?,
                COMPACTION_MAX_SORTED_RUN_NUM => {
                    self.compaction_max_sorted_run_num = parse_number(key, value)?
                }
                COMPRESS_TYPE => self.compression = value.parse()?,
                MERGE_ENGINE => self.merge_engine = value.parse()?,
                WRITE_BUFFER_ROWS => self.write_buffer_rows = parse_number(key, value)?,
                TARGET_FILE_ROWS => self.target_file_rows = parse_number(key, value)?,
                COMMIT_MAX_RETRIES => self.commit_max_retries = parse_number(key, value)?,
                MANIFEST_MERGE_MIN_COUNT => {
                    self.manifest_merge_min_count = parse_number(key, value)?
                }
                READ_BATCH_SIZE => self.read_batch_size = parse_number(key, value)?,
                METADATA_CACHE_ENTRIES => {
                    self.metadata_cache_entries = parse_number(key, value)?
                }
                _ => {}
            }
        }
        self.validate()
    }

    /// Options persisted next to the schema; `path` is left out so a table
    /// directory can be moved.
    pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BUCKET.to_string(), self.bucket.to_string()),
            (FILE_FORMAT.to_string(), self.file_format.clone()),
            (WRITE_MODE.to_string(), self.write_mode.to_string()),
            (
                COMPACTION_MAX_SORTED_RUN_NUM.to_string(),
                self.compaction_max_sorted_run_num.to_string(),
            ),
            (COMPRESS_TYPE.to_string(), self.compression.to_string()),
            (MERGE_ENGINE.to_string(), self.merge_engine.to_string()),
            (
                WRITE_BUFFER_ROWS.to_string(),
                self.write_buffer_rows.to_string(),
            ),
            (TARGET_FILE_ROWS.to_string(), self.target_file_rows.to_string()),
            (
                COMMIT_MAX_RETRIES.to_string(),
                self.commit_max_retries.to_string(),
            ),
            (
                MANIFEST_MERGE_MIN_COUNT.to_string(),
                self.manifest_merge_min_count.to_string(),
            ),
            (READ_BATCH_SIZE.to_string(), self.read_batch_size.to_string()),
            (
                METADATA_CACHE_ENTRIES.to_string(),
                self.metadata_cache_entries.to_string(),
            ),
        ])
    }

    pub(crate) fn validate(&self) -> Result<(), TableError> {
        let positive = [
            (BUCKET, self.bucket as usize),
            (
                COMPACTION_MAX_SORTED_RUN_NUM,
                self.compaction_max_sorted_run_num,
            ),
            (WRITE_BUFFER_ROWS, self.write_buffer_rows),
            (TARGET_FILE_ROWS, self.target_file_rows),
            (MANIFEST_MERGE_MIN_COUNT, self.manifest_merge_min_count),
            (READ_BATCH_SIZE, self.read_batch_size),
            (METADATA_CACHE_ENTRIES, self.metadata_cache_entries),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(TableError::Config(format!("`{key}` must be at least 1")));
            }
        }
        Ok(())
    }

    /// Table root directory.
    pub fn table_path(&self) -> &PathBuf {
        &self.path
    }

    /// Number of hash buckets per partition.
    pub fn bucket_count(&self) -> u32 {
        self.bucket
    }

    /// Configured write mode.
    pub fn mode(&self) -> WriteMode {
        self.write_mode
    }

    pub(crate) fn schema_dir(&self) -> PathBuf {
        self.path.join("schema")
    }

    pub(crate) fn snapshot_dir(&self) -> PathBuf {
        self.path.join("snapshot")
    }

    pub(crate) fn manifest_dir(&self) -> PathBuf {
        self.path.join("manifest")
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, TableError> {
    value
        .parse()
        .map_err(|_| TableError::Config(format!("`{key}` expects a number, got `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_map_reads_known_keys() {
        let options = CoreOptions::from_map([
            ("path", "/tmp/t"),
            ("bucket", "2"),
            ("file.format", "Parquet"),
            ("write-mode", "append-only"),
            ("compaction.max-sorted-run-num", "10"),
            ("file.compression", "zlib"),
            ("some.engine.flag", "ignored"),
        ])
        .expect("options");
        assert_eq!(options.bucket, 2);
        assert_eq!(options.file_format, "parquet");
        assert_eq!(options.write_mode, WriteMode::AppendOnly);
        assert_eq!(options.compaction_max_sorted_run_num, 10);
        assert_eq!(options.compression, Compression::Zlib);
        assert_eq!(options.commit_max_retries, 10);
    }

    #[test]
    fn from_map_requires_path_and_valid_values() {
        assert!(matches!(
            CoreOptions::from_map([("bucket", "2")]),
            Err(TableError::Config(_))
        ));
        assert!(matches!(
            CoreOptions::from_map([("path", "/tmp/t"), ("bucket", "0")]),
            Err(TableError::Config(_))
        ));
        assert!(matches!(
            CoreOptions::from_map([("path", "/tmp/t"), ("file.compression", "brotli")]),
            Err(TableError::Config(_))
        ));
    }

    #[test]
    fn persisted_map_round_trips() {
        let options = CoreOptions::new("/tmp/t")
            .bucket(4)
            .write_mode(WriteMode::AppendOnly)
            .compression(Compression::Zstd);
        let mut restored = CoreOptions::new("/tmp/t");
        restored.apply(&options.to_map()).expect("apply");
        assert_eq!(restored, options);
    }
}
