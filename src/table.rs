//! Entry point: creating and opening tables.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    commit::TableCommit,
    context::StoreContext,
    error::TableError,
    format::FormatRegistry,
    merge::MergeEngine,
    observability::{log_debug, log_info},
    options::CoreOptions,
    record::{KeyValue, Row},
    scan::ReadBuilder,
    schema::TableSchema,
    snapshot::{Snapshot, SnapshotError},
    write::TableWrite,
};

const SCHEMA_PREFIX: &str = "schema-";

/// Handle to one table; cheap to clone and share across threads.
#[derive(Clone)]
pub struct FileStoreTable {
    ctx: Arc<StoreContext>,
}

impl FileStoreTable {
    /// Creates a table at `options.path` with the built-in formats.
    ///
    /// Fails with [`TableError::Config`] when the definition is invalid or a
    /// table already exists there.
    pub fn create(options: CoreOptions, schema: TableSchema) -> Result<Self, TableError> {
        Self::create_with_formats(options, schema, &FormatRegistry::new())
    }

    /// Like [`FileStoreTable::create`] with a custom format registry.
    pub fn create_with_formats(
        options: CoreOptions,
        schema: TableSchema,
        formats: &FormatRegistry,
    ) -> Result<Self, TableError> {
        options.validate()?;
        formats.get(&options.file_format)?;
        let mut schema = schema.normalize(options.write_mode)?;
        schema.id = 0;
        schema.options = options.to_map();

        let dir = options.schema_dir();
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(&schema).map_err(SnapshotError::from)?;
        let path = dir.join(format!("{SCHEMA_PREFIX}{}", schema.id));
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(TableError::Config(format!(
                    "table already exists at {}",
                    options.path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(&bytes)?;
        file.sync_all()?;
        log_info!(
            component = "table",
            event = "table_created",
            path = %options.path.display(),
            columns = schema.fields().len(),
            buckets = options.bucket,
            write_mode = %options.write_mode,
        );
        Self::from_parts(options, schema, formats)
    }

    /// Opens an existing table; options are read back from its schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TableError> {
        Self::open_with_formats(path, &FormatRegistry::new())
    }

    /// Like [`FileStoreTable::open`] with a custom format registry.
    pub fn open_with_formats(
        path: impl Into<PathBuf>,
        formats: &FormatRegistry,
    ) -> Result<Self, TableError> {
        let mut options = CoreOptions::new(path.into());
        let schema = read_latest_schema(&options.schema_dir())?.ok_or_else(|| {
            TableError::Config(format!("no table at {}", options.path.display()))
        })?;
        options.apply(&schema.options)?;
        log_debug!(
            component = "table",
            event = "table_opened",
            path = %options.path.display(),
            schema_id = schema.id(),
        );
        Self::from_parts(options, schema, formats)
    }

    fn from_parts(
        options: CoreOptions,
        schema: TableSchema,
        formats: &FormatRegistry,
    ) -> Result<Self, TableError> {
        Ok(Self {
            ctx: Arc::new(StoreContext::new(options, schema, formats)?),
        })
    }

    /// Current schema.
    pub fn schema(&self) -> &TableSchema {
        &self.ctx.schema
    }

    /// Effective options.
    pub fn options(&self) -> &CoreOptions {
        &self.ctx.options
    }

    /// Merge policy of the table; `None` for append-only tables.
    pub fn merge_engine(&self) -> Option<MergeEngine> {
        self.ctx.engine
    }

    /// Starts a writer with its own compaction worker.
    pub fn new_write(&self) -> Result<TableWrite, TableError> {
        TableWrite::new(Arc::clone(&self.ctx))
    }

    /// Committer whose identities are scoped to `commit_user`.
    pub fn new_commit(&self, commit_user: impl Into<String>) -> TableCommit {
        TableCommit::new(Arc::clone(&self.ctx), commit_user)
    }

    /// Reader over the latest snapshot unless told otherwise.
    pub fn new_read_builder(&self) -> ReadBuilder {
        ReadBuilder::new(Arc::clone(&self.ctx))
    }

    /// Newest snapshot, `None` before the first commit.
    pub fn latest_snapshot(&self) -> Result<Option<Arc<Snapshot>>, TableError> {
        Ok(self.ctx.snapshots.latest()?)
    }

    /// Snapshot `id`.
    pub fn snapshot(&self, id: u64) -> Result<Arc<Snapshot>, TableError> {
        Ok(self.ctx.snapshots.get(id)?)
    }

    /// Input rows committed by snapshots in `(from_exclusive, to_inclusive]`,
    /// in commit order and, per bucket, in sequence order.
    pub fn read_changelog(
        &self,
        from_exclusive: Option<u64>,
        to_inclusive: u64,
    ) -> Result<Vec<Row>, TableError> {
        let mut rows = Vec::new();
        for snapshot in self.ctx.snapshots.range(from_exclusive, to_inclusive)? {
            let Some(manifest) = snapshot.changelog_manifest.as_ref() else {
                continue;
            };
            for entry in self.ctx.manifests.read(manifest)?.iter() {
                let reader = self
                    .ctx
                    .read_key_values(&entry.partition, entry.bucket, &entry.file)?;
                for kv in reader {
                    rows.push(kv.map(KeyValue::into_row)?);
                }
            }
        }
        Ok(rows)
    }
}

fn read_latest_schema(dir: &Path) -> Result<Option<TableSchema>, TableError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(SCHEMA_PREFIX))
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| id > *best) {
            latest = Some((id, entry.path()));
        }
    }
    let Some((_, path)) = latest else {
        return Ok(None);
    };
    let bytes = fs::read(path)?;
    let schema = serde_json::from_slice(&bytes).map_err(SnapshotError::from)?;
    Ok(Some(schema))
}
