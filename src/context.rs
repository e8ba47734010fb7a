use std::{fs, path::PathBuf, sync::Arc, vec};

use crate::{
    data_file::{bucket_dir, DataFileMeta, FileKind},
    error::TableError,
    format::{
        columnar::{decode_key_values, encode_key_values},
        BatchReader, FileFormat, FormatError, FormatRegistry,
    },
    id::{FileId, FileIdGenerator},
    key::KeyOwned,
    manifest::{merge_entries, ManifestEntry, ManifestStore},
    merge::MergeEngine,
    options::CoreOptions,
    record::{KeyValue, Row},
    schema::TableSchema,
    snapshot::{Snapshot, SnapshotManager},
};

/// Everything a table handle shares with its writers, committers and readers.
pub(crate) struct StoreContext {
    pub(crate) options: CoreOptions,
    pub(crate) schema: Arc<TableSchema>,
    pub(crate) format: Arc<dyn FileFormat>,
    pub(crate) ids: Arc<FileIdGenerator>,
    pub(crate) snapshots: SnapshotManager,
    pub(crate) manifests: ManifestStore,
    pub(crate) engine: Option<MergeEngine>,
    key_indices: Vec<usize>,
    partition_indices: Vec<usize>,
}

impl StoreContext {
    pub(crate) fn new(
        options: CoreOptions,
        schema: TableSchema,
        formats: &FormatRegistry,
    ) -> Result<Self, TableError> {
        let format = formats.get(&options.file_format)?;
        let ids = Arc::new(FileIdGenerator::new());
        let engine = MergeEngine::for_table(&schema, &options);
        let key_indices = match engine {
            Some(MergeEngine::Deduplicate | MergeEngine::PartialUpdate) => {
                schema.primary_key_indices()
            }
            _ => (0..schema.fields().len()).collect(),
        };
        let partition_indices = schema.partition_indices();
        Ok(Self {
            snapshots: SnapshotManager::new(
                options.snapshot_dir(),
                Arc::clone(&ids),
                options.metadata_cache_entries,
            ),
            manifests: ManifestStore::new(
                options.manifest_dir(),
                Arc::clone(&ids),
                options.metadata_cache_entries,
            ),
            options,
            schema: Arc::new(schema),
            format,
            ids,
            engine,
            key_indices,
            partition_indices,
        })
    }

    /// Columns forming the merge key: primary keys, or the whole row.
    pub(crate) fn key_indices(&self) -> &[usize] {
        &self.key_indices
    }

    pub(crate) fn key_of(&self, row: &Row) -> KeyOwned {
        KeyOwned::project(&row.values, &self.key_indices)
    }

    pub(crate) fn partition_of(&self, row: &Row) -> KeyOwned {
        KeyOwned::project(&row.values, &self.partition_indices)
    }

    /// Bucket of a row: hash of its primary key, or of the whole row.
    pub(crate) fn bucket_of(&self, key: &KeyOwned) -> u32 {
        key.bucket(self.options.bucket)
    }

    /// Whether file statistics of column `index` may be used for pruning.
    ///
    /// Only columns whose value is identical across every version of a key
    /// qualify; anything else could drop a newer version of a key while an
    /// older one survives in another file.
    pub(crate) fn stats_prunable(&self, index: usize) -> bool {
        match self.engine {
            Some(MergeEngine::Deduplicate | MergeEngine::PartialUpdate) => {
                self.key_indices.contains(&index)
            }
            Some(MergeEngine::ValueCount) | None => true,
        }
    }

    pub(crate) fn is_changelog_mode(&self) -> bool {
        self.engine.is_some()
    }

    pub(crate) fn bucket_dir(&self, partition: &KeyOwned, bucket: u32) -> PathBuf {
        bucket_dir(&self.options.path, &self.schema, partition, bucket)
    }

    pub(crate) fn data_file_path(&self, partition: &KeyOwned, bucket: u32, name: &str) -> PathBuf {
        self.bucket_dir(partition, bucket).join(name)
    }
}

impl StoreContext {
    /// Live data files of `snapshot`, sorted by partition, bucket and name.
    pub(crate) fn live_files(&self, snapshot: &Snapshot) -> Result<Vec<ManifestEntry>, TableError> {
        let entries = self.manifests.read_all(snapshot.data_manifests())?;
        Ok(merge_entries(entries))
    }

    /// Writes `rows` as one immutable file of run `run_id`.
    pub(crate) fn write_key_values(
        &self,
        partition: &KeyOwned,
        bucket: u32,
        run_id: FileId,
        level: u32,
        kind: FileKind,
        rows: &[KeyValue],
    ) -> Result<DataFileMeta, TableError> {
        let dir = self.bucket_dir(partition, bucket);
        fs::create_dir_all(&dir)?;
        let prefix = match kind {
            FileKind::Data => "data",
            FileKind::Changelog => "changelog",
        };
        let file_name = format!("{prefix}-{}.{}", self.ids.generate(), self.format.extension());
        let batch = encode_key_values(&self.schema, rows)?;
        let file_size = self
            .format
            .write(&dir.join(&file_name), &batch, self.options.compression)?;
        Ok(DataFileMeta::describe(
            file_name,
            kind,
            self.format.tag(),
            run_id,
            level,
            &self.schema,
            rows,
            file_size,
        ))
    }

    /// Streams the key-values of one file in file order.
    pub(crate) fn read_key_values(
        self: &Arc<Self>,
        partition: &KeyOwned,
        bucket: u32,
        file: &DataFileMeta,
    ) -> Result<KeyValueReader, TableError> {
        if file.format != self.format.tag() {
            return Err(FormatError::Unsupported(file.format.clone()).into());
        }
        let path = self.data_file_path(partition, bucket, &file.file_name);
        Ok(KeyValueReader {
            ctx: Arc::clone(self),
            batches: self.format.read(&path, self.options.read_batch_size)?,
            current: Vec::new().into_iter(),
        })
    }
}

/// Lazy key-value iterator over one data file.
pub(crate) struct KeyValueReader {
    ctx: Arc<StoreContext>,
    batches: BatchReader,
    current: vec::IntoIter<KeyValue>,
}

impl Iterator for KeyValueReader {
    type Item = Result<KeyValue, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(kv) = self.current.next() {
                return Some(Ok(kv));
            }
            let batch = match self.batches.next()? {
                Ok(batch) => batch,
                Err(err) => return Some(Err(err.into())),
            };
            match decode_key_values(&self.ctx.schema, self.ctx.key_indices(), &batch) {
                Ok(rows) => self.current = rows.into_iter(),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
