//! Scan planning and reading.
//!
//! A [`ReadBuilder`] turns a snapshot and an optional filter into a
//! [`Plan`] of per-bucket [`Split`]s. Partitions are pruned with their
//! exact values, files with their column statistics. Reading a split merges
//! its sorted runs key by key and re-checks every logical row against the
//! full filter, so pruning only ever saves work.

pub(crate) mod merge_reader;
mod pruning;

use std::{
    collections::{BTreeMap, HashMap},
    iter::{Repeat, Take},
    sync::Arc,
};

use arrow::record_batch::RecordBatch;
use tablestore_predicate::{ColumnRef, Predicate, ScalarValue};

use self::{
    merge_reader::{KeyGroupReader, RunReader},
    pruning::{may_match, Domain},
};
use crate::{
    context::StoreContext,
    data_file::{group_runs, DataFileMeta, SortedRun},
    error::TableError,
    format::columnar::encode_rows,
    key::KeyOwned,
    merge::{expand, MergeEngine},
    observability::log_debug,
    record::{Row, RowKind, RowView},
    schema::TableSchema,
    snapshot::Snapshot,
};

/// Files of one partition and bucket selected by a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    /// Snapshot the split was planned against.
    pub snapshot_id: u64,
    /// Partition of every file in the split.
    pub partition: KeyOwned,
    /// Bucket of every file in the split.
    pub bucket: u32,
    /// Oldest run first.
    pub runs: Vec<SortedRun>,
}

impl Split {
    /// Every file across the runs.
    pub fn files(&self) -> impl Iterator<Item = &DataFileMeta> {
        self.runs.iter().flat_map(|run| run.files.iter())
    }

    /// Stored rows before merging.
    pub fn row_count(&self) -> u64 {
        self.runs.iter().map(SortedRun::row_count).sum()
    }
}

/// Result of planning a scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plan {
    /// `None` when the table has no snapshot yet.
    pub snapshot_id: Option<u64>,
    /// One split per surviving partition and bucket.
    pub splits: Vec<Split>,
}

impl Plan {
    /// Files across all splits.
    pub fn file_count(&self) -> usize {
        self.splits.iter().map(|split| split.files().count()).sum()
    }
}

/// Configures and runs reads of one table.
#[derive(Clone)]
pub struct ReadBuilder {
    ctx: Arc<StoreContext>,
    filter: Option<Predicate>,
    projection: Option<Vec<String>>,
    changelog: bool,
    snapshot: Option<u64>,
}

impl ReadBuilder {
    pub(crate) fn new(ctx: Arc<StoreContext>) -> Self {
        Self {
            ctx,
            filter: None,
            projection: None,
            changelog: false,
            snapshot: None,
        }
    }

    /// Rows must evaluate to `True` under `filter`.
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Emits only the named columns, in the given order.
    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Surfaces retracted states tagged `Delete` instead of hiding them.
    pub fn with_changelog(mut self, changelog: bool) -> Self {
        self.changelog = changelog;
        self
    }

    /// Reads the given snapshot instead of the latest one.
    pub fn with_snapshot(mut self, snapshot_id: u64) -> Self {
        self.snapshot = Some(snapshot_id);
        self
    }

    fn projection(&self) -> Result<Vec<usize>, TableError> {
        let schema = &self.ctx.schema;
        match &self.projection {
            None => Ok((0..schema.fields().len()).collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    schema
                        .field_index(name)
                        .ok_or_else(|| TableError::Config(format!("unknown column `{name}`")))
                })
                .collect(),
        }
    }

    fn validate_filter(&self) -> Result<(), TableError> {
        let Some(filter) = &self.filter else {
            return Ok(());
        };
        for column in filter.columns() {
            if self.ctx.schema.field_index(&column.name).is_none() {
                return Err(TableError::Config(format!(
                    "filter references unknown column `{column}`"
                )));
            }
        }
        Ok(())
    }

    fn target_snapshot(&self) -> Result<Option<Arc<Snapshot>>, TableError> {
        Ok(match self.snapshot {
            Some(id) => Some(self.ctx.snapshots.get(id)?),
            None => self.ctx.snapshots.latest()?,
        })
    }

    /// Lists the files of the target snapshot that may hold selected rows.
    pub fn plan(&self) -> Result<Plan, TableError> {
        self.validate_filter()?;
        self.projection()?;
        let Some(snapshot) = self.target_snapshot()? else {
            return Ok(Plan::default());
        };
        let schema = &self.ctx.schema;
        let partition_indices = schema.partition_indices();

        let mut partitions: HashMap<KeyOwned, bool> = HashMap::new();
        let mut buckets: BTreeMap<(KeyOwned, u32), Vec<DataFileMeta>> = BTreeMap::new();
        let mut total = 0usize;
        let mut pruned_files = 0usize;
        for entry in self.ctx.live_files(&snapshot)? {
            total += 1;
            let Some(filter) = &self.filter else {
                buckets
                    .entry((entry.partition, entry.bucket))
                    .or_default()
                    .push(entry.file);
                continue;
            };
            let keep_partition = *partitions
                .entry(entry.partition.clone())
                .or_insert_with(|| {
                    may_match(filter, |column| {
                        partition_domain(schema, &partition_indices, &entry.partition, column)
                    })
                });
            if !keep_partition {
                continue;
            }
            let keep_file = may_match(filter, |column| {
                match partition_domain(schema, &partition_indices, &entry.partition, column) {
                    Domain::Unknown => self.file_domain(&entry.file, column),
                    exact => exact,
                }
            });
            if !keep_file {
                pruned_files += 1;
                continue;
            }
            buckets
                .entry((entry.partition, entry.bucket))
                .or_default()
                .push(entry.file);
        }

        let splits: Vec<Split> = buckets
            .into_iter()
            .map(|((partition, bucket), files)| Split {
                snapshot_id: snapshot.id,
                partition,
                bucket,
                runs: group_runs(files),
            })
            .collect();
        let plan = Plan {
            snapshot_id: Some(snapshot.id),
            splits,
        };
        log_debug!(
            component = "scan",
            event = "scan_planned",
            snapshot_id = snapshot.id,
            live_files = total,
            pruned_partitions = partitions.values().filter(|keep| !**keep).count(),
            pruned_files,
            planned_files = plan.file_count(),
        );
        Ok(plan)
    }

    fn file_domain<'a>(&self, file: &'a DataFileMeta, column: &ColumnRef) -> Domain<'a> {
        match self.ctx.schema.field_index(&column.name) {
            Some(index) if self.ctx.stats_prunable(index) => {
                Domain::from_stats(file.column_stats(index), file.row_count)
            }
            _ => Domain::Unknown,
        }
    }

    /// Lazily reads the logical rows of one split.
    pub fn read(&self, split: &Split) -> Result<RecordReader, TableError> {
        let projection = self.projection()?;
        let source = match self.ctx.engine {
            Some(engine) => Source::Merge {
                engine,
                groups: KeyGroupReader::new(
                    &self.ctx,
                    &split.partition,
                    split.bucket,
                    &split.runs,
                )?,
            },
            None => {
                let mut files: Vec<DataFileMeta> = split.files().cloned().collect();
                files.sort_by_key(|file| file.min_sequence);
                Source::Append(RunReader::new(
                    Arc::clone(&self.ctx),
                    split.partition.clone(),
                    split.bucket,
                    files,
                ))
            }
        };
        Ok(RecordReader {
            source,
            schema: Arc::clone(&self.ctx.schema),
            filter: self.filter.clone(),
            projection,
            changelog: self.changelog,
            pending: None,
        })
    }

    /// Reads one split as Arrow batches of at most `read.batch-size` rows.
    pub fn read_batches(&self, split: &Split) -> Result<RecordBatchReader, TableError> {
        Ok(RecordBatchReader {
            rows: self.read(split)?,
            batch_size: self.ctx.options.read_batch_size.max(1),
        })
    }

    /// Plans and reads every split into memory.
    pub fn to_rows(&self) -> Result<Vec<Row>, TableError> {
        let plan = self.plan()?;
        let mut rows = Vec::new();
        for split in &plan.splits {
            for row in self.read(split)? {
                rows.push(row?);
            }
        }
        Ok(rows)
    }
}

fn partition_domain<'a>(
    schema: &TableSchema,
    partition_indices: &[usize],
    partition: &'a KeyOwned,
    column: &ColumnRef,
) -> Domain<'a> {
    let Some(index) = schema.field_index(&column.name) else {
        return Domain::Unknown;
    };
    partition_indices
        .iter()
        .position(|&i| i == index)
        .and_then(|pos| partition.components().get(pos))
        .map_or(Domain::Unknown, Domain::exact)
}

enum Source {
    Merge {
        engine: MergeEngine,
        groups: KeyGroupReader,
    },
    Append(RunReader),
}

/// Lazy iterator over the logical rows of one split.
pub struct RecordReader {
    source: Source,
    schema: Arc<TableSchema>,
    filter: Option<Predicate>,
    projection: Vec<usize>,
    changelog: bool,
    pending: Option<Take<Repeat<Row>>>,
}

impl RecordReader {
    fn selects(&self, values: &[ScalarValue]) -> bool {
        self.filter.as_ref().map_or(true, |filter| {
            filter.matches(&RowView {
                schema: &self.schema,
                values,
            })
        })
    }

    fn project(&self, values: Vec<ScalarValue>) -> Vec<ScalarValue> {
        let identity = self.projection.len() == values.len()
            && self.projection.iter().enumerate().all(|(i, &p)| i == p);
        if identity {
            return values;
        }
        self.projection
            .iter()
            .map(|&index| values[index].clone())
            .collect()
    }
}

impl Iterator for RecordReader {
    type Item = Result<Row, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.as_mut().and_then(Iterator::next) {
                return Some(Ok(row));
            }
            self.pending = None;
            match &mut self.source {
                Source::Merge { engine, groups } => {
                    let engine = *engine;
                    let (key, versions) = match groups.next()? {
                        Ok(group) => group,
                        Err(err) => return Some(Err(err)),
                    };
                    let state = if self.changelog {
                        engine.merge_state(&key, &versions)
                    } else {
                        engine.merge(&key, &versions)
                    };
                    let Some(mut state) = state else {
                        continue;
                    };
                    if !self.selects(&state.values) {
                        continue;
                    }
                    if !self.changelog {
                        state.kind = RowKind::Insert;
                    }
                    state.values = self.project(state.values);
                    self.pending = Some(expand(Some(engine), state));
                }
                Source::Append(files) => {
                    let kv = match files.next()? {
                        Ok(kv) => kv,
                        Err(err) => return Some(Err(err)),
                    };
                    if !self.selects(&kv.values) {
                        continue;
                    }
                    return Some(Ok(Row::insert(self.project(kv.values))));
                }
            }
        }
    }
}

/// Arrow view over a [`RecordReader`]; batches carry the projected columns.
pub struct RecordBatchReader {
    rows: RecordReader,
    batch_size: usize,
}

impl Iterator for RecordBatchReader {
    type Item = Result<RecordBatch, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.rows.next() {
                Some(Ok(row)) => rows.push(row),
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        if rows.is_empty() {
            return None;
        }
        Some(encode_rows(&self.rows.schema, &self.rows.projection, &rows).map_err(Into::into))
    }
}
