//! Table writer: sequence assignment, buffering, flushes and compaction
//! bookkeeping for every partition and bucket it touches.

mod buffer;
pub(crate) mod compaction;
pub(crate) mod rolling;

use std::{
    collections::{btree_map::Entry, BTreeMap, HashMap},
    fs, mem,
    sync::Arc,
};

use self::{
    buffer::{group_by_key, WriteBuffer},
    compaction::{CompactionDone, CompactionJob, Compactor},
    rolling::RollingWriter,
};
use crate::{
    commit::{CommitMessage, FileDelta},
    context::StoreContext,
    data_file::{group_runs, DataFileMeta, FileKind, SortedRun},
    error::TableError,
    key::KeyOwned,
    merge::MergeEngine,
    observability::{log_debug, log_error, log_info},
    record::{KeyValue, Row},
    schema::SchemaError,
};

/// Writer of one table.
///
/// Not safe for concurrent use: it owns the buffers and the sequence
/// numbers of every bucket it writes. Independent writers may target the
/// same table; the committer serializes them.
pub struct TableWrite {
    ctx: Arc<StoreContext>,
    buckets: BTreeMap<(KeyOwned, u32), BucketWriter>,
    listing: Option<Listing>,
    compactor: Compactor,
    closed: bool,
}

/// Live files of one snapshot grouped by partition and bucket.
struct Listing {
    snapshot_id: Option<u64>,
    files: HashMap<(KeyOwned, u32), Vec<DataFileMeta>>,
}

struct BucketWriter {
    partition: KeyOwned,
    bucket: u32,
    base_snapshot: Option<u64>,
    next_sequence: u64,
    /// First sequence assigned since the last `prepare_commit`.
    min_sequence: Option<u64>,
    buffer: WriteBuffer,
    runs: Vec<SortedRun>,
    compacting: bool,
    new_files: Vec<DataFileMeta>,
    compact_before: Vec<DataFileMeta>,
    compact_after: Vec<DataFileMeta>,
    changelog_files: Vec<DataFileMeta>,
    changelog: Vec<Row>,
}

impl TableWrite {
    pub(crate) fn new(ctx: Arc<StoreContext>) -> Result<Self, TableError> {
        let compactor = Compactor::spawn(Arc::clone(&ctx))?;
        Ok(Self {
            ctx,
            buckets: BTreeMap::new(),
            listing: None,
            compactor,
            closed: false,
        })
    }

    /// Validates `row`, assigns it the next sequence number of its bucket
    /// and buffers it.
    pub fn write(&mut self, row: Row) -> Result<(), TableError> {
        self.ensure_open()?;
        self.ctx.schema.validate(&row)?;
        if self.ctx.engine.is_none() && row.kind.is_retract() {
            return Err(SchemaError::Unsupported(format!(
                "append-only tables accept inserts only, got {}",
                row.kind
            ))
            .into());
        }
        let key = self.ctx.key_of(&row);
        let partition = self.ctx.partition_of(&row);
        let bucket = self.ctx.bucket_of(&key);
        let count = match self.ctx.engine {
            Some(MergeEngine::ValueCount) => row.kind.count_delta(),
            _ => 1,
        };

        let ctx = &self.ctx;
        let writer = bucket_writer(ctx, &mut self.buckets, &mut self.listing, partition, bucket)?;
        let sequence = writer.next_sequence;
        writer.next_sequence += 1;
        writer.min_sequence.get_or_insert(sequence);
        writer.buffer.insert(
            ctx.engine.is_some(),
            KeyValue {
                key,
                sequence,
                kind: row.kind,
                count,
                values: row.values,
            },
        );
        if writer.buffer.len() >= ctx.options.write_buffer_rows {
            writer.flush(ctx)?;
            writer.maybe_compact(ctx, &mut self.compactor, false)?;
        }
        Ok(())
    }

    /// Flushes every buffer and returns what changed since the previous
    /// call.
    ///
    /// With `wait_compaction` the call blocks until every scheduled
    /// compaction has finished and folds the results in; otherwise only
    /// compactions that already finished are included.
    pub fn prepare_commit(&mut self, wait_compaction: bool) -> Result<CommitMessage, TableError> {
        self.ensure_open()?;
        for writer in self.buckets.values_mut() {
            writer.flush(&self.ctx)?;
            writer.maybe_compact(&self.ctx, &mut self.compactor, false)?;
        }
        if wait_compaction {
            while let Some(done) = self.compactor.wait()? {
                self.apply_compaction(done);
            }
        } else {
            while let Some(done) = self.compactor.poll() {
                self.apply_compaction(done);
            }
        }
        let deltas: Vec<FileDelta> = self
            .buckets
            .values_mut()
            .filter_map(BucketWriter::take_delta)
            .collect();
        log_debug!(
            component = "write",
            event = "commit_prepared",
            buckets = deltas.len(),
            new_files = deltas.iter().map(|d| d.new_files.len()).sum::<usize>(),
            compacted_files = deltas.iter().map(|d| d.compact_before.len()).sum::<usize>(),
        );
        Ok(CommitMessage { deltas })
    }

    /// Flushes one bucket and schedules a full compaction of its runs.
    pub fn compact(&mut self, partition: &KeyOwned, bucket: u32) -> Result<(), TableError> {
        self.ensure_open()?;
        if bucket >= self.ctx.options.bucket {
            return Err(TableError::Config(format!(
                "bucket {bucket} out of range for {} buckets",
                self.ctx.options.bucket
            )));
        }
        let ctx = &self.ctx;
        let writer = bucket_writer(
            ctx,
            &mut self.buckets,
            &mut self.listing,
            partition.clone(),
            bucket,
        )?;
        writer.flush(ctx)?;
        writer.maybe_compact(ctx, &mut self.compactor, true)
    }

    /// Stops the compaction worker and drops every buffered row.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.compactor.shutdown();
        let discarded: usize = self.buckets.values().map(|w| w.buffer.len()).sum();
        self.buckets.clear();
        self.listing = None;
        log_debug!(
            component = "write",
            event = "writer_closed",
            discarded_rows = discarded,
        );
    }

    fn ensure_open(&self) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::Closed);
        }
        Ok(())
    }

    fn apply_compaction(&mut self, done: CompactionDone) {
        let Some(writer) = self.buckets.get_mut(&(done.partition.clone(), done.bucket)) else {
            return;
        };
        writer.compacting = false;
        match done.output {
            Ok(output) => writer.apply_compaction(&self.ctx, done.inputs, output),
            Err(err) => log_error!(
                component = "compaction",
                event = "compaction_failed",
                partition = %done.partition,
                bucket = done.bucket,
                error = %err,
            ),
        }
    }
}

impl Drop for TableWrite {
    fn drop(&mut self) {
        self.close();
    }
}

impl BucketWriter {
    /// Writes the buffer out as a new level-0 run.
    ///
    /// The buffer is cleared only once every file is on disk; on failure
    /// the files written so far are removed and the rows stay buffered.
    fn flush(&mut self, ctx: &Arc<StoreContext>) -> Result<(), TableError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = self.buffer.to_vec();
        let mut changelog = None;
        if ctx.is_changelog_mode() {
            let mut input = rows.clone();
            input.sort_by_key(|kv| kv.sequence);
            let meta = ctx.write_key_values(
                &self.partition,
                self.bucket,
                ctx.ids.generate(),
                0,
                FileKind::Changelog,
                &input,
            )?;
            changelog = Some((meta, input));
        }

        let mut writer = RollingWriter::new(
            Arc::clone(ctx),
            self.partition.clone(),
            self.bucket,
            0,
            FileKind::Data,
        );
        let run = match write_run(ctx, &mut writer, rows) {
            Ok(run) => run,
            Err(err) => {
                writer.abort();
                if let Some((meta, _)) = &changelog {
                    let path = ctx.data_file_path(&self.partition, self.bucket, &meta.file_name);
                    let _ = fs::remove_file(path);
                }
                log_error!(
                    component = "write",
                    event = "flush_failed",
                    partition = %self.partition,
                    bucket = self.bucket,
                    buffered = self.buffer.len(),
                    error = %err,
                );
                return Err(err);
            }
        };

        self.buffer.clear();
        if let Some((meta, input)) = changelog {
            self.changelog_files.push(meta);
            self.changelog.extend(input.into_iter().map(KeyValue::into_row));
        }
        if let Some(run) = run {
            log_debug!(
                component = "write",
                event = "buffer_flushed",
                partition = %self.partition,
                bucket = self.bucket,
                files = run.files.len(),
                rows = run.row_count(),
            );
            self.new_files.extend(run.files.iter().cloned());
            self.runs.push(run);
        }
        Ok(())
    }

    fn maybe_compact(
        &mut self,
        ctx: &StoreContext,
        compactor: &mut Compactor,
        force: bool,
    ) -> Result<(), TableError> {
        if self.compacting || self.runs.is_empty() {
            return Ok(());
        }
        if !force && self.runs.len() <= ctx.options.compaction_max_sorted_run_num {
            return Ok(());
        }
        compactor.submit(CompactionJob {
            partition: self.partition.clone(),
            bucket: self.bucket,
            runs: self.runs.clone(),
        })?;
        self.compacting = true;
        Ok(())
    }

    fn apply_compaction(
        &mut self,
        ctx: &StoreContext,
        inputs: Vec<SortedRun>,
        output: Option<SortedRun>,
    ) {
        let input_ids: Vec<_> = inputs.iter().map(|run| run.run_id).collect();
        self.runs.retain(|run| !input_ids.contains(&run.run_id));
        for file in inputs.into_iter().flat_map(|run| run.files) {
            // a file nobody has committed yet just disappears
            let uncommitted = remove_file(&mut self.new_files, &file)
                || remove_file(&mut self.compact_after, &file);
            if uncommitted {
                let path = ctx.data_file_path(&self.partition, self.bucket, &file.file_name);
                if let Err(err) = fs::remove_file(&path) {
                    log_debug!(
                        component = "compaction",
                        event = "obsolete_file_kept",
                        file = %file.file_name,
                        error = %err,
                    );
                }
            } else {
                self.compact_before.push(file);
            }
        }
        if let Some(run) = output {
            self.compact_after.extend(run.files.iter().cloned());
            self.runs.insert(0, run);
        }
        log_info!(
            component = "compaction",
            event = "compaction_applied",
            partition = %self.partition,
            bucket = self.bucket,
            runs = self.runs.len(),
        );
    }

    fn take_delta(&mut self) -> Option<FileDelta> {
        let delta = FileDelta {
            partition: self.partition.clone(),
            bucket: self.bucket,
            base_snapshot: self.base_snapshot,
            min_sequence: self.min_sequence.take(),
            new_files: mem::take(&mut self.new_files),
            compact_before: mem::take(&mut self.compact_before),
            compact_after: mem::take(&mut self.compact_after),
            changelog_files: mem::take(&mut self.changelog_files),
            changelog: mem::take(&mut self.changelog),
        };
        (!delta.is_empty()).then_some(delta)
    }
}

/// Merges buffered `rows` per key and writes the survivors as one run.
fn write_run(
    ctx: &StoreContext,
    writer: &mut RollingWriter,
    rows: Vec<KeyValue>,
) -> Result<Option<SortedRun>, TableError> {
    match ctx.engine {
        Some(engine) => {
            for (key, versions) in group_by_key(rows) {
                let kept = engine.compact(&key, versions, false);
                if !kept.is_empty() {
                    writer.push_group(kept)?;
                }
            }
        }
        None => {
            for kv in rows {
                writer.push_group(vec![kv])?;
            }
        }
    }
    writer.finish()
}

fn bucket_writer<'a>(
    ctx: &StoreContext,
    buckets: &'a mut BTreeMap<(KeyOwned, u32), BucketWriter>,
    listing: &mut Option<Listing>,
    partition: KeyOwned,
    bucket: u32,
) -> Result<&'a mut BucketWriter, TableError> {
    match buckets.entry((partition, bucket)) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let writer = restore(ctx, listing, &entry.key().0, bucket)?;
            Ok(entry.insert(writer))
        }
    }
}

/// Rebuilds bucket state from the latest snapshot.
fn restore(
    ctx: &StoreContext,
    listing: &mut Option<Listing>,
    partition: &KeyOwned,
    bucket: u32,
) -> Result<BucketWriter, TableError> {
    let latest = ctx.snapshots.latest()?;
    let latest_id = latest.as_ref().map(|s| s.id);
    if listing.as_ref().map(|l| l.snapshot_id) != Some(latest_id) {
        let mut files: HashMap<(KeyOwned, u32), Vec<DataFileMeta>> = HashMap::new();
        if let Some(snapshot) = latest.as_deref() {
            for entry in ctx.live_files(snapshot)? {
                files
                    .entry((entry.partition, entry.bucket))
                    .or_default()
                    .push(entry.file);
            }
        }
        *listing = Some(Listing {
            snapshot_id: latest_id,
            files,
        });
    }
    let files = listing
        .as_ref()
        .and_then(|l| l.files.get(&(partition.clone(), bucket)))
        .cloned()
        .unwrap_or_default();
    let next_sequence = files
        .iter()
        .map(|f| f.max_sequence + 1)
        .max()
        .unwrap_or(0);
    let runs = group_runs(files);
    log_debug!(
        component = "write",
        event = "bucket_restored",
        partition = %partition,
        bucket,
        snapshot_id = ?latest_id,
        runs = runs.len(),
        next_sequence,
    );
    Ok(BucketWriter {
        partition: partition.clone(),
        bucket,
        base_snapshot: latest_id,
        next_sequence,
        min_sequence: None,
        buffer: WriteBuffer::default(),
        runs,
        compacting: false,
        new_files: Vec::new(),
        compact_before: Vec::new(),
        compact_after: Vec::new(),
        changelog_files: Vec::new(),
        changelog: Vec::new(),
    })
}

fn remove_file(files: &mut Vec<DataFileMeta>, file: &DataFileMeta) -> bool {
    match files.iter().position(|f| f.file_name == file.file_name) {
        Some(pos) => {
            files.remove(pos);
            true
        }
        None => false,
    }
}
