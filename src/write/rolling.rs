use std::{fs, mem, sync::Arc};

use crate::{
    context::StoreContext,
    data_file::{DataFileMeta, FileKind, SortedRun},
    error::TableError,
    id::FileId,
    key::KeyOwned,
    observability::log_debug,
    record::KeyValue,
};

/// Writes one sorted run, starting a new file once `target-file-rows` is
/// reached. A key's versions never straddle two files.
pub(crate) struct RollingWriter {
    ctx: Arc<StoreContext>,
    partition: KeyOwned,
    bucket: u32,
    run_id: FileId,
    level: u32,
    kind: FileKind,
    pending: Vec<KeyValue>,
    files: Vec<DataFileMeta>,
}

impl RollingWriter {
    pub(crate) fn new(
        ctx: Arc<StoreContext>,
        partition: KeyOwned,
        bucket: u32,
        level: u32,
        kind: FileKind,
    ) -> Self {
        let run_id = ctx.ids.generate();
        Self {
            ctx,
            partition,
            bucket,
            run_id,
            level,
            kind,
            pending: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Appends the versions of one key (or one append-only row).
    pub(crate) fn push_group(&mut self, group: Vec<KeyValue>) -> Result<(), TableError> {
        if !self.pending.is_empty() && self.pending.len() >= self.ctx.options.target_file_rows {
            self.roll()?;
        }
        self.pending.extend(group);
        Ok(())
    }

    fn roll(&mut self) -> Result<(), TableError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = mem::take(&mut self.pending);
        let meta = self.ctx.write_key_values(
            &self.partition,
            self.bucket,
            self.run_id,
            self.level,
            self.kind,
            &rows,
        )?;
        self.files.push(meta);
        Ok(())
    }

    /// Flushes the tail and returns the run, or `None` if nothing was written.
    pub(crate) fn finish(&mut self) -> Result<Option<SortedRun>, TableError> {
        self.roll()?;
        if self.files.is_empty() {
            return Ok(None);
        }
        Ok(Some(SortedRun {
            run_id: self.run_id,
            files: mem::take(&mut self.files),
        }))
    }

    /// Deletes every file written so far and drops pending rows.
    pub(crate) fn abort(&mut self) {
        self.pending.clear();
        for file in self.files.drain(..) {
            let path = self
                .ctx
                .data_file_path(&self.partition, self.bucket, &file.file_name);
            if let Err(err) = fs::remove_file(&path) {
                log_debug!(
                    component = "write",
                    event = "aborted_file_kept",
                    file = %file.file_name,
                    error = %err,
                );
            }
        }
    }
}
