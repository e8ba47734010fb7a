//! Background compaction worker of one writer.
//!
//! Jobs and results travel over `flume` channels to a dedicated thread.
//! A job always covers every sorted run the bucket had when it was
//! scheduled, so its output is the oldest data of the bucket and
//! retractions can be dropped.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use flume::{Receiver, Sender};

use crate::{
    context::StoreContext,
    data_file::{FileKind, SortedRun},
    error::TableError,
    key::KeyOwned,
    observability::{log_debug, log_error, log_info},
    scan::merge_reader::{KeyGroupReader, RunReader},
    write::rolling::RollingWriter,
};

pub(crate) const COMPACTION_LEVEL: u32 = 1;

pub(crate) struct CompactionJob {
    pub(crate) partition: KeyOwned,
    pub(crate) bucket: u32,
    pub(crate) runs: Vec<SortedRun>,
}

pub(crate) struct CompactionDone {
    pub(crate) partition: KeyOwned,
    pub(crate) bucket: u32,
    pub(crate) inputs: Vec<SortedRun>,
    pub(crate) output: Result<Option<SortedRun>, TableError>,
}

pub(crate) struct Compactor {
    jobs: Option<Sender<CompactionJob>>,
    done: Receiver<CompactionDone>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl Compactor {
    pub(crate) fn spawn(ctx: Arc<StoreContext>) -> Result<Self, TableError> {
        let (job_tx, job_rx) = flume::unbounded::<CompactionJob>();
        let (done_tx, done_rx) = flume::unbounded();
        let handle = thread::Builder::new()
            .name("tablestore-compact".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let output = compact_runs(&ctx, &job.partition, job.bucket, &job.runs);
                    let done = CompactionDone {
                        partition: job.partition,
                        bucket: job.bucket,
                        inputs: job.runs,
                        output,
                    };
                    if done_tx.send(done).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            jobs: Some(job_tx),
            done: done_rx,
            handle: Some(handle),
            in_flight: 0,
        })
    }

    pub(crate) fn submit(&mut self, job: CompactionJob) -> Result<(), TableError> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(TableError::Closed);
        };
        log_debug!(
            component = "compaction",
            event = "compaction_scheduled",
            partition = %job.partition,
            bucket = job.bucket,
            runs = job.runs.len(),
        );
        jobs.send(job)
            .map_err(|_| TableError::Compaction("compaction worker stopped".into()))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Blocks for the next finished job; `None` when nothing is in flight.
    pub(crate) fn wait(&mut self) -> Result<Option<CompactionDone>, TableError> {
        if self.in_flight == 0 {
            return Ok(None);
        }
        match self.done.recv() {
            Ok(done) => {
                self.in_flight -= 1;
                Ok(Some(done))
            }
            Err(_) => {
                self.in_flight = 0;
                Err(TableError::Compaction("compaction worker exited".into()))
            }
        }
    }

    /// Next finished job, if any, without blocking.
    pub(crate) fn poll(&mut self) -> Option<CompactionDone> {
        let done = self.done.try_recv().ok()?;
        self.in_flight -= 1;
        Some(done)
    }

    /// Stops accepting jobs and joins the worker.
    pub(crate) fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log_error!(
                    component = "compaction",
                    event = "compaction_worker_panicked",
                );
            }
        }
        self.in_flight = 0;
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rewrites `runs` into a single level-1 run.
///
/// Keyed tables merge every key and drop retractions; append-only tables
/// concatenate files in sequence order. Returns `None` when nothing
/// survives.
pub(crate) fn compact_runs(
    ctx: &Arc<StoreContext>,
    partition: &KeyOwned,
    bucket: u32,
    runs: &[SortedRun],
) -> Result<Option<SortedRun>, TableError> {
    let mut writer = RollingWriter::new(
        Arc::clone(ctx),
        partition.clone(),
        bucket,
        COMPACTION_LEVEL,
        FileKind::Data,
    );
    let output = match rewrite_runs(ctx, &mut writer, partition, bucket, runs) {
        Ok(output) => output,
        Err(err) => {
            writer.abort();
            return Err(err);
        }
    };
    log_info!(
        component = "compaction",
        event = "compaction_finished",
        partition = %partition,
        bucket,
        input_runs = runs.len(),
        input_rows = runs.iter().map(SortedRun::row_count).sum::<u64>(),
        output_rows = output.as_ref().map_or(0, SortedRun::row_count),
    );
    Ok(output)
}

fn rewrite_runs(
    ctx: &Arc<StoreContext>,
    writer: &mut RollingWriter,
    partition: &KeyOwned,
    bucket: u32,
    runs: &[SortedRun],
) -> Result<Option<SortedRun>, TableError> {
    match ctx.engine {
        Some(engine) => {
            for group in KeyGroupReader::new(ctx, partition, bucket, runs)? {
                let (key, versions) = group?;
                let kept = engine.compact(&key, versions, true);
                if !kept.is_empty() {
                    writer.push_group(kept)?;
                }
            }
        }
        None => {
            let mut files: Vec<_> = runs.iter().flat_map(|run| run.files.iter().cloned()).collect();
            files.sort_by_key(|file| file.min_sequence);
            for kv in RunReader::new(Arc::clone(ctx), partition.clone(), bucket, files) {
                writer.push_group(vec![kv?])?;
            }
        }
    }
    writer.finish()
}
