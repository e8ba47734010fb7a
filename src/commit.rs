//! Commit messages and the optimistic committer.
//!
//! A writer's `prepare_commit` yields a [`CommitMessage`]; [`TableCommit`]
//! turns one or more messages into exactly one new snapshot. Each commit
//! carries a caller-chosen identity, and re-submitting an identity that
//! some snapshot already records for the same commit user is a no-op.

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    context::StoreContext,
    data_file::DataFileMeta,
    error::TableError,
    key::KeyOwned,
    manifest::{merge_entries, FileChange, ManifestEntry},
    observability::{log_debug, log_info, log_warn},
    record::Row,
    snapshot::{CommitKind, Snapshot},
};

/// Changes of one partition and bucket produced by one `prepare_commit`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDelta {
    /// Partition the files belong to.
    pub partition: KeyOwned,
    /// Bucket within the partition.
    pub bucket: u32,
    /// Snapshot the writer restored this bucket from.
    pub base_snapshot: Option<u64>,
    /// Lowest sequence number first assigned in this delta, if any rows
    /// were written.
    pub min_sequence: Option<u64>,
    /// Level-0 files flushed from the write buffer.
    pub new_files: Vec<DataFileMeta>,
    /// Committed files a compaction replaced.
    pub compact_before: Vec<DataFileMeta>,
    /// Files a compaction produced.
    pub compact_after: Vec<DataFileMeta>,
    /// Changelog files holding the raw input rows.
    pub changelog_files: Vec<DataFileMeta>,
    /// Input rows of this delta in sequence order (changelog tables only).
    pub changelog: Vec<Row>,
}

impl FileDelta {
    /// True when the delta touches no file.
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
            && self.compact_before.is_empty()
            && self.compact_after.is_empty()
            && self.changelog_files.is_empty()
    }

    fn data_entries(&self) -> impl Iterator<Item = ManifestEntry> + '_ {
        let delete = self
            .compact_before
            .iter()
            .map(|f| ManifestEntry::delete(self.partition.clone(), self.bucket, f.clone()));
        let add = self
            .compact_after
            .iter()
            .chain(&self.new_files)
            .map(|f| ManifestEntry::add(self.partition.clone(), self.bucket, f.clone()));
        delete.chain(add)
    }
}

/// Immutable result of one `prepare_commit`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// One entry per touched partition and bucket.
    pub deltas: Vec<FileDelta>,
}

impl CommitMessage {
    /// True when no delta touches a file.
    pub fn is_empty(&self) -> bool {
        self.deltas.iter().all(FileDelta::is_empty)
    }

    /// Changelog rows of every delta.
    pub fn changelog(&self) -> impl Iterator<Item = &Row> {
        self.deltas.iter().flat_map(|d| d.changelog.iter())
    }
}

/// Publishes commit messages as snapshots on behalf of one commit user.
pub struct TableCommit {
    ctx: Arc<StoreContext>,
    user: String,
}

impl TableCommit {
    pub(crate) fn new(ctx: Arc<StoreContext>, user: impl Into<String>) -> Self {
        Self {
            ctx,
            user: user.into(),
        }
    }

    /// User whose identities this committer deduplicates against.
    pub fn commit_user(&self) -> &str {
        &self.user
    }

    /// Atomically applies `messages` as one snapshot.
    ///
    /// Returns the new snapshot id, or `None` when there was nothing to do
    /// (empty messages, or `identity` already committed by this user).
    /// Fails with [`TableError::CommitConflict`] when a concurrent commit
    /// touched the same buckets or every publish attempt lost its race.
    pub fn commit<I>(&self, identity: &str, messages: I) -> Result<Option<u64>, TableError>
    where
        I: IntoIterator<Item = CommitMessage>,
    {
        let deltas: Vec<FileDelta> = messages
            .into_iter()
            .flat_map(|m| m.deltas)
            .filter(|d| !d.is_empty())
            .collect();
        let latest_id = self.ctx.snapshots.latest_id()?;
        if let Some(id) = self.find_identity(identity, None, latest_id)? {
            log_info!(
                component = "commit",
                event = "commit_already_applied",
                commit_user = %self.user,
                identity = %identity,
                snapshot_id = id,
            );
            return Ok(None);
        }
        if deltas.is_empty() {
            log_debug!(
                component = "commit",
                event = "empty_commit_skipped",
                commit_user = %self.user,
                identity = %identity,
            );
            return Ok(None);
        }

        let data_entries: Vec<ManifestEntry> =
            deltas.iter().flat_map(FileDelta::data_entries).collect();
        let changelog_entries: Vec<ManifestEntry> = deltas
            .iter()
            .flat_map(|d| {
                d.changelog_files
                    .iter()
                    .map(|f| ManifestEntry::add(d.partition.clone(), d.bucket, f.clone()))
            })
            .collect();
        let delta_manifest = self.ctx.manifests.write(&data_entries)?;
        let changelog_manifest = if changelog_entries.is_empty() {
            None
        } else {
            Some(self.ctx.manifests.write(&changelog_entries)?)
        };
        let commit_kind = if deltas
            .iter()
            .all(|d| d.new_files.is_empty() && d.min_sequence.is_none())
        {
            CommitKind::Compact
        } else {
            CommitKind::Append
        };
        let delta_record_count: i64 = data_entries
            .iter()
            .map(|e| match e.change {
                FileChange::Add => e.file.row_count as i64,
                FileChange::Delete => -(e.file.row_count as i64),
            })
            .sum();

        let mut checked_up_to = latest_id;
        for attempt in 0..=self.ctx.options.commit_max_retries {
            let latest = self.ctx.snapshots.latest()?;
            let latest_id = latest.as_ref().map(|s| s.id);
            if let Some(id) = self.find_identity(identity, checked_up_to, latest_id)? {
                log_info!(
                    component = "commit",
                    event = "commit_already_applied",
                    commit_user = %self.user,
                    identity = %identity,
                    snapshot_id = id,
                );
                return Ok(None);
            }
            checked_up_to = latest_id;

            self.check_conflicts(&deltas, latest.as_deref())?;

            let base_manifests = self.base_manifests(latest.as_deref())?;
            let total_record_count = latest
                .as_ref()
                .map_or(0, |s| s.total_record_count)
                .saturating_add_signed(delta_record_count);
            let snapshot = Snapshot {
                version: Snapshot::format_version(),
                id: latest_id.map_or(1, |id| id + 1),
                schema_id: self.ctx.schema.id(),
                base_manifests,
                delta_manifest: Some(delta_manifest.clone()),
                changelog_manifest: changelog_manifest.clone(),
                commit_user: self.user.clone(),
                commit_identifier: identity.to_string(),
                commit_kind,
                time_millis: Snapshot::now_millis(),
                total_record_count,
                delta_record_count,
            };
            if self.ctx.snapshots.try_publish(&snapshot)? {
                log_info!(
                    component = "commit",
                    event = "snapshot_published",
                    snapshot_id = snapshot.id,
                    commit_user = %self.user,
                    identity = %identity,
                    kind = ?commit_kind,
                    buckets = deltas.len(),
                    attempt,
                );
                return Ok(Some(snapshot.id));
            }
            log_debug!(
                component = "commit",
                event = "commit_retry",
                snapshot_id = snapshot.id,
                attempt,
            );
        }
        log_warn!(
            component = "commit",
            event = "commit_retries_exhausted",
            commit_user = %self.user,
            identity = %identity,
        );
        Err(TableError::CommitConflict(format!(
            "could not publish after {} attempts",
            self.ctx.options.commit_max_retries + 1
        )))
    }

    /// Newest snapshot in `(from_exclusive, to_inclusive]` carrying this
    /// user's `identity`.
    fn find_identity(
        &self,
        identity: &str,
        from_exclusive: Option<u64>,
        to_inclusive: Option<u64>,
    ) -> Result<Option<u64>, TableError> {
        let Some(to) = to_inclusive else {
            return Ok(None);
        };
        let earliest = self.ctx.snapshots.earliest_id()?.unwrap_or(1);
        let from = from_exclusive.map_or(earliest, |id| (id + 1).max(earliest));
        for id in (from..=to).rev() {
            let snapshot = self.ctx.snapshots.get(id)?;
            if snapshot.commit_user == self.user && snapshot.commit_identifier == identity {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn check_conflicts(
        &self,
        deltas: &[FileDelta],
        latest: Option<&Snapshot>,
    ) -> Result<(), TableError> {
        let Some(latest) = latest else {
            if deltas.iter().any(|d| !d.compact_before.is_empty()) {
                return Err(TableError::CommitConflict(
                    "compaction removes files from an empty table".into(),
                ));
            }
            return Ok(());
        };

        // files added later by someone else that may overlap our sequences
        for delta in deltas {
            let Some(min_sequence) = delta.min_sequence else {
                continue;
            };
            for snapshot in self.ctx.snapshots.range(delta.base_snapshot, latest.id)? {
                let Some(manifest) = snapshot.delta_manifest.as_ref() else {
                    continue;
                };
                let clash = self.ctx.manifests.read(manifest)?.iter().any(|entry| {
                    entry.change == FileChange::Add
                        && entry.bucket == delta.bucket
                        && entry.partition == delta.partition
                        && entry.file.max_sequence >= min_sequence
                });
                if clash {
                    return Err(TableError::CommitConflict(format!(
                        "snapshot {} wrote partition {} bucket {} after base {:?}",
                        snapshot.id, delta.partition, delta.bucket, delta.base_snapshot
                    )));
                }
            }
        }

        // compaction inputs must still be live
        if deltas.iter().any(|d| !d.compact_before.is_empty()) {
            let mut live: HashSet<(KeyOwned, u32, String)> = self
                .ctx
                .live_files(latest)?
                .iter()
                .map(ManifestEntry::identifier)
                .collect();
            for delta in deltas {
                for file in &delta.compact_before {
                    let id = (delta.partition.clone(), delta.bucket, file.file_name.clone());
                    if !live.remove(&id) {
                        return Err(TableError::CommitConflict(format!(
                            "file {} of partition {} bucket {} is no longer live",
                            file.file_name, delta.partition, delta.bucket
                        )));
                    }
                }
                for file in delta.compact_after.iter().chain(&delta.new_files) {
                    live.insert((delta.partition.clone(), delta.bucket, file.file_name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Manifests describing `latest`, folded into one when too many pile up.
    fn base_manifests(&self, latest: Option<&Snapshot>) -> Result<Vec<String>, TableError> {
        let Some(latest) = latest else {
            return Ok(Vec::new());
        };
        let manifests: Vec<String> = latest.data_manifests().cloned().collect();
        if manifests.len() <= self.ctx.options.manifest_merge_min_count {
            return Ok(manifests);
        }
        let live = merge_entries(self.ctx.manifests.read_all(&manifests)?);
        let merged = self.ctx.manifests.write(&live)?;
        log_debug!(
            component = "commit",
            event = "manifests_merged",
            inputs = manifests.len(),
            live_files = live.len(),
        );
        Ok(vec![merged])
    }
}
