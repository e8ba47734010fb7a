//! Immutable snapshots and the manager that publishes them.
//!
//! Snapshot `N` lives in `snapshot/snapshot-N` and is never rewritten. A
//! commit publishes `N + 1` by hard-linking a fully written temporary file to
//! that name, so of several racing committers exactly one wins and the rest
//! observe `AlreadyExists`. `LATEST` is only a hint; readers probe past it.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use foyer::{Cache, CacheBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    id::FileIdGenerator,
    observability::{log_debug, log_warn},
};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const LATEST_HINT: &str = "LATEST";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Errors raised by the snapshot and manifest stores.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed snapshot or manifest JSON.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// No snapshot with that id.
    #[error("snapshot {0} does not exist")]
    Missing(u64),
    /// A snapshot names a manifest that is gone.
    #[error("manifest `{0}` does not exist")]
    MissingManifest(String),
    /// Written by a newer format.
    #[error("unsupported snapshot format version {0}")]
    Version(u32),
}

/// What a snapshot changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitKind {
    /// New data arrived (possibly together with compaction).
    Append,
    /// Files were only rearranged.
    Compact,
}

/// Point-in-time view of the table's file set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// On-disk format version.
    pub version: u32,
    /// Position in the snapshot chain, starting at 1.
    pub id: u64,
    /// Schema the snapshot was written with.
    pub schema_id: u64,
    /// Manifests describing the state of snapshot `id - 1`.
    pub base_manifests: Vec<String>,
    /// Data file changes introduced by this snapshot.
    pub delta_manifest: Option<String>,
    /// Changelog files produced by this snapshot.
    pub changelog_manifest: Option<String>,
    /// Committer that published the snapshot.
    pub commit_user: String,
    /// Identifier the committer attached, used for idempotence.
    pub commit_identifier: String,
    /// Append or compaction.
    pub commit_kind: CommitKind,
    /// Publish time in milliseconds since the Unix epoch.
    pub time_millis: u64,
    /// Stored rows across all live data files.
    pub total_record_count: u64,
    /// Net row change against the previous snapshot.
    pub delta_record_count: i64,
}

impl Snapshot {
    /// Base manifests followed by the delta, in replay order.
    pub fn data_manifests(&self) -> impl Iterator<Item = &String> {
        self.base_manifests.iter().chain(self.delta_manifest.iter())
    }

    pub(crate) fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn format_version() -> u32 {
        SNAPSHOT_FORMAT_VERSION
    }
}

/// Append-only arena of snapshots backed by the `snapshot/` directory.
pub struct SnapshotManager {
    dir: PathBuf,
    ids: Arc<FileIdGenerator>,
    cache: Cache<u64, Arc<Snapshot>>,
}

impl SnapshotManager {
    /// Manager over `dir` keeping at most `cache_entries` parsed snapshots.
    pub fn new(dir: PathBuf, ids: Arc<FileIdGenerator>, cache_entries: usize) -> Self {
        Self {
            dir,
            ids,
            cache: CacheBuilder::new(cache_entries).build(),
        }
    }

    fn snapshot_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_PREFIX}{id}"))
    }

    fn listed_ids(&self) -> Result<Vec<u64>, SnapshotError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let name = entry?.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Id of the newest published snapshot.
    pub fn latest_id(&self) -> Result<Option<u64>, SnapshotError> {
        let hint = fs::read_to_string(self.dir.join(LATEST_HINT))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|id| self.snapshot_path(*id).exists());
        let mut latest = match hint {
            Some(id) => id,
            None => match self.listed_ids()?.last() {
                Some(id) => *id,
                None => return Ok(None),
            },
        };
        while self.snapshot_path(latest + 1).exists() {
            latest += 1;
        }
        Ok(Some(latest))
    }

    /// Id of the oldest snapshot still on disk.
    pub fn earliest_id(&self) -> Result<Option<u64>, SnapshotError> {
        Ok(self.listed_ids()?.first().copied())
    }

    /// Snapshot `id`, from the cache when present.
    pub fn get(&self, id: u64) -> Result<Arc<Snapshot>, SnapshotError> {
        if let Some(entry) = self.cache.get(&id) {
            return Ok(Arc::clone(entry.value()));
        }
        let bytes = fs::read(self.snapshot_path(id)).map_err(|err| match err.kind() {
            ErrorKind::NotFound => SnapshotError::Missing(id),
            _ => SnapshotError::Io(err),
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version > SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }
        let snapshot = Arc::new(snapshot);
        self.cache.insert(id, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Newest published snapshot.
    pub fn latest(&self) -> Result<Option<Arc<Snapshot>>, SnapshotError> {
        self.latest_id()?.map(|id| self.get(id)).transpose()
    }

    /// Snapshots with `from_exclusive < id <= to_inclusive`, oldest first.
    pub fn range(
        &self,
        from_exclusive: Option<u64>,
        to_inclusive: u64,
    ) -> Result<Vec<Arc<Snapshot>>, SnapshotError> {
        let start = from_exclusive.map_or(1, |id| id + 1);
        (start..=to_inclusive).map(|id| self.get(id)).collect()
    }

    /// Publishes `snapshot` under its id. Returns `false` if another
    /// committer already owns that id.
    pub fn try_publish(&self, snapshot: &Snapshot) -> Result<bool, SnapshotError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self
            .dir
            .join(format!(".{SNAPSHOT_PREFIX}{}-{}.tmp", snapshot.id, self.ids.generate()));
        let target = self.snapshot_path(snapshot.id);
        let result = (|| -> Result<bool, SnapshotError> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(snapshot)?)?;
            file.sync_all()?;
            match fs::hard_link(&tmp, &target) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(err) => Err(err.into()),
            }
        })();
        if let Err(err) = fs::remove_file(&tmp) {
            log_warn!(
                component = "snapshot",
                event = "tmp_cleanup_failed",
                path = %tmp.display(),
                error = %err,
            );
        }
        let published = result?;
        if published {
            self.cache.insert(snapshot.id, Arc::new(snapshot.clone()));
            self.write_latest_hint(snapshot.id);
        } else {
            log_debug!(
                component = "snapshot",
                event = "publish_lost_race",
                snapshot_id = snapshot.id,
            );
        }
        Ok(published)
    }

    fn write_latest_hint(&self, id: u64) {
        let tmp = self.dir.join(format!(".{LATEST_HINT}-{}.tmp", self.ids.generate()));
        let outcome = fs::write(&tmp, id.to_string())
            .and_then(|()| fs::rename(&tmp, self.dir.join(LATEST_HINT)));
        if let Err(err) = outcome {
            let _ = fs::remove_file(&tmp);
            log_warn!(
                component = "snapshot",
                event = "latest_hint_failed",
                snapshot_id = id,
                error = %err,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u64) -> Snapshot {
        Snapshot {
            version: Snapshot::format_version(),
            id,
            schema_id: 0,
            base_manifests: Vec::new(),
            delta_manifest: None,
            changelog_manifest: None,
            commit_user: "u".into(),
            commit_identifier: format!("c{id}"),
            commit_kind: CommitKind::Append,
            time_millis: 0,
            total_record_count: 0,
            delta_record_count: 0,
        }
    }

    #[test]
    fn publish_is_exclusive_per_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ids = Arc::new(FileIdGenerator::new());
        let manager = SnapshotManager::new(dir.path().join("snapshot"), Arc::clone(&ids), 16);
        assert_eq!(manager.latest_id().expect("latest"), None);

        assert!(manager.try_publish(&snapshot(1)).expect("publish"));
        let mut rival = snapshot(1);
        rival.commit_user = "other".into();
        assert!(!manager.try_publish(&rival).expect("publish"));
        assert_eq!(manager.get(1).expect("get").commit_user, "u");

        assert!(manager.try_publish(&snapshot(2)).expect("publish"));
        let fresh = SnapshotManager::new(dir.path().join("snapshot"), ids, 16);
        assert_eq!(fresh.latest_id().expect("latest"), Some(2));
        assert_eq!(fresh.earliest_id().expect("earliest"), Some(1));
        assert_eq!(fresh.range(Some(1), 2).expect("range").len(), 1);
        assert!(matches!(fresh.get(9), Err(SnapshotError::Missing(9))));
    }

    #[test]
    fn stale_latest_hint_is_probed_past() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ids = Arc::new(FileIdGenerator::new());
        let manager = SnapshotManager::new(dir.path().join("snapshot"), ids, 16);
        for id in 1..=3 {
            assert!(manager.try_publish(&snapshot(id)).expect("publish"));
        }
        fs::write(dir.path().join("snapshot").join(LATEST_HINT), "1").expect("hint");
        assert_eq!(manager.latest_id().expect("latest"), Some(3));
    }

    #[test]
    fn snapshot_cache_stays_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ids = Arc::new(FileIdGenerator::new());
        let manager = SnapshotManager::new(dir.path().join("snapshot"), ids, 4);
        for id in 1..=40 {
            assert!(manager.try_publish(&snapshot(id)).expect("publish"));
        }
        for id in 1..=40 {
            assert_eq!(manager.get(id).expect("get").id, id);
        }
        assert!(manager.cache.usage() <= manager.cache.capacity());
        assert_eq!(manager.range(None, 40).expect("range").len(), 40);
    }
}
