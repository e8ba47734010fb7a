//! Manifest files: JSON lists of file additions and removals.
//!
//! A snapshot references a list of base manifests (the state before the
//! commit) plus one delta manifest. Replaying them in order yields the live
//! file set, the same way version edits are folded into a version state.

use std::{collections::BTreeMap, fs, io::Write, path::PathBuf, sync::Arc};

use foyer::{Cache, CacheBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    data_file::DataFileMeta, id::FileIdGenerator, key::KeyOwned, snapshot::SnapshotError,
};

/// Whether an entry adds or removes a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileChange {
    /// The file joins the table.
    Add,
    /// The file leaves the table.
    Delete,
}

/// One file change inside a manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Add or delete.
    pub change: FileChange,
    /// Partition the file belongs to.
    pub partition: KeyOwned,
    /// Bucket within the partition.
    pub bucket: u32,
    /// The file itself.
    pub file: DataFileMeta,
}

impl ManifestEntry {
    /// Entry adding `file`.
    pub fn add(partition: KeyOwned, bucket: u32, file: DataFileMeta) -> Self {
        Self {
            change: FileChange::Add,
            partition,
            bucket,
            file,
        }
    }

    /// Entry removing `file`.
    pub fn delete(partition: KeyOwned, bucket: u32, file: DataFileMeta) -> Self {
        Self {
            change: FileChange::Delete,
            partition,
            bucket,
            file,
        }
    }

    /// Identity of the file this entry talks about.
    pub(crate) fn identifier(&self) -> (KeyOwned, u32, String) {
        (
            self.partition.clone(),
            self.bucket,
            self.file.file_name.clone(),
        )
    }
}

/// Folds entries in order into the set of live files.
///
/// Output is sorted by partition, bucket and file name so scans are
/// deterministic.
pub fn merge_entries<I>(entries: I) -> Vec<ManifestEntry>
where
    I: IntoIterator<Item = ManifestEntry>,
{
    let mut live: BTreeMap<(KeyOwned, u32, String), ManifestEntry> = BTreeMap::new();
    for entry in entries {
        match entry.change {
            FileChange::Add => {
                live.insert(entry.identifier(), entry);
            }
            FileChange::Delete => {
                live.remove(&entry.identifier());
            }
        }
    }
    live.into_values().collect()
}

/// Reads and writes manifest files under `<table>/manifest`.
pub struct ManifestStore {
    dir: PathBuf,
    ids: Arc<FileIdGenerator>,
    cache: Cache<String, Arc<Vec<ManifestEntry>>>,
}

impl ManifestStore {
    /// Store over `dir` keeping at most `cache_entries` parsed manifests.
    pub fn new(dir: PathBuf, ids: Arc<FileIdGenerator>, cache_entries: usize) -> Self {
        Self {
            dir,
            ids,
            cache: CacheBuilder::new(cache_entries).build(),
        }
    }

    /// Writes a new manifest file and returns its name.
    pub fn write(&self, entries: &[ManifestEntry]) -> Result<String, SnapshotError> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("manifest-{}", self.ids.generate());
        let bytes = serde_json::to_vec(entries)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(&name))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        self.cache.insert(name.clone(), Arc::new(entries.to_vec()));
        Ok(name)
    }

    /// Reads a manifest; files are immutable so results are cached.
    pub fn read(&self, name: &str) -> Result<Arc<Vec<ManifestEntry>>, SnapshotError> {
        let key = name.to_string();
        if let Some(entry) = self.cache.get(&key) {
            return Ok(Arc::clone(entry.value()));
        }
        let path = self.dir.join(name);
        let bytes = fs::read(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => SnapshotError::MissingManifest(name.to_string()),
            _ => SnapshotError::Io(err),
        })?;
        let entries: Arc<Vec<ManifestEntry>> = Arc::new(serde_json::from_slice(&bytes)?);
        self.cache.insert(key, Arc::clone(&entries));
        Ok(entries)
    }

    /// Replays the named manifests in order.
    pub fn read_all<'a, I>(&self, names: I) -> Result<Vec<ManifestEntry>, SnapshotError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out = Vec::new();
        for name in names {
            out.extend(self.read(name)?.iter().cloned());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_file::FileKind,
        id::FileId,
        key::KeyOwned,
    };

    fn file(name: &str) -> DataFileMeta {
        DataFileMeta {
            file_name: name.to_string(),
            kind: FileKind::Data,
            format: "parquet".into(),
            run_id: FileId::nil(),
            level: 0,
            row_count: 1,
            file_size: 1,
            min_key: KeyOwned::default(),
            max_key: KeyOwned::default(),
            min_sequence: 0,
            max_sequence: 0,
            schema_id: 0,
            stats: None,
        }
    }

    #[test]
    fn merge_entries_applies_deletes_in_order() {
        let p = KeyOwned::default();
        let merged = merge_entries(vec![
            ManifestEntry::add(p.clone(), 0, file("b")),
            ManifestEntry::add(p.clone(), 0, file("a")),
            ManifestEntry::delete(p.clone(), 0, file("b")),
            ManifestEntry::add(p.clone(), 1, file("b")),
        ]);
        let names: Vec<(u32, &str)> = merged
            .iter()
            .map(|e| (e.bucket, e.file.file_name.as_str()))
            .collect();
        assert_eq!(names, vec![(0, "a"), (1, "b")]);
    }

    #[test]
    fn manifests_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ids = Arc::new(FileIdGenerator::new());
        let store = ManifestStore::new(dir.path().join("manifest"), Arc::clone(&ids), 16);
        let entries = vec![ManifestEntry::add(KeyOwned::default(), 0, file("a"))];
        let name = store.write(&entries).expect("write");

        let fresh = ManifestStore::new(dir.path().join("manifest"), ids, 16);
        assert_eq!(*fresh.read(&name).expect("read"), entries);
        assert!(matches!(
            fresh.read("manifest-missing"),
            Err(SnapshotError::MissingManifest(_))
        ));
    }

    #[test]
    fn manifest_cache_stays_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ids = Arc::new(FileIdGenerator::new());
        let store = ManifestStore::new(dir.path().join("manifest"), ids, 4);
        let names: Vec<String> = (0..32)
            .map(|i| {
                let entries = vec![ManifestEntry::add(KeyOwned::default(), i, file("a"))];
                store.write(&entries).expect("write")
            })
            .collect();
        let replayed = store.read_all(&names).expect("read all");
        assert_eq!(replayed.len(), 32);
        assert!(store.cache.usage() <= store.cache.capacity());
    }
}
