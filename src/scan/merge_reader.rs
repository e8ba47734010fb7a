//! Heap-based k-way merge over the sorted runs of one bucket.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    sync::Arc,
};

use crate::{
    context::{KeyValueReader, StoreContext},
    data_file::{DataFileMeta, SortedRun},
    error::TableError,
    key::KeyOwned,
    record::KeyValue,
};

/// Streams the files of one run back to back, opening each on demand.
pub(crate) struct RunReader {
    ctx: Arc<StoreContext>,
    partition: KeyOwned,
    bucket: u32,
    files: VecDeque<DataFileMeta>,
    current: Option<KeyValueReader>,
}

impl RunReader {
    pub(crate) fn new(
        ctx: Arc<StoreContext>,
        partition: KeyOwned,
        bucket: u32,
        files: impl IntoIterator<Item = DataFileMeta>,
    ) -> Self {
        Self {
            ctx,
            partition,
            bucket,
            files: files.into_iter().collect(),
            current: None,
        }
    }
}

impl Iterator for RunReader {
    type Item = Result<KeyValue, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            let file = self.files.pop_front()?;
            match self
                .ctx
                .read_key_values(&self.partition, self.bucket, &file)
            {
                Ok(reader) => self.current = Some(reader),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Yields each key once, with all its versions in ascending sequence order.
pub(crate) struct KeyGroupReader {
    runs: Vec<RunReader>,
    peeked: BinaryHeap<CmpEntry>,
}

impl KeyGroupReader {
    pub(crate) fn new(
        ctx: &Arc<StoreContext>,
        partition: &KeyOwned,
        bucket: u32,
        runs: &[SortedRun],
    ) -> Result<Self, TableError> {
        let mut readers: Vec<RunReader> = runs
            .iter()
            .map(|run| {
                RunReader::new(
                    Arc::clone(ctx),
                    partition.clone(),
                    bucket,
                    run.files.iter().cloned(),
                )
            })
            .collect();
        let mut peeked = BinaryHeap::with_capacity(readers.len());
        for (offset, reader) in readers.iter_mut().enumerate() {
            if let Some(entry) = reader.next() {
                peeked.push(CmpEntry::new(offset, entry?));
            }
        }
        Ok(Self {
            runs: readers,
            peeked,
        })
    }

    fn pop_and_advance(&mut self) -> Result<Option<KeyValue>, TableError> {
        let Some(top) = self.peeked.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.runs[top.offset].next() {
            self.peeked.push(CmpEntry::new(top.offset, next?));
        }
        Ok(Some(top.entry))
    }

    fn next_group(&mut self) -> Result<Option<(KeyOwned, Vec<KeyValue>)>, TableError> {
        let Some(first) = self.pop_and_advance()? else {
            return Ok(None);
        };
        let key = first.key.clone();
        let mut versions = vec![first];
        while self
            .peeked
            .peek()
            .is_some_and(|entry| entry.entry.key == key)
        {
            if let Some(kv) = self.pop_and_advance()? {
                versions.push(kv);
            }
        }
        versions.sort_by_key(|kv| kv.sequence);
        Ok(Some((key, versions)))
    }
}

impl Iterator for KeyGroupReader {
    type Item = Result<(KeyOwned, Vec<KeyValue>), TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_group().transpose()
    }
}

#[derive(Debug)]
struct CmpEntry {
    offset: usize,
    entry: KeyValue,
}

impl CmpEntry {
    fn new(offset: usize, entry: KeyValue) -> Self {
        Self { offset, entry }
    }
}

impl PartialEq for CmpEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CmpEntry {}

impl PartialOrd for CmpEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CmpEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .key
            .cmp(&other.entry.key)
            .then(self.entry.sequence.cmp(&other.entry.sequence))
            .then(self.offset.cmp(&other.offset))
            .reverse()
    }
}
