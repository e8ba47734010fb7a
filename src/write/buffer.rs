use crossbeam_skiplist::SkipMap;

use crate::{key::KeyOwned, record::KeyValue};

/// Ordering key of a buffered version: merge key first, then sequence.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Sequenced {
    key: KeyOwned,
    sequence: u64,
}

/// In-memory sorted buffer of one bucket.
///
/// Keyed tables order by (key, sequence) so a flush yields each key's
/// versions contiguously. Append-only tables pass an empty key, which
/// leaves rows in sequence order.
#[derive(Default)]
pub(crate) struct WriteBuffer {
    data: SkipMap<Sequenced, KeyValue>,
}

impl WriteBuffer {
    pub(crate) fn insert(&self, order_by_key: bool, kv: KeyValue) {
        let key = if order_by_key {
            kv.key.clone()
        } else {
            KeyOwned::default()
        };
        self.data.insert(
            Sequenced {
                key,
                sequence: kv.sequence,
            },
            kv,
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies every buffered version, in buffer order.
    pub(crate) fn to_vec(&self) -> Vec<KeyValue> {
        self.data.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn clear(&self) {
        self.data.clear();
    }
}

/// Splits versions ordered by key into per-key groups.
pub(crate) fn group_by_key(rows: Vec<KeyValue>) -> Vec<(KeyOwned, Vec<KeyValue>)> {
    let mut groups: Vec<(KeyOwned, Vec<KeyValue>)> = Vec::new();
    for kv in rows {
        match groups.last_mut() {
            Some((key, versions)) if *key == kv.key => versions.push(kv),
            _ => groups.push((kv.key.clone(), vec![kv])),
        }
    }
    groups
}
