//! Per-key merge policies.
//!
//! Every policy is a pure reduction over the versions of one key, ordered by
//! sequence number. Reads reduce all versions to a single logical state;
//! flushes and compactions reduce them to the smallest list of versions
//! that still produces the same state when merged with older runs.

use std::iter::{self, Repeat, Take};

use tablestore_predicate::ScalarValue;

use crate::{
    key::KeyOwned,
    options::{CoreOptions, MergeEngineOption, WriteMode},
    record::{KeyValue, Row, RowKind},
    schema::TableSchema,
};

/// Merge policy of a keyed table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeEngine {
    /// Last writer wins; a trailing DELETE removes the key.
    Deduplicate,
    /// Signed counts per full row; `n > 0` yields `n` copies.
    ValueCount,
    /// Last non-null value wins per field; a DELETE resets the key.
    PartialUpdate,
}

impl MergeEngine {
    /// Engine implied by the table definition; `None` for append-only tables.
    pub fn for_table(schema: &TableSchema, options: &CoreOptions) -> Option<Self> {
        match options.write_mode {
            WriteMode::AppendOnly => None,
            WriteMode::ChangeLog if schema.primary_key_names().is_empty() => {
                Some(MergeEngine::ValueCount)
            }
            WriteMode::ChangeLog => Some(match options.merge_engine {
                MergeEngineOption::Deduplicate => MergeEngine::Deduplicate,
                MergeEngineOption::PartialUpdate => MergeEngine::PartialUpdate,
            }),
        }
    }

    /// Logical row of `key` given its versions in ascending sequence order.
    ///
    /// Returns `None` when the key is deleted or its count is not positive.
    /// For value-count tables the row stands for `count` identical copies.
    pub fn merge(&self, key: &KeyOwned, versions: &[KeyValue]) -> Option<KeyValue> {
        self.merge_state(key, versions).filter(|state| match self {
            MergeEngine::ValueCount => state.count > 0,
            _ => !state.kind.is_retract(),
        })
    }

    /// Like [`MergeEngine::merge`] but keeps retracted states, tagged
    /// `Delete`, so changelog readers can surface them.
    pub fn merge_state(&self, key: &KeyOwned, versions: &[KeyValue]) -> Option<KeyValue> {
        let last = versions.last()?;
        debug_assert!(versions.windows(2).all(|w| w[0].sequence < w[1].sequence));
        match self {
            MergeEngine::Deduplicate => Some(last.clone()),
            MergeEngine::ValueCount => {
                let count: i64 = versions.iter().map(|v| v.count).sum();
                if count == 0 {
                    return None;
                }
                Some(KeyValue {
                    key: key.clone(),
                    sequence: last.sequence,
                    kind: if count > 0 {
                        RowKind::Insert
                    } else {
                        RowKind::Delete
                    },
                    count,
                    values: last.values.clone(),
                })
            }
            MergeEngine::PartialUpdate => {
                let reset = versions.iter().rposition(|v| v.kind.is_retract());
                let live = &versions[reset.map_or(0, |i| i + 1)..];
                if live.is_empty() {
                    return Some(last.clone());
                }
                Some(fold_fields(key, live))
            }
        }
    }

    /// Reduces the versions of one key for writing into a new run.
    ///
    /// With `drop_retractions` the run being produced is the oldest data of
    /// its bucket, so deletes and non-positive counts have nothing left to
    /// cancel and are dropped.
    pub fn compact(
        &self,
        key: &KeyOwned,
        versions: Vec<KeyValue>,
        drop_retractions: bool,
    ) -> Vec<KeyValue> {
        match self {
            MergeEngine::Deduplicate | MergeEngine::ValueCount => {
                let state = if drop_retractions {
                    self.merge(key, &versions)
                } else {
                    self.merge_state(key, &versions)
                };
                state.into_iter().collect()
            }
            MergeEngine::PartialUpdate => {
                let Some(reset) = versions.iter().rposition(|v| v.kind.is_retract()) else {
                    return vec![fold_fields(key, &versions)];
                };
                let live = &versions[reset + 1..];
                let mut out = Vec::with_capacity(2);
                // the delete must survive so older runs stay masked
                if !drop_retractions {
                    out.push(versions[reset].clone());
                }
                if !live.is_empty() {
                    out.push(fold_fields(key, live));
                }
                out
            }
        }
    }
}

fn fold_fields(key: &KeyOwned, versions: &[KeyValue]) -> KeyValue {
    let Some(last) = versions.last() else {
        return KeyValue {
            key: key.clone(),
            sequence: 0,
            kind: RowKind::Delete,
            count: 0,
            values: Vec::new(),
        };
    };
    let mut values = vec![ScalarValue::Null; last.values.len()];
    for version in versions {
        for (slot, value) in values.iter_mut().zip(&version.values) {
            if !value.is_null() {
                *slot = value.clone();
            }
        }
    }
    KeyValue {
        key: key.clone(),
        sequence: last.sequence,
        kind: last.kind,
        count: 1,
        values,
    }
}

/// Expands a merged state into output rows: `count` copies for value-count
/// states, one row otherwise.
pub(crate) fn expand(engine: Option<MergeEngine>, state: KeyValue) -> Take<Repeat<Row>> {
    let copies = match engine {
        Some(MergeEngine::ValueCount) => state.count.unsigned_abs(),
        _ => 1,
    };
    let row = state.into_row();
    iter::repeat(row).take(copies as usize)
}
