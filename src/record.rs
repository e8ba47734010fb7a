//! Rows as users see them and key-values as the store persists them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tablestore_predicate::{ColumnRef, ColumnSource, ScalarValue, ScalarValueRef};

use crate::{key::KeyOwned, schema::TableSchema};

/// Change kind attached to a row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKind {
    /// New row, `+I`.
    #[default]
    Insert,
    /// After-image of an update, `+U`.
    Update,
    /// Retraction, `-D`.
    Delete,
}

impl RowKind {
    /// Retractions remove a key (deduplicate) or one copy (value count).
    pub fn is_retract(self) -> bool {
        self == RowKind::Delete
    }

    /// Signed contribution to a value-count table.
    pub fn count_delta(self) -> i64 {
        if self.is_retract() {
            -1
        } else {
            1
        }
    }

    pub(crate) fn to_i8(self) -> i8 {
        match self {
            RowKind::Insert => 0,
            RowKind::Update => 1,
            RowKind::Delete => 2,
        }
    }

    pub(crate) fn from_i8(raw: i8) -> Option<Self> {
        match raw {
            0 => Some(RowKind::Insert),
            1 => Some(RowKind::Update),
            2 => Some(RowKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RowKind::Insert => "+I",
            RowKind::Update => "+U",
            RowKind::Delete => "-D",
        })
    }
}

/// A row in schema column order, tagged with its change kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Change kind.
    pub kind: RowKind,
    /// One value per schema column.
    pub values: Vec<ScalarValue>,
}

impl Row {
    /// Row of `kind` carrying `values`.
    pub fn new(kind: RowKind, values: Vec<ScalarValue>) -> Self {
        Self { kind, values }
    }

    /// `+I` row.
    pub fn insert(values: Vec<ScalarValue>) -> Self {
        Self::new(RowKind::Insert, values)
    }

    /// `+U` row.
    pub fn update(values: Vec<ScalarValue>) -> Self {
        Self::new(RowKind::Update, values)
    }

    /// `-D` row.
    pub fn delete(values: Vec<ScalarValue>) -> Self {
        Self::new(RowKind::Delete, values)
    }

    /// Value of column `index`.
    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.values.get(index)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.kind)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

/// Binds a row to column names for predicate evaluation.
pub(crate) struct RowView<'a> {
    pub(crate) schema: &'a TableSchema,
    pub(crate) values: &'a [ScalarValue],
}

impl ColumnSource for RowView<'_> {
    fn value(&self, column: &ColumnRef) -> Option<ScalarValueRef<'_>> {
        self.schema
            .field_index(&column.name)
            .and_then(|i| self.values.get(i))
    }
}

/// One persisted version of a key.
///
/// `count` is the signed multiplicity for value-count tables and 1 for
/// everything else.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue {
    /// Encoded primary key, empty for keyless tables.
    pub key: KeyOwned,
    /// Write order within the table.
    pub sequence: u64,
    /// Change kind.
    pub kind: RowKind,
    /// Signed multiplicity.
    pub count: i64,
    /// Full row in schema order.
    pub values: Vec<ScalarValue>,
}

impl KeyValue {
    /// Drops the key and sequence.
    pub fn into_row(self) -> Row {
        Row::new(self.kind, self.values)
    }
}
