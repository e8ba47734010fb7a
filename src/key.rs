//! Owned composite keys used for ordering, bucketing and partition values.
//!
//! A `KeyOwned` is a projection of a row onto some columns: the primary key,
//! the whole row for value-count tables, or the partition columns. Ordering
//! is lexicographic over [`ScalarValue::total_cmp`], so NULL sorts first and
//! floats follow IEEE total order. Hashing goes through the canonical byte
//! encoding that also feeds the bucket function.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use tablestore_predicate::ScalarValue;

/// Owned key that can outlive the batch or row it was projected from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyOwned(Vec<ScalarValue>);

impl KeyOwned {
    /// Key made of `components`, in order.
    pub fn new(components: Vec<ScalarValue>) -> Self {
        Self(components)
    }

    /// Projects `values` onto `indices`.
    pub fn project(values: &[ScalarValue], indices: &[usize]) -> Self {
        Self(indices.iter().map(|&i| values[i].clone()).collect())
    }

    /// Key columns in order.
    pub fn components(&self) -> &[ScalarValue] {
        &self.0
    }

    /// True for the key of an unpartitioned table.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical bytes: per component a type tag, then a fixed-width
    /// big-endian payload or a length-prefixed byte string.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() * 9);
        for value in &self.0 {
            encode_component(value, &mut buf);
        }
        buf
    }

    /// Hash of the canonical encoding. Depends only on the key's values, so
    /// bucket assignment survives compaction and relayout.
    pub fn stable_hash(&self) -> u32 {
        crc32fast::hash(&self.encode())
    }

    /// Bucket for this key under a fixed bucket count.
    pub fn bucket(&self, bucket_count: u32) -> u32 {
        self.stable_hash() % bucket_count.max(1)
    }
}

fn encode_component(value: &ScalarValue, buf: &mut Vec<u8>) {
    match value {
        ScalarValue::Null => buf.push(0),
        ScalarValue::Boolean(v) => {
            buf.push(1);
            buf.push(u8::from(*v));
        }
        ScalarValue::Int8(v) => {
            buf.push(2);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Int16(v) => {
            buf.push(3);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Int32(v) => {
            buf.push(4);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Int64(v) => {
            buf.push(5);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Float32(v) => {
            buf.push(6);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        ScalarValue::Float64(v) => {
            buf.push(7);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        ScalarValue::Utf8(v) => {
            buf.push(8);
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v.as_bytes());
        }
        ScalarValue::Binary(v) => {
            buf.push(9);
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v);
        }
        ScalarValue::Date32(v) => {
            buf.push(10);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Timestamp(v) => {
            buf.push(11);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        ScalarValue::Decimal128(v, _, scale) => {
            buf.push(12);
            buf.extend_from_slice(&v.to_be_bytes());
            buf.extend_from_slice(&scale.to_be_bytes());
        }
    }
}

impl From<Vec<ScalarValue>> for KeyOwned {
    fn from(value: Vec<ScalarValue>) -> Self {
        Self(value)
    }
}

impl PartialEq for KeyOwned {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyOwned {}

impl PartialOrd for KeyOwned {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyOwned {
    fn cmp(&self, other: &Self) -> Ordering {
        for (lhs, rhs) in self.0.iter().zip(&other.0) {
            match lhs.total_cmp(rhs) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl Hash for KeyOwned {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encode().hash(state);
    }
}

impl fmt::Display for KeyOwned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}
