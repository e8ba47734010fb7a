use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

/// Literal values accepted by predicate operands and carried by table rows.
///
/// Integer variants of different widths compare numerically with each other
/// and with decimals; integers and decimals compare with floats through
/// `f64`. Every other pairing of distinct variants is incomparable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Represents SQL `NULL`.
    Null,
    /// Boolean literal.
    Boolean(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit floating point.
    Float32(f32),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Binary blob.
    Binary(Vec<u8>),
    /// Days since the Unix epoch.
    Date32(i32),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Unscaled value, precision and scale of a fixed-point number.
    Decimal128(i128, u8, i8),
}

/// Borrowed alias used by evaluators that resolve columns without cloning.
pub type ScalarValueRef<'a> = &'a ScalarValue;

impl ScalarValue {
    /// Returns true when the literal is `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Null => "null",
            ScalarValue::Boolean(_) => "boolean",
            ScalarValue::Int8(_) => "int8",
            ScalarValue::Int16(_) => "int16",
            ScalarValue::Int32(_) => "int32",
            ScalarValue::Int64(_) => "int64",
            ScalarValue::Float32(_) => "float32",
            ScalarValue::Float64(_) => "float64",
            ScalarValue::Utf8(_) => "utf8",
            ScalarValue::Binary(_) => "binary",
            ScalarValue::Date32(_) => "date32",
            ScalarValue::Timestamp(_) => "timestamp",
            ScalarValue::Decimal128(..) => "decimal",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int8(v) => Some(i64::from(*v)),
            ScalarValue::Int16(v) => Some(i64::from(*v)),
            ScalarValue::Int32(v) => Some(i64::from(*v)),
            ScalarValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Float32(v) => Some(f64::from(*v)),
            ScalarValue::Float64(v) => Some(*v),
            ScalarValue::Decimal128(v, _, scale) => {
                Some(*v as f64 / 10_f64.powi(i32::from(*scale)))
            }
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Unscaled value and scale of integers and decimals.
    fn as_decimal(&self) -> Option<(i128, i8)> {
        match self {
            ScalarValue::Decimal128(v, _, scale) => Some((*v, *scale)),
            other => other.as_i64().map(|v| (i128::from(v), 0)),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Int8(_)
            | ScalarValue::Int16(_)
            | ScalarValue::Int32(_)
            | ScalarValue::Int64(_)
            | ScalarValue::Float32(_)
            | ScalarValue::Float64(_)
            | ScalarValue::Decimal128(..) => 2,
            ScalarValue::Utf8(_) => 3,
            ScalarValue::Binary(_) => 4,
            ScalarValue::Date32(_) => 5,
            ScalarValue::Timestamp(_) => 6,
        }
    }

    /// SQL comparison: `None` when either side is `NULL`, when the variants
    /// are incomparable, or when a float comparison involves NaN.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(lhs), Boolean(rhs)) => Some(lhs.cmp(rhs)),
            (Utf8(lhs), Utf8(rhs)) => Some(lhs.cmp(rhs)),
            (Binary(lhs), Binary(rhs)) => Some(lhs.cmp(rhs)),
            (Date32(lhs), Date32(rhs)) => Some(lhs.cmp(rhs)),
            (Timestamp(lhs), Timestamp(rhs)) => Some(lhs.cmp(rhs)),
            (lhs, rhs) => match (lhs.as_i64(), rhs.as_i64()) {
                (Some(l), Some(r)) => Some(l.cmp(&r)),
                _ => match (lhs.as_decimal(), rhs.as_decimal()) {
                    (Some(l), Some(r)) => decimal_cmp(l, r)
                        .or_else(|| lhs.as_f64()?.partial_cmp(&rhs.as_f64()?)),
                    _ => match (lhs.as_f64(), rhs.as_f64()) {
                        (Some(l), Some(r)) => l.partial_cmp(&r),
                        _ => None,
                    },
                },
            },
        }
    }

    /// Total order used for sorting keys: `NULL` first, floats by IEEE total
    /// order, incomparable variants by a fixed type rank.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Float32(lhs), Float32(rhs)) => lhs.total_cmp(rhs),
            (Float64(lhs), Float64(rhs)) => lhs.total_cmp(rhs),
            (lhs, rhs) => lhs
                .compare(rhs)
                .unwrap_or_else(|| lhs.type_rank().cmp(&rhs.type_rank())),
        }
    }
}

/// Exact comparison of two fixed-point numbers; `None` when rescaling to a
/// common scale overflows.
fn decimal_cmp((lhs, lhs_scale): (i128, i8), (rhs, rhs_scale): (i128, i8)) -> Option<Ordering> {
    let rescale = |value: i128, by: i16| {
        10_i128
            .checked_pow(u32::try_from(by).ok()?)
            .and_then(|factor| value.checked_mul(factor))
    };
    let diff = i16::from(lhs_scale) - i16::from(rhs_scale);
    if diff >= 0 {
        Some(lhs.cmp(&rescale(rhs, diff)?))
    } else {
        Some(rescale(lhs, -diff)?.cmp(&rhs))
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int8(v) => write!(f, "{v}"),
            ScalarValue::Int16(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float32(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => f.write_str(v),
            ScalarValue::Binary(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ScalarValue::Date32(v) => write!(f, "{v}"),
            ScalarValue::Timestamp(v) => write!(f, "{v}"),
            ScalarValue::Decimal128(v, _, scale) => {
                if *scale <= 0 {
                    write!(f, "{v}")?;
                    return (0..scale.unsigned_abs()).try_for_each(|_| f.write_str("0"));
                }
                let digits = v.unsigned_abs().to_string();
                let scale = usize::from(scale.unsigned_abs());
                let padded = format!("{digits:0>width$}", width = scale + 1);
                let (int, frac) = padded.split_at(padded.len() - scale);
                let sign = if *v < 0 { "-" } else { "" };
                write!(f, "{sign}{int}.{frac}")
            }
        }
    }
}

macro_rules! impl_from_native {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$native> for ScalarValue {
                fn from(value: $native) -> Self {
                    ScalarValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_native!(
    bool => Boolean,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => Utf8,
    Vec<u8> => Binary,
);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_owned())
    }
}

impl From<&[u8]> for ScalarValue {
    fn from(value: &[u8]) -> Self {
        ScalarValue::Binary(value.to_vec())
    }
}

impl<T> From<Option<T>> for ScalarValue
where
    T: Into<ScalarValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(ScalarValue::Null, Into::into)
    }
}
