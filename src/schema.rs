//! Table schema: typed columns plus partition and primary keys.

use std::{collections::BTreeMap, sync::Arc};

use arrow::datatypes::{
    DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef, TimeUnit,
};
use serde::{Deserialize, Serialize};
use tablestore_predicate::ScalarValue;

use crate::{
    error::TableError, format::columnar::SYSTEM_COLUMNS, options::WriteMode, record::Row,
};

/// Logical column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// True or false.
    Boolean,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    Utf8,
    /// Raw bytes.
    Binary,
    /// Days since the Unix epoch.
    Date32,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// Fixed-point number of at most 38 digits, `scale` of them fractional.
    Decimal {
        /// Total digits.
        precision: u8,
        /// Fractional digits.
        scale: i8,
    },
}

impl DataType {
    /// Whether a non-null literal belongs to this type.
    pub fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(
            (self, value),
            (DataType::Boolean, ScalarValue::Boolean(_))
                | (DataType::Int8, ScalarValue::Int8(_))
                | (DataType::Int16, ScalarValue::Int16(_))
                | (DataType::Int32, ScalarValue::Int32(_))
                | (DataType::Int64, ScalarValue::Int64(_))
                | (DataType::Float32, ScalarValue::Float32(_))
                | (DataType::Float64, ScalarValue::Float64(_))
                | (DataType::Utf8, ScalarValue::Utf8(_))
                | (DataType::Binary, ScalarValue::Binary(_))
                | (DataType::Date32, ScalarValue::Date32(_))
                | (DataType::Timestamp, ScalarValue::Timestamp(_))
        ) || match (self, value) {
            (
                DataType::Decimal { precision, scale },
                ScalarValue::Decimal128(unscaled, _, value_scale),
            ) => scale == value_scale && fits_precision(*unscaled, *precision),
            _ => false,
        }
    }

    pub(crate) fn to_arrow(self) -> ArrowDataType {
        match self {
            DataType::Boolean => ArrowDataType::Boolean,
            DataType::Int8 => ArrowDataType::Int8,
            DataType::Int16 => ArrowDataType::Int16,
            DataType::Int32 => ArrowDataType::Int32,
            DataType::Int64 => ArrowDataType::Int64,
            DataType::Float32 => ArrowDataType::Float32,
            DataType::Float64 => ArrowDataType::Float64,
            DataType::Utf8 => ArrowDataType::Utf8,
            DataType::Binary => ArrowDataType::Binary,
            DataType::Date32 => ArrowDataType::Date32,
            DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Millisecond, None),
            DataType::Decimal { precision, scale } => ArrowDataType::Decimal128(precision, scale),
        }
    }
}

fn fits_precision(unscaled: i128, precision: u8) -> bool {
    10_i128
        .checked_pow(u32::from(precision))
        .map_or(true, |limit| unscaled.unsigned_abs() < limit.unsigned_abs())
}

/// Named, typed column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique within the schema.
    pub name: String,
    /// Logical type.
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    pub nullable: bool,
}

impl Field {
    /// Column `name` of `data_type`.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Row validation failures raised by `TableWrite::write`.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The row has the wrong number of values.
    #[error("expected {expected} fields, got {actual}")]
    Arity {
        /// Columns in the schema.
        expected: usize,
        /// Values in the row.
        actual: usize,
    },
    /// A value does not belong to its column type.
    #[error("column `{column}` expects {expected:?}, got {actual}")]
    Type {
        /// Offending column.
        column: String,
        /// Declared type.
        expected: DataType,
        /// Type name of the value.
        actual: &'static str,
    },
    /// Null written to a NOT NULL column.
    #[error("column `{column}` is not nullable")]
    NullValue {
        /// Offending column.
        column: String,
    },
    /// The row cannot be written to this table at all.
    #[error("{0}")]
    Unsupported(String),
}

/// Versioned table definition, persisted as `schema/schema-<id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub(crate) id: u64,
    pub(crate) fields: Vec<Field>,
    pub(crate) partition_keys: Vec<String>,
    pub(crate) primary_keys: Vec<String>,
    #[serde(default)]
    pub(crate) options: BTreeMap<String, String>,
}

impl TableSchema {
    /// Schema over `fields` with no keys.
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            id: 0,
            fields,
            partition_keys: Vec::new(),
            primary_keys: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    /// Sets the partition columns.
    pub fn partition_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableSchema {
            partition_keys: keys.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Sets the primary-key columns.
    pub fn primary_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableSchema {
            primary_keys: keys.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Schema version, starting at 0.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Columns in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Partition column names.
    pub fn partition_key_names(&self) -> &[String] {
        &self.partition_keys
    }

    /// Primary-key column names.
    pub fn primary_key_names(&self) -> &[String] {
        &self.primary_keys
    }

    /// Position of column `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub(crate) fn partition_indices(&self) -> Vec<usize> {
        self.indices_of(&self.partition_keys)
    }

    pub(crate) fn primary_key_indices(&self) -> Vec<usize> {
        self.indices_of(&self.primary_keys)
    }

    fn indices_of(&self, names: &[String]) -> Vec<usize> {
        names.iter().filter_map(|n| self.field_index(n)).collect()
    }

    /// Checks the definition and forces primary-key columns to NOT NULL.
    pub(crate) fn normalize(mut self, mode: WriteMode) -> Result<Self, TableError> {
        if self.fields.is_empty() {
            return Err(TableError::Config("table needs at least one column".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if SYSTEM_COLUMNS
                .iter()
                .any(|system| system.eq_ignore_ascii_case(&field.name))
            {
                return Err(TableError::Config(format!(
                    "column name `{}` is reserved",
                    field.name
                )));
            }
            if let DataType::Decimal { precision, scale } = field.data_type {
                if !(1..=38).contains(&precision) || i16::from(scale) > i16::from(precision) {
                    return Err(TableError::Config(format!(
                        "column `{}` has invalid decimal({precision}, {scale})",
                        field.name
                    )));
                }
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(TableError::Config(format!(
                    "duplicate column `{}`",
                    field.name
                )));
            }
        }
        for name in self.partition_keys.iter().chain(&self.primary_keys) {
            if self.field_index(name).is_none() {
                return Err(TableError::Config(format!("unknown key column `{name}`")));
            }
        }
        if !self.primary_keys.is_empty() {
            if mode == WriteMode::AppendOnly {
                return Err(TableError::Config(
                    "append-only tables cannot declare primary keys".into(),
                ));
            }
            if let Some(missing) = self
                .partition_keys
                .iter()
                .find(|p| !self.primary_keys.contains(p))
            {
                return Err(TableError::Config(format!(
                    "primary keys must contain partition key `{missing}`"
                )));
            }
        }
        let pk = self.primary_keys.clone();
        for field in &mut self.fields {
            if pk.contains(&field.name) {
                field.nullable = false;
            }
        }
        Ok(self)
    }

    /// Arity, type and nullability check for one incoming row.
    pub fn validate(&self, row: &Row) -> Result<(), SchemaError> {
        if row.values.len() != self.fields.len() {
            return Err(SchemaError::Arity {
                expected: self.fields.len(),
                actual: row.values.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(&row.values) {
            if value.is_null() {
                if !field.nullable {
                    return Err(SchemaError::NullValue {
                        column: field.name.clone(),
                    });
                }
            } else if !field.data_type.accepts(value) {
                return Err(SchemaError::Type {
                    column: field.name.clone(),
                    expected: field.data_type,
                    actual: value.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Arrow schema of the user columns.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.fields
                .iter()
                .map(|f| ArrowField::new(&f.name, f.data_type.to_arrow(), f.nullable))
                .collect::<Vec<_>>(),
        ))
    }
}
