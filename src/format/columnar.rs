//! Conversion between rows and Arrow batches.
//!
//! Data files hold the user columns followed by three system columns:
//! `_SEQUENCE_NUMBER`, `_VALUE_KIND` and `_VALUE_COUNT`.

use std::sync::Arc;

use arrow::{
    array::{
        Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Decimal128Array,
        Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, RecordBatch,
        StringArray, TimestampMillisecondArray, UInt64Array,
    },
    datatypes::{
        Date32Type, Decimal128Type, Field as ArrowField, Float32Type, Float64Type, Int16Type,
        Int32Type, Int64Type, Int8Type, Schema as ArrowSchema, SchemaRef,
        TimestampMillisecondType, UInt64Type,
    },
};
use tablestore_predicate::ScalarValue;

use super::FormatError;
use crate::{
    key::KeyOwned,
    record::{KeyValue, Row, RowKind},
    schema::{DataType, TableSchema},
};

pub(crate) const SEQUENCE_NUMBER_COL: &str = "_SEQUENCE_NUMBER";
pub(crate) const VALUE_KIND_COL: &str = "_VALUE_KIND";
pub(crate) const VALUE_COUNT_COL: &str = "_VALUE_COUNT";
/// Names user columns may not take.
pub(crate) const SYSTEM_COLUMNS: [&str; 3] = [SEQUENCE_NUMBER_COL, VALUE_KIND_COL, VALUE_COUNT_COL];

/// Arrow schema of a data file: user columns plus system columns.
pub(crate) fn file_schema(schema: &TableSchema) -> SchemaRef {
    let user = schema.arrow_schema();
    let mut fields: Vec<ArrowField> = user.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(ArrowField::new(
        SEQUENCE_NUMBER_COL,
        arrow::datatypes::DataType::UInt64,
        false,
    ));
    fields.push(ArrowField::new(
        VALUE_KIND_COL,
        arrow::datatypes::DataType::Int8,
        false,
    ));
    fields.push(ArrowField::new(
        VALUE_COUNT_COL,
        arrow::datatypes::DataType::Int64,
        false,
    ));
    Arc::new(ArrowSchema::new(fields))
}

/// Encodes key-values, in order, into one file batch.
pub(crate) fn encode_key_values(
    schema: &TableSchema,
    rows: &[KeyValue],
) -> Result<RecordBatch, FormatError> {
    let mut columns = Vec::with_capacity(schema.fields().len() + 3);
    for (index, field) in schema.fields().iter().enumerate() {
        columns.push(build_column(
            field.data_type,
            &field.name,
            rows.iter().map(|kv| &kv.values[index]),
        )?);
    }
    columns.push(Arc::new(UInt64Array::from_iter_values(
        rows.iter().map(|kv| kv.sequence),
    )) as ArrayRef);
    columns.push(Arc::new(Int8Array::from_iter_values(
        rows.iter().map(|kv| kv.kind.to_i8()),
    )) as ArrayRef);
    columns.push(Arc::new(Int64Array::from_iter_values(
        rows.iter().map(|kv| kv.count),
    )) as ArrayRef);
    Ok(RecordBatch::try_new(file_schema(schema), columns)?)
}

/// Decodes one file batch back into key-values, deriving keys from
/// `key_indices`.
pub(crate) fn decode_key_values(
    schema: &TableSchema,
    key_indices: &[usize],
    batch: &RecordBatch,
) -> Result<Vec<KeyValue>, FormatError> {
    let mut user_columns = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let column = batch
            .column_by_name(&field.name)
            .ok_or_else(|| FormatError::Corrupt(format!("missing column `{}`", field.name)))?;
        user_columns.push((field.data_type, column));
    }
    let sequences = system_column(batch, SEQUENCE_NUMBER_COL)?
        .as_primitive_opt::<UInt64Type>()
        .ok_or_else(|| corrupt_type(SEQUENCE_NUMBER_COL))?;
    let kinds = system_column(batch, VALUE_KIND_COL)?
        .as_primitive_opt::<Int8Type>()
        .ok_or_else(|| corrupt_type(VALUE_KIND_COL))?;
    let counts = system_column(batch, VALUE_COUNT_COL)?
        .as_primitive_opt::<Int64Type>()
        .ok_or_else(|| corrupt_type(VALUE_COUNT_COL))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut values = Vec::with_capacity(user_columns.len());
        for (data_type, column) in &user_columns {
            values.push(scalar_at(*data_type, column.as_ref(), row)?);
        }
        let kind = RowKind::from_i8(kinds.value(row))
            .ok_or_else(|| FormatError::Corrupt(format!("bad row kind {}", kinds.value(row))))?;
        out.push(KeyValue {
            key: KeyOwned::project(&values, key_indices),
            sequence: sequences.value(row),
            kind,
            count: counts.value(row),
            values,
        });
    }
    Ok(out)
}

/// Encodes rows into a batch of the projected user columns.
pub(crate) fn encode_rows(
    schema: &TableSchema,
    projection: &[usize],
    rows: &[Row],
) -> Result<RecordBatch, FormatError> {
    let user = schema.arrow_schema();
    let projected = Arc::new(user.project(projection)?);
    let mut columns = Vec::with_capacity(projection.len());
    for (out_index, &index) in projection.iter().enumerate() {
        let field = &schema.fields()[index];
        // rows arrive already projected
        columns.push(build_column(
            field.data_type,
            &field.name,
            rows.iter().map(|row| &row.values[out_index]),
        )?);
    }
    Ok(RecordBatch::try_new(projected, columns)?)
}

fn system_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, FormatError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FormatError::Corrupt(format!("missing system column `{name}`")))
}

fn corrupt_type(column: &str) -> FormatError {
    FormatError::Corrupt(format!("column `{column}` has an unexpected arrow type"))
}

fn build_column<'a, I>(data_type: DataType, name: &str, values: I) -> Result<ArrayRef, FormatError>
where
    I: Iterator<Item = &'a ScalarValue>,
{
    macro_rules! collect {
        ($variant:ident, $array:ty) => {{
            let mut out = Vec::new();
            for value in values {
                out.push(match value {
                    ScalarValue::Null => None,
                    ScalarValue::$variant(v) => Some(v.clone()),
                    other => return Err(mismatch(name, data_type, other)),
                });
            }
            Arc::new(<$array>::from(out)) as ArrayRef
        }};
    }

    Ok(match data_type {
        DataType::Boolean => collect!(Boolean, BooleanArray),
        DataType::Int8 => collect!(Int8, Int8Array),
        DataType::Int16 => collect!(Int16, Int16Array),
        DataType::Int32 => collect!(Int32, Int32Array),
        DataType::Int64 => collect!(Int64, Int64Array),
        DataType::Float32 => collect!(Float32, Float32Array),
        DataType::Float64 => collect!(Float64, Float64Array),
        DataType::Utf8 => collect!(Utf8, StringArray),
        DataType::Binary => {
            let mut out: Vec<Option<&[u8]>> = Vec::new();
            for value in values {
                out.push(match value {
                    ScalarValue::Null => None,
                    ScalarValue::Binary(v) => Some(v.as_slice()),
                    other => return Err(mismatch(name, data_type, other)),
                });
            }
            Arc::new(BinaryArray::from_opt_vec(out)) as ArrayRef
        }
        DataType::Date32 => collect!(Date32, Date32Array),
        DataType::Timestamp => collect!(Timestamp, TimestampMillisecondArray),
        DataType::Decimal { precision, scale } => {
            let mut out = Vec::new();
            for value in values {
                out.push(match value {
                    ScalarValue::Null => None,
                    ScalarValue::Decimal128(v, _, s) if *s == scale => Some(*v),
                    other => return Err(mismatch(name, data_type, other)),
                });
            }
            Arc::new(Decimal128Array::from(out).with_precision_and_scale(precision, scale)?)
                as ArrayRef
        }
    })
}

fn mismatch(name: &str, data_type: DataType, value: &ScalarValue) -> FormatError {
    FormatError::Corrupt(format!(
        "column `{name}` of type {data_type:?} cannot hold {}",
        value.type_name()
    ))
}

fn scalar_at(
    data_type: DataType,
    array: &dyn Array,
    row: usize,
) -> Result<ScalarValue, FormatError> {
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    let bad = || FormatError::Corrupt(format!("expected {data_type:?} column"));
    Ok(match data_type {
        DataType::Boolean => {
            ScalarValue::Boolean(array.as_boolean_opt().ok_or_else(bad)?.value(row))
        }
        DataType::Int8 => {
            ScalarValue::Int8(array.as_primitive_opt::<Int8Type>().ok_or_else(bad)?.value(row))
        }
        DataType::Int16 => {
            ScalarValue::Int16(array.as_primitive_opt::<Int16Type>().ok_or_else(bad)?.value(row))
        }
        DataType::Int32 => {
            ScalarValue::Int32(array.as_primitive_opt::<Int32Type>().ok_or_else(bad)?.value(row))
        }
        DataType::Int64 => {
            ScalarValue::Int64(array.as_primitive_opt::<Int64Type>().ok_or_else(bad)?.value(row))
        }
        DataType::Float32 => ScalarValue::Float32(
            array.as_primitive_opt::<Float32Type>().ok_or_else(bad)?.value(row),
        ),
        DataType::Float64 => ScalarValue::Float64(
            array.as_primitive_opt::<Float64Type>().ok_or_else(bad)?.value(row),
        ),
        DataType::Utf8 => ScalarValue::Utf8(
            array.as_string_opt::<i32>().ok_or_else(bad)?.value(row).to_string(),
        ),
        DataType::Binary => ScalarValue::Binary(
            array.as_binary_opt::<i32>().ok_or_else(bad)?.value(row).to_vec(),
        ),
        DataType::Date32 => ScalarValue::Date32(
            array.as_primitive_opt::<Date32Type>().ok_or_else(bad)?.value(row),
        ),
        DataType::Timestamp => ScalarValue::Timestamp(
            array
                .as_primitive_opt::<TimestampMillisecondType>()
                .ok_or_else(bad)?
                .value(row),
        ),
        DataType::Decimal { precision, scale } => ScalarValue::Decimal128(
            array
                .as_primitive_opt::<Decimal128Type>()
                .ok_or_else(bad)?
                .value(row),
            precision,
            scale,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn key_values_survive_a_batch() {
        let schema = TableSchema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Utf8, true),
            Field::new("d", DataType::Date32, true),
            Field::new("ts", DataType::Timestamp, true),
            Field::new("raw", DataType::Binary, true),
            Field::new(
                "price",
                DataType::Decimal {
                    precision: 10,
                    scale: 2,
                },
                true,
            ),
        ]);
        let values = vec![
            ScalarValue::Int32(7),
            ScalarValue::Null,
            ScalarValue::Date32(19_000),
            ScalarValue::Timestamp(1_700_000_000_000),
            ScalarValue::Binary(vec![0xde, 0xad]),
            ScalarValue::Decimal128(-12_345, 10, 2),
        ];
        let kv = KeyValue {
            key: KeyOwned::project(&values, &[0]),
            sequence: 42,
            kind: RowKind::Delete,
            count: -2,
            values,
        };
        let batch = encode_key_values(&schema, std::slice::from_ref(&kv)).expect("encode");
        assert_eq!(batch.num_columns(), 9);
        let decoded = decode_key_values(&schema, &[0], &batch).expect("decode");
        assert_eq!(decoded, vec![kv]);
    }

    #[test]
    fn wrong_literal_type_is_rejected() {
        let schema = TableSchema::new(vec![Field::new("a", DataType::Int32, true)]);
        let rows = [Row::insert(vec![ScalarValue::Int64(1)])];
        assert!(matches!(
            encode_rows(&schema, &[0], &rows),
            Err(FormatError::Corrupt(_))
        ));
    }
}
