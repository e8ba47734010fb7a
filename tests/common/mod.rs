//! Shared helpers for the integration tests.

#![allow(dead_code)]

use tablestore::{
    CoreOptions, DataType, Field, FileStoreTable, ReadBuilder, Row, ScalarValue, TableError,
    TableSchema,
};
use tempfile::TempDir;

/// Table rooted in a fresh temporary directory; the directory lives as long
/// as the fixture.
pub struct TestTable {
    pub dir: TempDir,
    pub table: FileStoreTable,
}

pub fn create_table(
    schema: TableSchema,
    configure: impl FnOnce(CoreOptions) -> CoreOptions,
) -> TestTable {
    let dir = tempfile::tempdir().expect("temp dir");
    let options = configure(CoreOptions::new(dir.path()));
    let table = FileStoreTable::create(options, schema).expect("create table");
    TestTable { dir, table }
}

/// `(id BIGINT NOT NULL, name STRING)` keyed by `id`.
pub fn keyed_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ])
    .primary_keys(["id"])
}

/// `(dt STRING, id BIGINT, v INT)` partitioned by `dt`, keyed by `(dt, id)`.
pub fn partitioned_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new("dt", DataType::Utf8, false),
        Field::new("id", DataType::Int64, false),
        Field::new("v", DataType::Int32, true),
    ])
    .partition_keys(["dt"])
    .primary_keys(["dt", "id"])
}

pub fn kv(id: i64, name: &str) -> Vec<ScalarValue> {
    vec![ScalarValue::Int64(id), ScalarValue::from(name)]
}

pub fn pv(dt: &str, id: i64, v: Option<i32>) -> Vec<ScalarValue> {
    vec![
        ScalarValue::from(dt),
        ScalarValue::Int64(id),
        ScalarValue::from(v),
    ]
}

/// Writes `rows`, prepares with compaction wait and commits under `identity`.
pub fn write_and_commit(
    table: &FileStoreTable,
    identity: &str,
    rows: impl IntoIterator<Item = Row>,
) -> Result<Option<u64>, TableError> {
    let mut write = table.new_write()?;
    for row in rows {
        write.write(row)?;
    }
    let message = write.prepare_commit(true)?;
    write.close();
    table.new_commit("test").commit(identity, [message])
}

/// Rows rendered as `+I[1, a]`, sorted for order-insensitive comparison.
pub fn render(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = rows.iter().map(ToString::to_string).collect();
    out.sort();
    out
}

pub fn read_sorted(read: ReadBuilder) -> Vec<String> {
    render(&read.to_rows().expect("read rows"))
}
