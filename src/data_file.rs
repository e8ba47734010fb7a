//! Metadata of immutable data and changelog files, and where they live.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tablestore_predicate::ScalarValue;

use crate::{
    id::FileId,
    key::KeyOwned,
    record::KeyValue,
    schema::TableSchema,
};

/// Directory name used for a NULL partition value.
pub const DEFAULT_PARTITION_NAME: &str = "__DEFAULT_PARTITION__";

/// Merged-state files versus raw input changelog files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Merged key-values read by scans and compactions.
    Data,
    /// Input rows in sequence order, read by changelog consumers.
    Changelog,
}

/// Min/max/null statistics of one column in one file.
///
/// `min`/`max` are absent when the column holds only NULLs or a NaN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Smallest non-null value.
    pub min: Option<ScalarValue>,
    /// Largest non-null value.
    pub max: Option<ScalarValue>,
    /// Rows holding NULL.
    pub null_count: u64,
}

/// Descriptor of one immutable file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataFileMeta {
    /// Name within the bucket directory.
    pub file_name: String,
    /// Data or changelog file.
    pub kind: FileKind,
    /// Tag of the format the file was written in.
    pub format: String,
    /// Sorted run the file belongs to.
    pub run_id: FileId,
    /// 0 for flushed runs, 1 for compaction output.
    pub level: u32,
    /// Key-values stored in the file.
    pub row_count: u64,
    /// Size on disk in bytes.
    pub file_size: u64,
    /// Smallest merge key.
    pub min_key: KeyOwned,
    /// Largest merge key.
    pub max_key: KeyOwned,
    /// Smallest sequence number.
    pub min_sequence: u64,
    /// Largest sequence number.
    pub max_sequence: u64,
    /// Schema the file was written with.
    pub schema_id: u64,
    /// One entry per user column; absent stats disable file pruning.
    #[serde(default)]
    pub stats: Option<Vec<ColumnStats>>,
}

impl DataFileMeta {
    /// Builds the descriptor of `rows`, which must be non-empty and in
    /// file order.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn describe(
        file_name: String,
        kind: FileKind,
        format: &str,
        run_id: FileId,
        level: u32,
        schema: &TableSchema,
        rows: &[KeyValue],
        file_size: u64,
    ) -> Self {
        let min_key = rows
            .iter()
            .map(|kv| &kv.key)
            .min()
            .cloned()
            .unwrap_or_default();
        let max_key = rows
            .iter()
            .map(|kv| &kv.key)
            .max()
            .cloned()
            .unwrap_or_default();
        Self {
            file_name,
            kind,
            format: format.to_string(),
            run_id,
            level,
            row_count: rows.len() as u64,
            file_size,
            min_key,
            max_key,
            min_sequence: rows.iter().map(|kv| kv.sequence).min().unwrap_or(0),
            max_sequence: rows.iter().map(|kv| kv.sequence).max().unwrap_or(0),
            schema_id: schema.id(),
            stats: Some(column_stats(schema.fields().len(), rows)),
        }
    }

    /// Stats for column `index`, if recorded.
    pub fn column_stats(&self, index: usize) -> Option<&ColumnStats> {
        self.stats.as_ref().and_then(|stats| stats.get(index))
    }
}

fn column_stats(width: usize, rows: &[KeyValue]) -> Vec<ColumnStats> {
    (0..width)
        .map(|index| {
            let mut min: Option<&ScalarValue> = None;
            let mut max: Option<&ScalarValue> = None;
            let mut null_count = 0;
            let mut comparable = true;
            for kv in rows {
                let value = &kv.values[index];
                if value.is_null() {
                    null_count += 1;
                    continue;
                }
                if !comparable {
                    continue;
                }
                // NaN compares with nothing, so the column gets no range
                if value.compare(value).is_none() {
                    comparable = false;
                    continue;
                }
                match min.map(|m| value.compare(m)) {
                    None | Some(Some(Ordering::Less)) => min = Some(value),
                    Some(None) => comparable = false,
                    _ => {}
                }
                match max.map(|m| value.compare(m)) {
                    None | Some(Some(Ordering::Greater)) => max = Some(value),
                    Some(None) => comparable = false,
                    _ => {}
                }
            }
            let (min, max) = if comparable {
                (min.cloned(), max.cloned())
            } else {
                (None, None)
            };
            ColumnStats {
                min,
                max,
                null_count,
            }
        })
        .collect()
}

/// Files of one bucket written as a single sorted, non-overlapping run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortedRun {
    /// Shared by every file of the run.
    pub run_id: FileId,
    /// Ordered by key range.
    pub files: Vec<DataFileMeta>,
}

impl SortedRun {
    /// Smallest sequence number across the run.
    pub fn min_sequence(&self) -> u64 {
        self.files.iter().map(|f| f.min_sequence).min().unwrap_or(0)
    }

    /// Largest sequence number across the run.
    pub fn max_sequence(&self) -> u64 {
        self.files.iter().map(|f| f.max_sequence).max().unwrap_or(0)
    }

    /// Key-values stored across the run.
    pub fn row_count(&self) -> u64 {
        self.files.iter().map(|f| f.row_count).sum()
    }
}

/// Groups files into runs by run id, oldest run first.
pub(crate) fn group_runs<I>(files: I) -> Vec<SortedRun>
where
    I: IntoIterator<Item = DataFileMeta>,
{
    let mut runs: Vec<SortedRun> = Vec::new();
    for file in files {
        match runs.iter_mut().find(|run| run.run_id == file.run_id) {
            Some(run) => run.files.push(file),
            None => runs.push(SortedRun {
                run_id: file.run_id,
                files: vec![file],
            }),
        }
    }
    for run in &mut runs {
        run.files.sort_by(|a, b| {
            a.min_key
                .cmp(&b.min_key)
                .then(a.min_sequence.cmp(&b.min_sequence))
        });
    }
    runs.sort_by_key(|run| (run.min_sequence(), run.run_id));
    runs
}

/// `k1=v1/k2=v2` directory of a partition; empty for unpartitioned tables.
pub(crate) fn partition_path(schema: &TableSchema, partition: &KeyOwned) -> String {
    schema
        .partition_key_names()
        .iter()
        .zip(partition.components())
        .map(|(name, value)| {
            let rendered = if value.is_null() {
                DEFAULT_PARTITION_NAME.to_string()
            } else {
                let escaped = escape_path_segment(&value.to_string());
                match escaped.strip_prefix('_') {
                    // a literal sentinel must not land in the NULL directory
                    Some(rest) if escaped == DEFAULT_PARTITION_NAME => format!("%5F{rest}"),
                    _ => escaped,
                }
            };
            format!("{}={}", escape_path_segment(name), rendered)
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn escape_path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '/' | '\\' | '=' | '%' | ':' | '\0'..='\x1f' => {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Directory holding the files of one partition and bucket.
pub(crate) fn bucket_dir(
    root: &Path,
    schema: &TableSchema,
    partition: &KeyOwned,
    bucket: u32,
) -> PathBuf {
    let mut dir = root.to_path_buf();
    let partition = partition_path(schema, partition);
    if !partition.is_empty() {
        dir.push(partition);
    }
    dir.push(format!("bucket-{bucket}"));
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::RowKind,
        schema::{DataType, Field},
    };

    fn kv(seq: u64, a: Option<i32>, x: f64) -> KeyValue {
        let values = vec![ScalarValue::from(a), ScalarValue::Float64(x)];
        KeyValue {
            key: KeyOwned::project(&values, &[0]),
            sequence: seq,
            kind: RowKind::Insert,
            count: 1,
            values,
        }
    }

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("x", DataType::Float64, true),
        ])
        .partition_keys(["a"])
    }

    #[test]
    fn stats_skip_nulls_and_nan() {
        let rows = vec![kv(3, Some(5), 1.0), kv(4, None, f64::NAN), kv(9, Some(-2), 2.0)];
        let meta = DataFileMeta::describe(
            "data-x.parquet".into(),
            FileKind::Data,
            "parquet",
            FileId::nil(),
            0,
            &schema(),
            &rows,
            10,
        );
        let a = meta.column_stats(0).expect("a");
        assert_eq!(a.min, Some(ScalarValue::Int32(-2)));
        assert_eq!(a.max, Some(ScalarValue::Int32(5)));
        assert_eq!(a.null_count, 1);
        let x = meta.column_stats(1).expect("x");
        assert_eq!((x.min.clone(), x.max.clone()), (None, None));
        assert_eq!((meta.min_sequence, meta.max_sequence), (3, 9));
        assert_eq!(meta.min_key, KeyOwned::new(vec![ScalarValue::Null]));
    }

    #[test]
    fn runs_group_by_id_and_sort_by_age() {
        let file = |name: &str, run: u128, min_key: i32, seq: u64| DataFileMeta {
            min_key: KeyOwned::new(vec![ScalarValue::Int32(min_key)]),
            min_sequence: seq,
            max_sequence: seq,
            ..DataFileMeta::describe(
                name.into(),
                FileKind::Data,
                "parquet",
                FileId::from(run),
                0,
                &schema(),
                &[kv(seq, Some(min_key), 0.0)],
                1,
            )
        };
        let runs = group_runs(vec![
            file("c", 2, 5, 9),
            file("b", 1, 7, 1),
            file("a", 1, 3, 2),
        ]);
        let names: Vec<Vec<&str>> = runs
            .iter()
            .map(|r| r.files.iter().map(|f| f.file_name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(runs[0].max_sequence(), 2);
    }

    #[test]
    fn partition_directories_escape_and_default_null() {
        let schema = schema();
        let part = KeyOwned::new(vec![ScalarValue::Null]);
        assert_eq!(partition_path(&schema, &part), "a=__DEFAULT_PARTITION__");
        let part = KeyOwned::new(vec![ScalarValue::Int32(3)]);
        let dir = bucket_dir(Path::new("/t"), &schema, &part, 1);
        assert_eq!(dir, PathBuf::from("/t/a=3/bucket-1"));
        assert_eq!(escape_path_segment("x/y=z"), "x%2Fy%3Dz");
    }

    #[test]
    fn literal_sentinel_value_gets_its_own_directory() {
        let schema = TableSchema::new(vec![Field::new("p", DataType::Utf8, true)])
            .partition_keys(["p"]);
        let literal = KeyOwned::new(vec![ScalarValue::from(DEFAULT_PARTITION_NAME)]);
        let null = KeyOwned::new(vec![ScalarValue::Null]);
        assert_eq!(partition_path(&schema, &literal), "p=%5F_DEFAULT_PARTITION__");
        assert_eq!(partition_path(&schema, &null), "p=__DEFAULT_PARTITION__");
        let near = KeyOwned::new(vec![ScalarValue::from("__DEFAULT_PARTITION")]);
        assert_eq!(partition_path(&schema, &near), "p=__DEFAULT_PARTITION");
    }
}
