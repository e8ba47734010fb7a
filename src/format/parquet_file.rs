use std::{fs::OpenOptions, path::Path};

use arrow::array::RecordBatch;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};

use super::{BatchReader, FileFormat, FormatError};
use crate::options::Compression;

/// Built-in parquet codec over the synchronous arrow writer and reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetFormat;

impl FileFormat for ParquetFormat {
    fn tag(&self) -> &'static str {
        "parquet"
    }

    fn write(
        &self,
        path: &Path,
        batch: &RecordBatch,
        compression: Compression,
    ) -> Result<u64, FormatError> {
        // data files are immutable; never clobber an existing name
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut writer =
            ArrowWriter::try_new(file, batch.schema(), Some(compression.writer_properties()))?;
        writer.write(batch)?;
        let file = writer.into_inner()?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }

    fn read(&self, path: &Path, batch_size: usize) -> Result<BatchReader, FormatError> {
        let file = std::fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(batch_size)
            .build()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(FormatError::from))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Int32Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };

    use super::*;

    #[test]
    fn write_then_stream_in_small_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("x"), Some("y"), None])) as ArrayRef,
            ],
        )
        .expect("batch");

        let size = ParquetFormat
            .write(&path, &batch, Compression::Zlib)
            .expect("write");
        assert!(size > 0);
        assert!(ParquetFormat.write(&path, &batch, Compression::None).is_err());

        let batches: Vec<RecordBatch> = ParquetFormat
            .read(&path, 2)
            .expect("open")
            .collect::<Result<_, _>>()
            .expect("read");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 3);
    }
}
