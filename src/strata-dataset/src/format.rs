//! File format abstraction.
//!
//! The dataset layer drives fragment storage through [`FileFormat`] so the
//! manifest, write path, and scanner stay independent of the on-disk page
//! layout. [`StrataFormat`] is the native implementation.

use std::fmt;
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use common_error::StrataResult;
use strata_format::{FragmentDescriptor, FragmentReader, FragmentWriter, WriteParams};

/// Storage backend for fragment files.
pub trait FileFormat: fmt::Debug + Send + Sync {
    /// File extension for fragments of this format, without the dot.
    fn extension(&self) -> &'static str;

    /// Write `batches` as a single fragment file at `path`.
    ///
    /// The file is complete and durable (fsynced) when this returns.
    fn write_fragment(
        &self,
        path: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        params: &WriteParams,
    ) -> StrataResult<FragmentDescriptor>;

    /// Open a fragment file for reading.
    fn open_fragment(&self, path: &Path) -> StrataResult<FragmentReader>;

    /// Read a row range of the given columns from a fragment in one shot.
    fn scan_fragment(
        &self,
        path: &Path,
        projection: &SchemaRef,
        start: usize,
        len: usize,
    ) -> StrataResult<RecordBatch>;
}

/// The native Strata columnar file format.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrataFormat;

impl FileFormat for StrataFormat {
    fn extension(&self) -> &'static str {
        "strata"
    }

    fn write_fragment(
        &self,
        path: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        params: &WriteParams,
    ) -> StrataResult<FragmentDescriptor> {
        let mut writer = FragmentWriter::create(path, schema.clone(), params.clone())?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.finish()
    }

    fn open_fragment(&self, path: &Path) -> StrataResult<FragmentReader> {
        FragmentReader::open(path)
    }

    fn scan_fragment(
        &self,
        path: &Path,
        projection: &SchemaRef,
        start: usize,
        len: usize,
    ) -> StrataResult<RecordBatch> {
        let mut reader = FragmentReader::open(path)?;
        reader.read_range(projection, start, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn test_write_then_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("0.strata");

        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "id",
            DataType::Int64,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![10, 20, 30, 40]))],
        )
        .unwrap();

        let format = StrataFormat;
        let descriptor = format
            .write_fragment(&path, &schema, &[batch], &WriteParams::default())
            .unwrap();
        assert_eq!(descriptor.row_count, 4);

        let out = format.scan_fragment(&path, &schema, 1, 2).unwrap();
        assert_eq!(out.num_rows(), 2);
        let ids = out
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(&ids.values()[..], &[20, 30]);
    }
}
