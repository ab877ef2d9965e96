//! Fragment writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow::array::Array;
use arrow::compute::concat;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use log::debug;

use common_error::{StrataError, StrataResult};

use crate::codec;
use crate::footer::{Footer, FOOTER_SIZE, FORMAT_VERSION};
use crate::page::{ColumnPages, PageDirectory, PageInfo};
use crate::schema::{check_schema_match, schema_digest};

// ============================================================================
// Write Parameters
// ============================================================================

/// Tuning knobs for fragment writing.
#[derive(Debug, Clone)]
pub struct WriteParams {
    /// Maximum logical rows per encoded page. Bounds per-page decode cost and
    /// memory during partial-range reads.
    pub max_rows_per_page: usize,
}

impl Default for WriteParams {
    fn default() -> Self {
        Self {
            max_rows_per_page: 1024,
        }
    }
}

/// Outcome of a successful fragment write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDescriptor {
    /// Path of the written fragment file.
    pub path: PathBuf,
    /// Logical rows in the fragment.
    pub row_count: usize,
    /// Total bytes on disk, footer included.
    pub byte_size: u64,
}

// ============================================================================
// FragmentWriter
// ============================================================================

/// Writes one immutable fragment file.
///
/// Batches are buffered in memory; no bytes touch disk until [`finish`],
/// which writes pages column-first, appends the page directory and footer,
/// and fsyncs. A fragment that did not complete `finish` must never be linked
/// into dataset metadata.
///
/// [`finish`]: FragmentWriter::finish
#[derive(Debug)]
pub struct FragmentWriter {
    path: PathBuf,
    schema: SchemaRef,
    params: WriteParams,
    batches: Vec<RecordBatch>,
}

impl FragmentWriter {
    /// Create a writer targeting `path`.
    ///
    /// Fails with `UnsupportedType` if any schema column has no codec page
    /// layout; this is checked up front so nothing is written for a table
    /// that cannot be fully encoded.
    pub fn create(
        path: impl Into<PathBuf>,
        schema: SchemaRef,
        params: WriteParams,
    ) -> StrataResult<Self> {
        if params.max_rows_per_page == 0 {
            return Err(StrataError::internal("max_rows_per_page must be positive"));
        }
        for field in schema.fields() {
            if !codec::is_supported(field.data_type()) {
                return Err(StrataError::unsupported_type(format!(
                    "column '{}' has type {} which has no page layout",
                    field.name(),
                    field.data_type()
                )));
            }
        }
        Ok(Self {
            path: path.into(),
            schema,
            params,
            batches: Vec::new(),
        })
    }

    /// Buffer a batch for the fragment.
    ///
    /// The batch schema must structurally equal the fragment schema.
    pub fn write(&mut self, batch: &RecordBatch) -> StrataResult<()> {
        check_schema_match(&self.schema, &batch.schema())?;
        if batch.num_rows() > 0 {
            self.batches.push(batch.clone());
        }
        Ok(())
    }

    /// Rows buffered so far.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Target path of the fragment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode all buffered rows, write the file, and fsync.
    pub fn finish(self) -> StrataResult<FragmentDescriptor> {
        let row_count = self.num_rows();
        if row_count == 0 {
            return Err(StrataError::internal(
                "fragment must contain at least one row",
            ));
        }

        let file = File::create(&self.path)?;
        let mut out = BufWriter::new(file);
        let mut offset = 0u64;
        let mut columns = Vec::with_capacity(self.schema.fields().len());

        for (idx, field) in self.schema.fields().iter().enumerate() {
            let parts: Vec<&dyn Array> = self.batches.iter().map(|b| b.column(idx).as_ref()).collect();
            let column = concat(&parts)?;

            let mut pages = Vec::new();
            let mut pos = 0usize;
            while pos < row_count {
                let rows = self.params.max_rows_per_page.min(row_count - pos);
                let chunk = column.slice(pos, rows);
                let bytes = codec::encode_page(chunk.as_ref())?;
                out.write_all(&bytes)?;
                pages.push(PageInfo {
                    offset,
                    length: bytes.len() as u64,
                    rows: rows as u32,
                });
                offset += bytes.len() as u64;
                pos += rows;
            }
            columns.push(ColumnPages {
                name: field.name().clone(),
                pages,
            });
        }

        let directory_offset = offset;
        let dir_bytes = PageDirectory { columns }.to_bytes()?;
        out.write_all(&dir_bytes)?;

        let footer = Footer {
            directory_offset,
            row_count: row_count as u64,
            format_version: FORMAT_VERSION,
            schema_digest: schema_digest(&self.schema),
        };
        out.write_all(&footer.encode())?;
        out.flush()?;
        // Durability point: the fragment may only be referenced by dataset
        // metadata after this returns.
        out.get_ref().sync_all()?;

        let byte_size = directory_offset + dir_bytes.len() as u64 + FOOTER_SIZE as u64;
        debug!(
            "wrote fragment {}: {row_count} rows, {byte_size} bytes",
            self.path.display()
        );

        Ok(FragmentDescriptor {
            path: self.path,
            row_count,
            byte_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn test_batch(ids: Vec<i64>) -> RecordBatch {
        let names: Vec<Option<String>> = ids.iter().map(|i| Some(format!("row-{i}"))).collect();
        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_write_and_finish() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("0.strata");

        let mut writer =
            FragmentWriter::create(&path, test_schema(), WriteParams::default()).unwrap();
        writer.write(&test_batch(vec![1, 2, 3])).unwrap();
        writer.write(&test_batch(vec![4, 5])).unwrap();

        let descriptor = writer.finish().unwrap();
        assert_eq!(descriptor.row_count, 5);
        assert_eq!(descriptor.byte_size, path.metadata().unwrap().len());
    }

    #[test]
    fn test_empty_fragment_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FragmentWriter::create(
            tmp.path().join("0.strata"),
            test_schema(),
            WriteParams::default(),
        )
        .unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_schema_mismatch_on_write() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = FragmentWriter::create(
            tmp.path().join("0.strata"),
            test_schema(),
            WriteParams::default(),
        )
        .unwrap();

        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1]))],
        )
        .unwrap();

        let err = writer.write(&other).unwrap_err();
        assert!(matches!(err, StrataError::SchemaMismatch(_)));
    }

    #[test]
    fn test_unsupported_type_rejected_up_front() {
        let tmp = tempfile::tempdir().unwrap();
        let schema = Arc::new(Schema::new(vec![Field::new(
            "day",
            DataType::Date32,
            false,
        )]));
        let err =
            FragmentWriter::create(tmp.path().join("0.strata"), schema, WriteParams::default())
                .unwrap_err();
        assert!(matches!(err, StrataError::UnsupportedType(_)));
    }
}
