//! Fragment reader.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{new_empty_array, Array, ArrayRef};
use arrow::compute::concat;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use log::debug;

use common_error::{StrataError, StrataResult};

use crate::codec;
use crate::footer::{Footer, FOOTER_SIZE};
use crate::page::{PageDirectory, PageInfo};
use crate::schema::schema_digest;

/// Reads one fragment file.
///
/// [`open`] touches only the footer and page directory; page data is read
/// lazily, per column and per row range, by [`read_column`] / [`read_range`].
/// Fragments are immutable, so any number of readers may open the same file
/// concurrently, each with its own handle.
///
/// [`open`]: FragmentReader::open
/// [`read_column`]: FragmentReader::read_column
/// [`read_range`]: FragmentReader::read_range
#[derive(Debug)]
pub struct FragmentReader {
    path: PathBuf,
    file: File,
    footer: Footer,
    directory: PageDirectory,
}

impl FragmentReader {
    /// Open a fragment, reading and validating footer and directory only.
    pub fn open(path: impl Into<PathBuf>) -> StrataResult<Self> {
        let path = path.into();
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::not_found(format!("fragment {}", path.display()))
            } else {
                e.into()
            }
        })?;

        let size = file.metadata()?.len();
        if size < FOOTER_SIZE as u64 {
            return Err(StrataError::corrupt_page(format!(
                "{}: file of {size} bytes is smaller than the {FOOTER_SIZE}-byte footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer_bytes = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::decode(&footer_bytes)
            .map_err(|e| with_path_context(e, &path))?;

        let directory_end = size - FOOTER_SIZE as u64;
        if footer.directory_offset > directory_end {
            return Err(StrataError::corrupt_page(format!(
                "{}: directory offset {} past directory end {directory_end}",
                path.display(),
                footer.directory_offset
            )));
        }

        file.seek(SeekFrom::Start(footer.directory_offset))?;
        let mut dir_bytes = vec![0u8; (directory_end - footer.directory_offset) as usize];
        file.read_exact(&mut dir_bytes)?;
        let directory =
            PageDirectory::from_bytes(&dir_bytes).map_err(|e| with_path_context(e, &path))?;

        // Invariant: each column's declared page rows sum to the fragment's
        // row count.
        for column in &directory.columns {
            if column.row_count() as u64 != footer.row_count {
                return Err(StrataError::corrupt_page(format!(
                    "{}: column '{}' declares {} rows, footer declares {}",
                    path.display(),
                    column.name,
                    column.row_count(),
                    footer.row_count
                )));
            }
        }

        debug!(
            "opened fragment {}: {} rows, {} columns",
            path.display(),
            footer.row_count,
            directory.columns.len()
        );

        Ok(Self {
            path,
            file,
            footer,
            directory,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical rows in the fragment.
    pub fn row_count(&self) -> usize {
        self.footer.row_count as usize
    }

    /// Check the fragment was written with the given schema.
    pub fn verify_schema(&self, schema: &Schema) -> StrataResult<()> {
        let expected = schema_digest(schema);
        if self.footer.schema_digest != expected {
            return Err(StrataError::schema_mismatch(format!(
                "{}: schema digest {:#010x} does not match expected {expected:#010x}",
                self.path.display(),
                self.footer.schema_digest
            )));
        }
        Ok(())
    }

    /// Decode rows `[start, start + len)` of one column.
    ///
    /// Only pages overlapping the range are read from disk.
    pub fn read_column(&mut self, field: &Field, start: usize, len: usize) -> StrataResult<ArrayRef> {
        if start + len > self.row_count() {
            return Err(StrataError::internal(format!(
                "read range [{start}, {}) exceeds fragment rows {}",
                start + len,
                self.row_count()
            )));
        }
        if len == 0 {
            return Ok(new_empty_array(field.data_type()));
        }

        let column = self.directory.column(field.name()).ok_or_else(|| {
            StrataError::corrupt_page(format!(
                "{}: column '{}' missing from page directory",
                self.path.display(),
                field.name()
            ))
        })?;

        let ranges = column.pages_for_range(start, len);
        let pages: Vec<PageInfo> = ranges.iter().map(|&(idx, _, _)| column.pages[idx]).collect();

        let mut parts = Vec::with_capacity(ranges.len());
        for (page, &(_, local_start, local_len)) in pages.iter().zip(ranges.iter()) {
            let bytes = self.read_bytes(page.offset, page.length)?;
            let array = codec::decode_page(
                &bytes,
                field.data_type(),
                page.rows as usize,
                local_start,
                local_len,
            )
            .map_err(|e| match e {
                StrataError::CorruptPage(msg) => StrataError::corrupt_page(format!(
                    "{}: column '{}' rows [{local_start}, {}): {msg}",
                    self.path.display(),
                    field.name(),
                    local_start + local_len
                )),
                other => other,
            })?;
            parts.push(array);
        }

        if parts.len() == 1 {
            Ok(parts.swap_remove(0))
        } else {
            let refs: Vec<&dyn Array> = parts.iter().map(AsRef::as_ref).collect();
            Ok(concat(&refs)?)
        }
    }

    /// Decode rows `[start, start + len)` for a projected schema.
    ///
    /// Columns absent from `projection` are never touched.
    pub fn read_range(
        &mut self,
        projection: &SchemaRef,
        start: usize,
        len: usize,
    ) -> StrataResult<RecordBatch> {
        let mut arrays = Vec::with_capacity(projection.fields().len());
        for field in projection.fields() {
            arrays.push(self.read_column(field, start, len)?);
        }
        Ok(RecordBatch::try_new(Arc::clone(projection), arrays)?)
    }

    fn read_bytes(&mut self, offset: u64, length: u64) -> StrataResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact(&mut buf).map_err(|e| {
            StrataError::corrupt_page(format!(
                "{}: short read of page at offset {offset} ({length} bytes): {e}",
                self.path.display()
            ))
        })?;
        Ok(buf)
    }
}

fn with_path_context(err: StrataError, path: &Path) -> StrataError {
    match err {
        StrataError::CorruptPage(msg) => {
            StrataError::corrupt_page(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}
