//! Dataset scanner.
//!
//! A scan walks the dataset's fragments in manifest order and yields record
//! batches, applying projection, filter, offset, and limit pushdown as close
//! to the page reads as each allows. Projection restricts which columns are
//! decoded at all; an unfiltered offset skips fragments (and leading rows)
//! without opening or decoding them; filtered scans must decode and evaluate
//! every row, with offset and limit applied to the rows that pass.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use log::debug;

use common_error::{StrataError, StrataResult};
use strata_format::FragmentReader;

use crate::eval::ExprEvaluator;
use crate::expr::Expr;
use crate::format::FileFormat;

/// Default rows per yielded batch.
pub const DEFAULT_BATCH_ROWS: usize = 1024;

/// One fragment visible to a scan, snapshotted from the manifest.
#[derive(Debug, Clone)]
pub struct FragmentSource {
    /// Path of the fragment file.
    pub path: PathBuf,
    /// Rows in the fragment, per the manifest.
    pub row_count: usize,
}

// ============================================================================
// ScannerBuilder
// ============================================================================

/// Configures a scan over a snapshot of dataset fragments.
#[derive(Debug)]
pub struct ScannerBuilder {
    schema: SchemaRef,
    fragments: Vec<FragmentSource>,
    format: Arc<dyn FileFormat>,
    projection: Option<Vec<String>>,
    filter: Option<Expr>,
    limit: Option<usize>,
    offset: usize,
    batch_rows: usize,
}

impl ScannerBuilder {
    /// Start a scan over `fragments`, which must all carry `schema`.
    pub fn new(
        schema: SchemaRef,
        fragments: Vec<FragmentSource>,
        format: Arc<dyn FileFormat>,
    ) -> Self {
        Self {
            schema,
            fragments,
            format,
            projection: None,
            filter: None,
            limit: None,
            offset: 0,
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }

    /// Restrict output to the named columns, in the given order.
    ///
    /// An empty list means all columns.
    pub fn project(mut self, columns: &[impl AsRef<str>]) -> Self {
        self.projection = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// Keep only rows for which `filter` evaluates to true.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Yield at most `limit` rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` rows that the scan would otherwise yield.
    ///
    /// With a filter present, the offset counts rows that pass the filter.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the maximum rows per yielded batch.
    pub fn batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows;
        self
    }

    /// Validate the configuration and build the scanner.
    pub fn finish(self) -> StrataResult<Scanner> {
        if self.batch_rows == 0 {
            return Err(StrataError::internal("batch_rows must be positive"));
        }

        // Output columns, in caller order.
        let output_fields: Vec<_> = match &self.projection {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|name| {
                    self.schema
                        .field_with_name(name)
                        .map(|f| Arc::new(f.clone()))
                        .map_err(|_| {
                            StrataError::column_not_found(format!(
                                "projected column '{name}' is not in the schema"
                            ))
                        })
                })
                .collect::<StrataResult<_>>()?,
            _ => self.schema.fields().iter().cloned().collect(),
        };

        // Columns to decode: the output set plus any filter-only columns.
        let mut read_fields = output_fields.clone();
        if let Some(filter) = &self.filter {
            filter.validate(&self.schema)?;
            for name in filter.referenced_columns() {
                if output_fields.iter().all(|f| f.name() != name) {
                    // validate() guarantees the lookup succeeds
                    if let Ok(field) = self.schema.field_with_name(name) {
                        read_fields.push(Arc::new(field.clone()));
                    }
                }
            }
        }

        let output_indices: Vec<usize> = (0..output_fields.len()).collect();
        let output_schema = Arc::new(Schema::new(output_fields));
        let read_schema = Arc::new(Schema::new(read_fields));

        debug!(
            "scan over {} fragments: {} read columns, {} output columns, filter={}, limit={:?}, offset={}",
            self.fragments.len(),
            read_schema.fields().len(),
            output_schema.fields().len(),
            self.filter.is_some(),
            self.limit,
            self.offset
        );

        Ok(Scanner {
            schema: self.schema,
            read_schema,
            output_schema,
            output_indices,
            fragments: self.fragments.into(),
            format: self.format,
            filter: self.filter,
            evaluator: ExprEvaluator::new(),
            remaining_limit: self.limit,
            remaining_offset: self.offset,
            batch_rows: self.batch_rows,
            current: None,
            failed: false,
        })
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug)]
struct OpenFragment {
    reader: FragmentReader,
    pos: usize,
    rows: usize,
}

/// An in-progress scan; yields batches of at most `batch_rows` rows.
///
/// The first error halts the scan: it is yielded once and the iterator is
/// exhausted afterwards.
#[derive(Debug)]
pub struct Scanner {
    schema: SchemaRef,
    read_schema: SchemaRef,
    output_schema: SchemaRef,
    output_indices: Vec<usize>,
    fragments: VecDeque<FragmentSource>,
    format: Arc<dyn FileFormat>,
    filter: Option<Expr>,
    evaluator: ExprEvaluator,
    remaining_limit: Option<usize>,
    remaining_offset: usize,
    batch_rows: usize,
    current: Option<OpenFragment>,
    failed: bool,
}

impl Scanner {
    /// Schema of the yielded batches (the projected columns).
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    fn fail(&mut self, err: StrataError) -> Option<StrataResult<RecordBatch>> {
        self.failed = true;
        self.current = None;
        self.fragments.clear();
        Some(Err(err))
    }

    /// Open the next fragment that the scan must actually read.
    ///
    /// Unfiltered scans consume whole fragments against the offset from the
    /// manifest row counts alone.
    fn advance_fragment(&mut self) -> StrataResult<bool> {
        loop {
            let Some(fragment) = self.fragments.pop_front() else {
                return Ok(false);
            };
            if self.filter.is_none() && self.remaining_offset >= fragment.row_count {
                self.remaining_offset -= fragment.row_count;
                continue;
            }

            let reader = self.format.open_fragment(&fragment.path)?;
            reader.verify_schema(&self.schema)?;
            let rows = reader.row_count();

            let mut pos = 0;
            if self.filter.is_none() && self.remaining_offset > 0 {
                pos = self.remaining_offset.min(rows);
                self.remaining_offset -= pos;
            }

            self.current = Some(OpenFragment { reader, pos, rows });
            return Ok(true);
        }
    }
}

impl Iterator for Scanner {
    type Item = StrataResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.remaining_limit == Some(0) {
                return None;
            }

            if self.current.is_none() {
                match self.advance_fragment() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return self.fail(e),
                }
            }

            let Some(current) = self.current.as_mut() else {
                return None;
            };
            if current.pos >= current.rows {
                self.current = None;
                continue;
            }

            let n = self.batch_rows.min(current.rows - current.pos);
            let mut batch = match current.reader.read_range(&self.read_schema, current.pos, n) {
                Ok(batch) => batch,
                Err(e) => return self.fail(e),
            };
            current.pos += n;

            if let Some(filter) = &self.filter {
                let mask = match self.evaluator.evaluate_predicate(filter, &batch) {
                    Ok(mask) => mask,
                    Err(e) => return self.fail(e),
                };
                batch = match filter_record_batch(&batch, &mask) {
                    Ok(batch) => batch,
                    Err(e) => return self.fail(e.into()),
                };
                if self.remaining_offset > 0 {
                    let skip = self.remaining_offset.min(batch.num_rows());
                    batch = batch.slice(skip, batch.num_rows() - skip);
                    self.remaining_offset -= skip;
                }
            }

            if batch.num_rows() == 0 {
                continue;
            }

            if let Some(limit) = self.remaining_limit.as_mut() {
                if batch.num_rows() > *limit {
                    batch = batch.slice(0, *limit);
                }
                *limit -= batch.num_rows();
            }

            let out = match batch.project(&self.output_indices) {
                Ok(out) => out,
                Err(e) => return self.fail(e.into()),
            };
            return Some(Ok(out));
        }
    }
}
