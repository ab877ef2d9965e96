//! Dataset open/create, primary-key writes, and the commit protocol.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arrow::array::{Array, ArrayRef, BooleanArray, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use log::{debug, info};

use common_error::{StrataError, StrataResult};
use strata_format::{check_schema_match, WriteParams};

use crate::format::{FileFormat, StrataFormat};
use crate::layout::DatasetLayout;
use crate::manifest::{FragmentRef, Manifest};
use crate::scanner::{FragmentSource, ScannerBuilder};

// ============================================================================
// Write mode
// ============================================================================

/// How a write combines with existing dataset contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Add rows; every incoming primary key must be absent from the dataset.
    #[default]
    Append,
    /// Replace the dataset contents with the incoming rows.
    Overwrite,
}

// ============================================================================
// Primary-key values
// ============================================================================

/// A primary-key value, comparable across batches.
///
/// Integer keys normalize to 64 bits so `Int32` and `Int64` columns share one
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    /// Integer key (`Int32` widens).
    Int(i64),
    /// String key.
    Str(String),
    /// Boolean key.
    Bool(bool),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "'{v}'"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Extract the key of every row of a primary-key column.
///
/// Fails with `NullPrimaryKey` on the first null, naming the offending row,
/// and with `UnsupportedType` for column types that cannot act as keys.
fn column_keys(column: &ArrayRef, row_base: usize) -> StrataResult<Vec<KeyValue>> {
    if let Some(first_null) = (0..column.len()).find(|&i| column.is_null(i)) {
        return Err(StrataError::null_primary_key(format!(
            "primary key is null at row {}",
            row_base + first_null
        )));
    }

    let keys = match column.data_type() {
        DataType::Int32 => {
            let values = downcast::<Int32Array>(column)?;
            values
                .values()
                .iter()
                .map(|&v| KeyValue::Int(i64::from(v)))
                .collect()
        }
        DataType::Int64 => {
            let values = downcast::<Int64Array>(column)?;
            values.values().iter().map(|&v| KeyValue::Int(v)).collect()
        }
        DataType::Utf8 => {
            let values = downcast::<StringArray>(column)?;
            (0..values.len())
                .map(|i| KeyValue::Str(values.value(i).to_string()))
                .collect()
        }
        DataType::Boolean => {
            let values = downcast::<BooleanArray>(column)?;
            (0..values.len())
                .map(|i| KeyValue::Bool(values.value(i)))
                .collect()
        }
        other => {
            return Err(StrataError::unsupported_type(format!(
                "type {other} cannot be a primary key"
            )));
        }
    };
    Ok(keys)
}

fn downcast<T: Array + 'static>(column: &ArrayRef) -> StrataResult<&T> {
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        StrataError::internal(format!(
            "column claims type {} but holds a different array",
            column.data_type()
        ))
    })
}

// ============================================================================
// Dataset
// ============================================================================

/// An open dataset: a manifest plus its fragment files.
///
/// All operations are synchronous. Writes from multiple handles to the same
/// root are serialized by the commit protocol: a write that loses the race
/// fails with `MetadataConflict` and leaves no trace, and the caller may
/// retry against the refreshed state.
#[derive(Debug)]
pub struct Dataset {
    layout: DatasetLayout,
    format: Arc<dyn FileFormat>,
    manifest: RwLock<Manifest>,
}

impl Dataset {
    /// Open an existing dataset at `root`.
    ///
    /// Fails with `NotFound` when no dataset exists there.
    pub fn open(root: impl AsRef<Path>) -> StrataResult<Self> {
        let layout = DatasetLayout::new(root.as_ref());
        let manifest = Manifest::load(&layout.manifest_path())?;
        debug!(
            "opened dataset {} at version {} with {} fragments",
            layout.root().display(),
            manifest.version,
            manifest.fragments.len()
        );
        Ok(Self {
            layout,
            format: Arc::new(StrataFormat),
            manifest: RwLock::new(manifest),
        })
    }

    /// Create an empty dataset at `root`.
    pub fn create(
        root: impl AsRef<Path>,
        schema: &SchemaRef,
        primary_key: &str,
    ) -> StrataResult<Self> {
        let layout = DatasetLayout::new(root.as_ref());
        if layout.exists() {
            return Err(StrataError::internal(format!(
                "dataset already exists at {}",
                layout.root().display()
            )));
        }
        let manifest = Manifest::new(schema, primary_key)?;
        layout.create_dirs()?;
        manifest.save(&layout.manifest_path())?;
        info!(
            "created dataset {} with primary key '{primary_key}'",
            layout.root().display()
        );
        Ok(Self {
            layout,
            format: Arc::new(StrataFormat),
            manifest: RwLock::new(manifest),
        })
    }

    fn read_manifest(&self) -> StrataResult<RwLockReadGuard<'_, Manifest>> {
        self.manifest
            .read()
            .map_err(|_| StrataError::internal("dataset lock poisoned"))
    }

    fn write_manifest(&self) -> StrataResult<RwLockWriteGuard<'_, Manifest>> {
        self.manifest
            .write()
            .map_err(|_| StrataError::internal("dataset lock poisoned"))
    }

    /// Dataset root directory.
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Dataset schema.
    pub fn schema(&self) -> StrataResult<SchemaRef> {
        self.read_manifest()?.schema()
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> StrataResult<String> {
        Ok(self.read_manifest()?.primary_key.clone())
    }

    /// Current metadata version.
    pub fn version(&self) -> StrataResult<u64> {
        Ok(self.read_manifest()?.version)
    }

    /// Total rows across live fragments, from metadata alone.
    pub fn count_rows(&self) -> StrataResult<usize> {
        Ok(self.read_manifest()?.total_rows())
    }

    /// Live fragments, in dataset order.
    pub fn fragments(&self) -> StrataResult<Vec<FragmentRef>> {
        Ok(self.read_manifest()?.fragments.clone())
    }

    /// Start a scan over a snapshot of the current fragments.
    ///
    /// Fragments committed after this call are not visible to the scan.
    pub fn scan(&self) -> StrataResult<ScannerBuilder> {
        let manifest = self.read_manifest()?;
        let schema = manifest.schema()?;
        let fragments = Self::sources(&self.layout, &manifest);
        Ok(ScannerBuilder::new(
            schema,
            fragments,
            Arc::clone(&self.format),
        ))
    }

    fn sources(layout: &DatasetLayout, manifest: &Manifest) -> Vec<FragmentSource> {
        manifest
            .fragments
            .iter()
            .map(|f| FragmentSource {
                path: layout.resolve_fragment(&f.file),
                row_count: f.row_count,
            })
            .collect()
    }

    /// Write `batches` as one new fragment and commit it.
    ///
    /// Zero total rows is a no-op that leaves the version unchanged. In
    /// `Append` mode every incoming primary key must be new; `Overwrite`
    /// replaces the dataset contents. Key checks run before any bytes land on
    /// disk, so a rejected write creates no fragment.
    pub fn write(&self, batches: &[RecordBatch], mode: WriteMode) -> StrataResult<()> {
        let total_rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        if total_rows == 0 {
            return Ok(());
        }

        // One writer per handle at a time; cross-handle races are caught by
        // the version check at commit.
        let mut manifest = self.write_manifest()?;
        let schema = manifest.schema()?;
        for batch in batches {
            check_schema_match(&schema, &batch.schema())?;
        }

        let key_index = schema.index_of(&manifest.primary_key)?;
        let mut new_keys = HashSet::with_capacity(total_rows);
        let mut row_base = 0;
        for batch in batches {
            for key in column_keys(batch.column(key_index), row_base)? {
                if !new_keys.insert(key.clone()) {
                    return Err(StrataError::duplicate_key(format!(
                        "primary key {key} appears more than once in the write"
                    )));
                }
            }
            row_base += batch.num_rows();
        }

        if mode == WriteMode::Append && !manifest.fragments.is_empty() {
            let existing = self.existing_keys(&manifest)?;
            if let Some(key) = new_keys.iter().find(|k| existing.contains(*k)) {
                return Err(StrataError::duplicate_key(format!(
                    "primary key {key} already exists in the dataset"
                )));
            }
        }

        // Fragment bytes first, under a writer-private scratch name; only a
        // complete, fsynced file is renamed into place and only a renamed
        // file is committed.
        let scratch_path = self.layout.scratch_fragment_path();
        let descriptor = match self.format.write_fragment(
            &scratch_path,
            &schema,
            batches,
            &WriteParams::default(),
        ) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let _ = std::fs::remove_file(&scratch_path);
                return Err(e);
            }
        };

        // Commit: reload the manifest from disk and give up if another
        // handle committed since this one loaded its state. Checked before
        // the rename because a racing handle may claim the same fragment id.
        let disk = Manifest::load(&self.layout.manifest_path())?;
        if disk.version != manifest.version {
            let _ = std::fs::remove_file(&scratch_path);
            *manifest = disk;
            return Err(StrataError::metadata_conflict(format!(
                "dataset {} was modified concurrently (now at version {})",
                self.layout.root().display(),
                manifest.version
            )));
        }

        let mut next = manifest.clone();
        next.version += 1;
        let id = next.allocate_fragment_id();
        std::fs::rename(&scratch_path, self.layout.fragment_path(id))?;

        let fragment = FragmentRef {
            id,
            file: DatasetLayout::fragment_file_name(id),
            row_count: descriptor.row_count,
            byte_size: descriptor.byte_size,
            created_version: next.version,
        };
        let replaced = match mode {
            WriteMode::Append => {
                next.fragments.push(fragment);
                Vec::new()
            }
            WriteMode::Overwrite => std::mem::replace(&mut next.fragments, vec![fragment]),
        };
        next.save(&self.layout.manifest_path())?;
        *manifest = next;

        // Unreferenced after the commit; removal is best effort.
        for old in replaced {
            let _ = std::fs::remove_file(self.layout.resolve_fragment(&old.file));
        }

        info!(
            "committed fragment {id} ({total_rows} rows) to {} at version {}",
            self.layout.root().display(),
            manifest.version
        );
        Ok(())
    }

    /// Collect every committed primary key via a key-column-only scan.
    fn existing_keys(&self, manifest: &Manifest) -> StrataResult<HashSet<KeyValue>> {
        let schema = manifest.schema()?;
        let scanner = ScannerBuilder::new(
            schema,
            Self::sources(&self.layout, manifest),
            Arc::clone(&self.format),
        )
        .project(&[manifest.primary_key.as_str()])
        .finish()?;

        let mut keys = HashSet::with_capacity(manifest.total_rows());
        for batch in scanner {
            let batch = batch?;
            keys.extend(column_keys(batch.column(0), 0)?);
        }
        Ok(keys)
    }
}

// ============================================================================
// Convenience entry points
// ============================================================================

/// Open the dataset at `root`.
pub fn open_dataset(root: impl AsRef<Path>) -> StrataResult<Dataset> {
    Dataset::open(root)
}

/// Write a table to `destination`, creating the dataset if absent.
///
/// On first write the dataset takes its schema from the batches and
/// `primary_key` names the key column. Subsequent writes append and must name
/// the same key column.
pub fn write_table(
    batches: &[RecordBatch],
    destination: impl AsRef<Path>,
    primary_key: &str,
) -> StrataResult<Dataset> {
    let layout = DatasetLayout::new(destination.as_ref());
    let dataset = if layout.exists() {
        let dataset = Dataset::open(destination)?;
        let existing_key = dataset.primary_key()?;
        if existing_key != primary_key {
            return Err(StrataError::schema_mismatch(format!(
                "dataset primary key is '{existing_key}', write names '{primary_key}'"
            )));
        }
        dataset
    } else {
        let Some(first) = batches.first() else {
            return Err(StrataError::internal(
                "cannot create a dataset from zero batches",
            ));
        };
        Dataset::create(destination, &first.schema(), primary_key)?
    };
    dataset.write(batches, WriteMode::Append)?;
    Ok(dataset)
}
