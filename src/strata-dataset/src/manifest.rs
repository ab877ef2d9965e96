//! Dataset manifest.
//!
//! The manifest is the dataset's durable metadata: schema, primary-key
//! declaration, the ordered list of live fragments, and a version counter
//! that commits bump. It is persisted as JSON next to the fragment data and
//! saved atomically (tmp file + rename).

use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use common_error::{StrataError, StrataResult};

/// Fragment identifier, unique within one dataset.
pub type FragmentId = u64;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

// ============================================================================
// Column specification
// ============================================================================

/// One column of the dataset schema, in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Logical type name (`int32`, `int64`, `float32`, `float64`, `bool`,
    /// `utf8`, `binary`).
    pub data_type: String,
    /// Whether the column may hold nulls.
    pub nullable: bool,
}

impl ColumnSpec {
    /// Build from an Arrow field.
    pub fn from_field(field: &Field) -> StrataResult<Self> {
        let data_type = match field.data_type() {
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Boolean => "bool",
            DataType::Utf8 => "utf8",
            DataType::Binary => "binary",
            other => {
                return Err(StrataError::unsupported_type(format!(
                    "column '{}' has type {other} which cannot be stored",
                    field.name()
                )));
            }
        };
        Ok(Self {
            name: field.name().clone(),
            data_type: data_type.to_string(),
            nullable: field.is_nullable(),
        })
    }

    /// Convert back to an Arrow field.
    pub fn to_field(&self) -> StrataResult<Field> {
        let data_type = match self.data_type.as_str() {
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            "bool" => DataType::Boolean,
            "utf8" => DataType::Utf8,
            "binary" => DataType::Binary,
            other => {
                return Err(StrataError::corrupt_page(format!(
                    "manifest declares unknown logical type '{other}' for column '{}'",
                    self.name
                )));
            }
        };
        Ok(Field::new(&self.name, data_type, self.nullable))
    }
}

// ============================================================================
// Fragment reference
// ============================================================================

/// A committed fragment, as referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRef {
    /// Fragment id, unique within the dataset.
    pub id: FragmentId,
    /// Fragment file name within the data directory.
    pub file: String,
    /// Logical rows in the fragment.
    pub row_count: usize,
    /// Bytes on disk.
    pub byte_size: u64,
    /// Manifest version that committed this fragment.
    pub created_version: u64,
}

// ============================================================================
// Manifest
// ============================================================================

/// Durable dataset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version for compatibility.
    pub format_version: u32,
    /// Dataset schema, in declaration order.
    pub columns: Vec<ColumnSpec>,
    /// Name of the primary-key column.
    pub primary_key: String,
    /// Live fragments, in dataset order.
    pub fragments: Vec<FragmentRef>,
    /// Metadata version; bumped by every commit.
    pub version: u64,
    /// Next fragment id to allocate.
    pub next_fragment_id: FragmentId,
}

impl Manifest {
    /// Create a manifest for a new, empty dataset.
    ///
    /// Fails with `ColumnNotFound` when the primary key does not name a
    /// schema column.
    pub fn new(schema: &Schema, primary_key: &str) -> StrataResult<Self> {
        if schema.index_of(primary_key).is_err() {
            return Err(StrataError::column_not_found(format!(
                "primary key '{primary_key}' is not a column of the schema"
            )));
        }
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnSpec::from_field(f))
            .collect::<StrataResult<_>>()?;
        Ok(Self {
            format_version: MANIFEST_VERSION,
            columns,
            primary_key: primary_key.to_string(),
            fragments: Vec::new(),
            version: 1,
            next_fragment_id: 0,
        })
    }

    /// Reconstruct the Arrow schema.
    pub fn schema(&self) -> StrataResult<SchemaRef> {
        let fields = self
            .columns
            .iter()
            .map(ColumnSpec::to_field)
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(Arc::new(Schema::new(fields)))
    }

    /// Total rows across live fragments.
    pub fn total_rows(&self) -> usize {
        self.fragments.iter().map(|f| f.row_count).sum()
    }

    /// Allocate the next fragment id.
    pub fn allocate_fragment_id(&mut self) -> FragmentId {
        let id = self.next_fragment_id;
        self.next_fragment_id += 1;
        id
    }

    /// Load a manifest from disk.
    ///
    /// Fails with `NotFound` when no manifest exists, `CorruptPage` when the
    /// file cannot be parsed, and never reports an unreadable dataset as
    /// empty.
    pub fn load(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::not_found(format!("no dataset manifest at {}", path.display()))
            } else {
                e.into()
            }
        })?;

        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            StrataError::corrupt_page(format!("{}: unreadable manifest: {e}", path.display()))
        })?;

        if manifest.format_version != MANIFEST_VERSION {
            return Err(StrataError::corrupt_page(format!(
                "{}: manifest version {} not supported (expected {MANIFEST_VERSION})",
                path.display(),
                manifest.format_version
            )));
        }

        Ok(manifest)
    }

    /// Save the manifest atomically: write a tmp file, then rename over the
    /// target so readers only ever observe a complete manifest.
    pub fn save(&self, path: &Path) -> StrataResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])
    }

    #[test]
    fn test_new_manifest() {
        let manifest = Manifest::new(&test_schema(), "id").unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.primary_key, "id");
        assert!(manifest.fragments.is_empty());
        assert_eq!(manifest.total_rows(), 0);
    }

    #[test]
    fn test_unknown_primary_key() {
        let err = Manifest::new(&test_schema(), "nope").unwrap_err();
        assert!(matches!(err, StrataError::ColumnNotFound(_)));
    }

    #[test]
    fn test_schema_roundtrip() {
        let manifest = Manifest::new(&test_schema(), "id").unwrap();
        let schema = manifest.schema().unwrap();
        assert_eq!(schema.as_ref(), &test_schema());
    }

    #[test]
    fn test_allocate_fragment_id() {
        let mut manifest = Manifest::new(&test_schema(), "id").unwrap();
        assert_eq!(manifest.allocate_fragment_id(), 0);
        assert_eq!(manifest.allocate_fragment_id(), 1);
        assert_eq!(manifest.next_fragment_id, 2);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("manifest.json");

        let mut manifest = Manifest::new(&test_schema(), "id").unwrap();
        manifest.fragments.push(FragmentRef {
            id: 0,
            file: "00000000.strata".to_string(),
            row_count: 10,
            byte_size: 512,
            created_version: 2,
        });
        manifest.version = 2;
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.total_rows(), 10);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Manifest::load(&tmp.path().join("manifest.json")).unwrap_err();
        assert!(matches!(err, StrataError::NotFound(_)));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("manifest.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, StrataError::CorruptPage(_)));
    }
}
