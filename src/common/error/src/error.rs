//! Core error types for Strata.

use thiserror::Error;

/// Result type alias using `StrataError`.
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// Generic boxed error for external error sources.
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for Strata operations.
///
/// Validation errors (`SchemaMismatch`, `NullPrimaryKey`, `DuplicateKey`) are
/// raised before any fragment bytes are written; decode errors (`CorruptPage`)
/// terminate the scan that hit them. `MetadataConflict` is retryable by the
/// caller after re-reading dataset metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StrataError {
    /// Incoming table schema does not structurally match the dataset schema.
    #[error("SchemaMismatch: {0}")]
    SchemaMismatch(String),

    /// Primary-key column contains a null value.
    #[error("NullPrimaryKey: {0}")]
    NullPrimaryKey(String),

    /// Primary-key value collides within the batch or with committed rows.
    #[error("DuplicateKey: {0}")]
    DuplicateKey(String),

    /// On-disk page or footer bytes are inconsistent with their declaration.
    #[error("CorruptPage: {0}")]
    CorruptPage(String),

    /// Logical type has no page layout in the codec.
    #[error("UnsupportedType: {0}")]
    UnsupportedType(String),

    /// Filter expression references a column absent from the schema.
    #[error("InvalidFilterColumn: {0}")]
    InvalidFilterColumn(String),

    /// Projection references a column absent from the schema.
    #[error("ColumnNotFound: {0}")]
    ColumnNotFound(String),

    /// No valid dataset metadata exists at the given location.
    #[error("NotFound: {0}")]
    NotFound(String),

    /// Concurrent-write race detected on metadata commit.
    #[error("MetadataConflict: {0}")]
    MetadataConflict(String),

    /// Internal error (bug in Strata).
    #[error("InternalError: {0}")]
    Internal(String),

    /// IO error.
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error.
    #[error("ArrowError: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// JSON serialization error.
    #[error("SerdeJsonError: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// External error from third-party libraries.
    #[error("ExternalError: {0}")]
    External(GenericError),
}

impl StrataError {
    /// Create a new `SchemaMismatch` error.
    pub fn schema_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// Create a new `NullPrimaryKey` error.
    pub fn null_primary_key<S: Into<String>>(msg: S) -> Self {
        Self::NullPrimaryKey(msg.into())
    }

    /// Create a new `DuplicateKey` error.
    pub fn duplicate_key<S: Into<String>>(msg: S) -> Self {
        Self::DuplicateKey(msg.into())
    }

    /// Create a new `CorruptPage` error.
    pub fn corrupt_page<S: Into<String>>(msg: S) -> Self {
        Self::CorruptPage(msg.into())
    }

    /// Create a new `UnsupportedType` error.
    pub fn unsupported_type<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedType(msg.into())
    }

    /// Create a new `InvalidFilterColumn` error.
    pub fn invalid_filter_column<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFilterColumn(msg.into())
    }

    /// Create a new `ColumnNotFound` error.
    pub fn column_not_found<S: Into<String>>(msg: S) -> Self {
        Self::ColumnNotFound(msg.into())
    }

    /// Create a new `NotFound` error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new `MetadataConflict` error.
    pub fn metadata_conflict<S: Into<String>>(msg: S) -> Self {
        Self::MetadataConflict(msg.into())
    }

    /// Create a new `InternalError`.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Ensure a condition holds, returning the given error variant if not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $variant:ident: $($msg:tt)*) => {
        if !$cond {
            return Err($crate::StrataError::$variant(format!($($msg)*)));
        }
    };
}
