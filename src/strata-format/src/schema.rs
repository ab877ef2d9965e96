//! Schema digest and structural comparison.

use arrow::datatypes::Schema;

use common_error::{StrataError, StrataResult};

/// Canonical one-line rendering of a schema: `name:type:nullable` per field,
/// `;`-separated, in declaration order. Field metadata is ignored; only the
/// structural identity of the schema participates in the digest.
fn canonical_schema_string(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}:{}:{}", f.name(), f.data_type(), f.is_nullable()))
        .collect::<Vec<_>>()
        .join(";")
}

/// CRC32 digest of the canonical schema string, stored in fragment footers so
/// a fragment can be checked against the dataset schema it claims to match.
pub fn schema_digest(schema: &Schema) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(canonical_schema_string(schema).as_bytes());
    hasher.finalize()
}

/// Check that `actual` structurally equals `expected`: same field names,
/// logical types, nullability, and order.
pub fn check_schema_match(expected: &Schema, actual: &Schema) -> StrataResult<()> {
    if expected.fields().len() != actual.fields().len() {
        return Err(StrataError::schema_mismatch(format!(
            "expected {} columns, got {}",
            expected.fields().len(),
            actual.fields().len()
        )));
    }
    for (exp, act) in expected.fields().iter().zip(actual.fields().iter()) {
        if exp.name() != act.name() {
            return Err(StrataError::schema_mismatch(format!(
                "expected column '{}', got '{}'",
                exp.name(),
                act.name()
            )));
        }
        if exp.data_type() != act.data_type() {
            return Err(StrataError::schema_mismatch(format!(
                "column '{}': expected type {}, got {}",
                exp.name(),
                exp.data_type(),
                act.data_type()
            )));
        }
        if exp.is_nullable() != act.is_nullable() {
            return Err(StrataError::schema_mismatch(format!(
                "column '{}': expected nullable={}, got nullable={}",
                exp.name(),
                exp.is_nullable(),
                act.is_nullable()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])
    }

    #[test]
    fn test_digest_is_stable_and_order_sensitive() {
        let a = schema();
        let b = schema();
        assert_eq!(schema_digest(&a), schema_digest(&b));

        let reordered = Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("id", DataType::Int64, false),
        ]);
        assert_ne!(schema_digest(&a), schema_digest(&reordered));
    }

    #[test]
    fn test_check_schema_match() {
        assert!(check_schema_match(&schema(), &schema()).is_ok());

        let wrong_type = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        let err = check_schema_match(&schema(), &wrong_type).unwrap_err();
        assert!(matches!(err, StrataError::SchemaMismatch(_)));

        let missing = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        assert!(check_schema_match(&schema(), &missing).is_err());
    }
}
