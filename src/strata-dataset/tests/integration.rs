//! End-to-end dataset tests: write, commit, and scan through the public API.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use common_error::StrataError;
use strata_dataset::{col, lit, open_dataset, write_table, Dataset, Scanner, WriteMode};

fn event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("score", DataType::Float64, true),
    ]))
}

fn event_batch(ids: Vec<i64>) -> RecordBatch {
    let names: Vec<Option<String>> = ids
        .iter()
        .map(|i| if i % 4 == 0 { None } else { Some(format!("e{i}")) })
        .collect();
    let scores: Vec<Option<f64>> = ids
        .iter()
        .map(|i| if i % 3 == 0 { None } else { Some(*i as f64 / 2.0) })
        .collect();
    RecordBatch::try_new(
        event_schema(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(names)),
            Arc::new(Float64Array::from(scores)),
        ],
    )
    .unwrap()
}

fn collect(scanner: Scanner) -> RecordBatch {
    let schema = scanner.schema();
    let batches: Vec<RecordBatch> = scanner.map(|b| b.unwrap()).collect();
    concat_batches(&schema, &batches).unwrap()
}

fn ids_of(batch: &RecordBatch) -> Vec<i64> {
    batch
        .column_by_name("id")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

#[test]
fn test_write_then_read_back() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");

    write_table(&[event_batch((0..100).collect())], &root, "id").unwrap();

    let dataset = open_dataset(&root).unwrap();
    assert_eq!(dataset.count_rows().unwrap(), 100);
    assert_eq!(dataset.schema().unwrap(), event_schema());

    let batch = collect(dataset.scan().unwrap().finish().unwrap());
    assert_eq!(batch.num_rows(), 100);
    assert_eq!(ids_of(&batch), (0..100).collect::<Vec<_>>());

    // Null pattern survives the round trip.
    let names = batch
        .column_by_name("name")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
        .clone();
    assert!(names.is_null(4));
    assert_eq!(names.value(5), "e5");
}

#[test]
fn test_multiple_writes_scan_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");

    let dataset = write_table(&[event_batch((0..10).collect())], &root, "id").unwrap();
    dataset
        .write(&[event_batch((10..25).collect())], WriteMode::Append)
        .unwrap();

    assert_eq!(dataset.fragments().unwrap().len(), 2);
    assert_eq!(dataset.count_rows().unwrap(), 25);

    let batch = collect(dataset.scan().unwrap().finish().unwrap());
    assert_eq!(ids_of(&batch), (0..25).collect::<Vec<_>>());
}

#[test]
fn test_projection_subset() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch((0..20).collect())], &root, "id").unwrap();

    let batch = collect(
        dataset
            .scan()
            .unwrap()
            .project(&["score", "id"])
            .finish()
            .unwrap(),
    );
    assert_eq!(batch.num_columns(), 2);
    assert_eq!(batch.schema().field(0).name(), "score");
    assert_eq!(batch.schema().field(1).name(), "id");

    let full = collect(dataset.scan().unwrap().finish().unwrap());
    assert_eq!(batch.column(0), full.column_by_name("score").unwrap());
    assert_eq!(batch.column(1), full.column_by_name("id").unwrap());
}

#[test]
fn test_filter_limit_projection_together() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    write_table(&[event_batch(vec![1, 2, 3, 4, 5])], &root, "id").unwrap();

    let dataset = open_dataset(&root).unwrap();
    let batch = collect(
        dataset
            .scan()
            .unwrap()
            .filter(col("id").gt(lit(2)))
            .limit(2)
            .project(&["id"])
            .finish()
            .unwrap(),
    );
    assert_eq!(batch.num_columns(), 1);
    assert_eq!(ids_of(&batch), vec![3, 4]);
}

#[test]
fn test_filter_never_selects_null_comparisons() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    // score is null for ids divisible by 3.
    let dataset = write_table(&[event_batch((0..12).collect())], &root, "id").unwrap();

    let batch = collect(
        dataset
            .scan()
            .unwrap()
            .filter(col("score").lt_eq(lit(3.0)))
            .finish()
            .unwrap(),
    );
    // score = id / 2, so non-null ids with score <= 3.0 are 1,2,4,5.
    assert_eq!(ids_of(&batch), vec![1, 2, 4, 5]);

    let batch = collect(
        dataset
            .scan()
            .unwrap()
            .filter(col("score").is_null())
            .finish()
            .unwrap(),
    );
    assert_eq!(ids_of(&batch), vec![0, 3, 6, 9]);
}

#[test]
fn test_offset_and_limit_across_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch((0..10).collect())], &root, "id").unwrap();
    dataset
        .write(&[event_batch((10..20).collect())], WriteMode::Append)
        .unwrap();
    dataset
        .write(&[event_batch((20..30).collect())], WriteMode::Append)
        .unwrap();

    // Rows 8..=13 span the first fragment boundary.
    let batch = collect(dataset.scan().unwrap().offset(8).limit(6).finish().unwrap());
    assert_eq!(ids_of(&batch), vec![8, 9, 10, 11, 12, 13]);

    // Offset + limit past the end clamps.
    let batch = collect(dataset.scan().unwrap().offset(28).limit(10).finish().unwrap());
    assert_eq!(ids_of(&batch), vec![28, 29]);

    // Offset past the end yields an empty result.
    let mut scanner = dataset.scan().unwrap().offset(30).finish().unwrap();
    assert!(scanner.next().is_none());
}

#[test]
fn test_duplicate_key_rejected_without_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch(vec![1, 2, 3])], &root, "id").unwrap();
    let version = dataset.version().unwrap();

    let err = dataset
        .write(&[event_batch(vec![4, 2])], WriteMode::Append)
        .unwrap_err();
    assert!(matches!(err, StrataError::DuplicateKey(_)));

    // No new fragment, no version bump, no stray files.
    assert_eq!(dataset.version().unwrap(), version);
    assert_eq!(dataset.fragments().unwrap().len(), 1);
    let data_files = std::fs::read_dir(root.join("data")).unwrap().count();
    assert_eq!(data_files, 1);
}

#[test]
fn test_append_schema_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch(vec![1])], &root, "id").unwrap();

    let other_schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
        "id",
        DataType::Int64,
        false,
    )]));
    let other = RecordBatch::try_new(other_schema, vec![Arc::new(Int64Array::from(vec![2]))])
        .unwrap();

    let err = dataset.write(&[other], WriteMode::Append).unwrap_err();
    assert!(matches!(err, StrataError::SchemaMismatch(_)));
}

#[test]
fn test_overwrite_discards_previous_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch((0..50).collect())], &root, "id").unwrap();

    dataset
        .write(&[event_batch(vec![100, 101])], WriteMode::Overwrite)
        .unwrap();

    let reopened = open_dataset(&root).unwrap();
    assert_eq!(reopened.count_rows().unwrap(), 2);
    let batch = collect(reopened.scan().unwrap().finish().unwrap());
    assert_eq!(ids_of(&batch), vec![100, 101]);
}

#[test]
fn test_scan_snapshot_ignores_later_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch(vec![1, 2, 3])], &root, "id").unwrap();

    let scanner = dataset.scan().unwrap().finish().unwrap();
    dataset
        .write(&[event_batch(vec![4, 5])], WriteMode::Append)
        .unwrap();

    // The scan sees only the fragments that existed when it was built.
    assert_eq!(ids_of(&collect(scanner)), vec![1, 2, 3]);
    assert_eq!(dataset.count_rows().unwrap(), 5);
}

#[test]
fn test_corrupt_fragment_surfaces_on_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    let dataset = write_table(&[event_batch((0..10).collect())], &root, "id").unwrap();

    let file = &dataset.fragments().unwrap()[0].file;
    let path = root.join("data").join(file);
    truncate(&path, 10);

    let mut scanner = dataset.scan().unwrap().finish().unwrap();
    assert!(matches!(
        scanner.next(),
        Some(Err(StrataError::CorruptPage(_)))
    ));
    assert!(scanner.next().is_none());
}

fn truncate(path: &Path, by: u64) {
    let len = path.metadata().unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len - by).unwrap();
}

#[test]
fn test_conflicting_writers() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("events");
    Dataset::create(&root, &event_schema(), "id").unwrap();

    let a = Dataset::open(&root).unwrap();
    let b = Dataset::open(&root).unwrap();

    a.write(&[event_batch(vec![1])], WriteMode::Append).unwrap();
    let err = b
        .write(&[event_batch(vec![2])], WriteMode::Append)
        .unwrap_err();
    assert!(matches!(err, StrataError::MetadataConflict(_)));

    // The winner's data is intact and the loser left nothing behind.
    let batch = collect(a.scan().unwrap().finish().unwrap());
    assert_eq!(ids_of(&batch), vec![1]);
    let data_files = std::fs::read_dir(root.join("data")).unwrap().count();
    assert_eq!(data_files, 1);
}
