//! Parquet readers and the feature-table writer.
//!
//! Source exports are read as Arrow batches and flattened into generic JSON
//! mappings so every origin reaches the normalizer in the same untyped form.
//! Nested `Struct` and `List<Struct>` columns become JSON objects and arrays.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use stillopen_core::{FEATURE_COUNT, Origin, RawRecord, feature_table_schema};
use tracing::{debug, info};

use crate::StoreError;

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    let batches = batches?;
    debug!(path = %path.display(), batches = batches.len(), "read parquet");
    Ok(batches)
}

/// Convert Arrow batches into one JSON mapping per row.
///
/// Null values are omitted from the mapping, so an absent key and a null
/// column read the same downstream.
pub fn batches_to_records(batches: &[RecordBatch]) -> Result<Vec<RawRecord>, StoreError> {
    let non_empty: Vec<&RecordBatch> = batches.iter().filter(|b| b.num_rows() > 0).collect();
    if non_empty.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    writer.write_batches(&non_empty)?;
    writer.finish()?;
    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<RawRecord> = serde_json::from_slice(&buf)?;
    Ok(records)
}

/// One row of the engineered feature table.
#[derive(Debug, Clone)]
pub struct FeatureTableRow {
    pub name: String,
    pub category: String,
    pub origin: Origin,
    pub open: Option<u8>,
    pub features: [f64; FEATURE_COUNT],
}

/// Write the feature table to Parquet using
/// [`feature_table_schema`](stillopen_core::feature_table_schema).
pub fn write_feature_table(path: &Path, rows: &[FeatureTableRow]) -> Result<(), StoreError> {
    let schema = Arc::new(feature_table_schema());

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    columns.push(Arc::new(StringArray::from(
        rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(StringArray::from(
        rows.iter().map(|r| r.category.as_str()).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(StringArray::from(
        rows.iter().map(|r| r.origin.as_str()).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(Int32Array::from(
        rows.iter()
            .map(|r| r.open.map(i32::from))
            .collect::<Vec<_>>(),
    )));
    for idx in 0..FEATURE_COUNT {
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| r.features[idx]).collect::<Vec<_>>(),
        )));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    info!(path = %path.display(), rows = rows.len(), "wrote feature table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, ListBuilder, StringBuilder, StructArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use stillopen_core::FEATURE_NAMES;
    use tempfile::TempDir;

    /// Overture-like batch: `names` struct, `websites` list, `confidence`.
    fn overture_batch() -> RecordBatch {
        let primary = StringArray::from(vec![Some("Blue Door Cafe"), None]);
        let names = StructArray::from(vec![(
            Arc::new(Field::new("primary", DataType::Utf8, true)),
            Arc::new(primary) as ArrayRef,
        )]);

        let mut websites = ListBuilder::new(StringBuilder::new());
        websites.values().append_value("https://bluedoor.example");
        websites.append(true);
        websites.append(false);

        let confidence = Float64Array::from(vec![0.93, 0.41]);

        let schema = Schema::new(vec![
            Field::new("names", names.data_type().clone(), true),
            Field::new(
                "websites",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
            Field::new("confidence", DataType::Float64, true),
        ]);

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(names),
                Arc::new(websites.finish()),
                Arc::new(confidence),
            ],
        )
        .unwrap()
    }

    fn write_parquet(path: &Path, batch: &RecordBatch) {
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn records_keep_nested_shapes() {
        let records = batches_to_records(&[overture_batch()]).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0]["names"]["primary"], "Blue Door Cafe");
        assert_eq!(records[0]["websites"][0], "https://bluedoor.example");
        assert_eq!(records[0]["confidence"], 0.93);

        // Null list column is omitted rather than written as null.
        assert!(!records[1].contains_key("websites"));
    }

    #[test]
    fn empty_batches_yield_no_records() {
        assert!(batches_to_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn parquet_round_trip_through_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overture.parquet");
        write_parquet(&path, &overture_batch());

        let batches = read_parquet(&path).unwrap();
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);

        let records = batches_to_records(&batches).unwrap();
        assert_eq!(records[0]["names"]["primary"], "Blue Door Cafe");
    }

    #[test]
    fn read_parquet_missing_file() {
        let err = read_parquet(Path::new("/nonexistent/places.parquet")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn feature_table_written_with_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.parquet");

        let mut features = [0.0; FEATURE_COUNT];
        features[0] = 1.0;
        let rows = vec![
            FeatureTableRow {
                name: "Blue Door Cafe".into(),
                category: "cafe".into(),
                origin: Origin::Overture,
                open: Some(1),
                features,
            },
            FeatureTableRow {
                name: "Old Mill".into(),
                category: "bar".into(),
                origin: Origin::Osm,
                open: None,
                features: [0.0; FEATURE_COUNT],
            },
        ];
        write_feature_table(&path, &rows).unwrap();

        let batches = read_parquet(&path).unwrap();
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 4 + FEATURE_COUNT);

        let open = batch
            .column_by_name("open")
            .unwrap()
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(open.value(0), 1);
        assert!(open.is_null(1));

        let has_website = batch
            .column_by_name(FEATURE_NAMES[0])
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(has_website.value(0), 1.0);
    }
}
