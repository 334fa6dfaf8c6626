//! Parquet sources: one 1-D raw variable per numeric column.

use std::fs::File;
use std::path::Path;

use ::arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use ::arrow::compute::cast;
use ::arrow::datatypes::{DataType, TimeUnit};
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::debug;

use super::csv::EPOCH_UNITS;
use super::SourceReader;
use crate::dataset::{RawDataset, RawVariable};
use crate::error::RetrievalError;

pub struct ParquetReader;

impl SourceReader for ParquetReader {
    fn format(&self) -> &'static str {
        "parquet"
    }

    fn read(&self, path: &Path) -> Result<RawDataset, RetrievalError> {
        let decode = |e: &dyn std::fmt::Display| RetrievalError::decode(path, "parquet", e);

        let file = File::open(path).map_err(|e| RetrievalError::io(path, e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| decode(&e))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| decode(&e))?;

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); schema.fields().len()];
        let mut numeric = vec![true; schema.fields().len()];

        for batch in reader {
            let batch = batch.map_err(|e| decode(&e))?;
            for (i, field) in schema.fields().iter().enumerate() {
                if !numeric[i] {
                    continue;
                }
                match column_values(batch.column(i), field.data_type()) {
                    Some(values) => columns[i].extend(values),
                    None => {
                        debug!(path = %path.display(), column = %field.name(), "Skipping non-numeric column");
                        numeric[i] = false;
                    }
                }
            }
        }

        let mut raw = RawDataset::new();
        raw.attrs = schema
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect();

        for ((field, values), keep) in schema.fields().iter().zip(columns).zip(numeric) {
            if !keep {
                continue;
            }
            let mut variable = RawVariable::column(field.name().clone(), values);
            if matches!(field.data_type(), DataType::Timestamp(..)) {
                variable.attrs.insert("units".to_string(), EPOCH_UNITS.into());
            }
            for (key, value) in field.metadata() {
                variable.attrs.insert(key.clone(), value.clone().into());
            }
            raw.insert(variable);
        }
        raw.sources.push(path.to_path_buf());
        Ok(raw)
    }
}

/// Column values as `f64`, nulls as NaN. Timestamps become epoch seconds.
/// `None` for types that are not numeric.
fn column_values(column: &ArrayRef, data_type: &DataType) -> Option<Vec<f64>> {
    match data_type {
        DataType::Timestamp(unit, _) => {
            let divisor = match unit {
                TimeUnit::Second => 1.0,
                TimeUnit::Millisecond => 1e3,
                TimeUnit::Microsecond => 1e6,
                TimeUnit::Nanosecond => 1e9,
            };
            let ints = cast(column, &DataType::Int64).ok()?;
            let ints = ints.as_any().downcast_ref::<Int64Array>()?;
            Some(
                (0..ints.len())
                    .map(|i| {
                        if ints.is_null(i) {
                            f64::NAN
                        } else {
                            ints.value(i) as f64 / divisor
                        }
                    })
                    .collect(),
            )
        }
        dt if dt.is_numeric() || matches!(dt, DataType::Boolean) => {
            let floats = cast(column, &DataType::Float64).ok()?;
            let floats = floats.as_any().downcast_ref::<Float64Array>()?;
            Some(
                (0..floats.len())
                    .map(|i| if floats.is_null(i) { f64::NAN } else { floats.value(i) })
                    .collect(),
            )
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::arrow::array::{Int32Array, StringArray};
    use ::arrow::datatypes::{Field, Schema};
    use ::arrow::record_batch::RecordBatch;
    use ::parquet::arrow::ArrowWriter;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_read_numeric_columns() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("rad.parquet");

        let schema = Arc::new(
            Schema::new(vec![
                Field::new("counts", DataType::Int32, true),
                Field::new("flux", DataType::Float64, false),
                Field::new("label", DataType::Utf8, false),
            ])
            .with_metadata(HashMap::from([("site".to_string(), "sgp".to_string())])),
        );
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None])),
                Arc::new(Float64Array::from(vec![0.5, 1.5])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        )
        .expect("batch");
        let file = File::create(&path).expect("create");
        let mut writer = ArrowWriter::try_new(file, schema, None).expect("writer");
        writer.write(&batch).expect("write");
        writer.close().expect("close");

        let raw = ParquetReader.read(&path).expect("read");
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.attrs["site"], "sgp");
        let counts = raw.get("counts").expect("counts");
        assert_eq!(counts.data[[0]], 1.0);
        assert!(counts.data[[1]].is_nan());
        assert_eq!(raw.get("flux").expect("flux").data[[1]], 1.5);
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"not parquet").expect("write");
        let err = ParquetReader.read(&path).expect_err("corrupt");
        assert!(matches!(err, RetrievalError::Decode { .. }));
    }
}
