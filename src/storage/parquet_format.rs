//! Parquet output format.
//!
//! One Float64 column per variable plus a `qc_<name>` UInt32 column with its
//! flags. Dataset attributes, per-variable metadata and provenance are kept
//! as JSON in the Arrow schema metadata. Only datasets whose variables are
//! all one-dimensional over a single shared dimension can be written.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, UInt32Array};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::ArrayD;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{DataType, Dataset, Provenance, Variable};
use crate::error::StorageError;

pub const DATASET_METADATA_KEY: &str = "ts_forge.dataset";
pub const PROVENANCE_METADATA_KEY: &str = "ts_forge.provenance";
const FLAG_PREFIX: &str = "qc_";

#[derive(Debug, Serialize, Deserialize)]
struct DatasetMetadata {
    attrs: BTreeMap<String, Value>,
    dim: String,
    variables: BTreeMap<String, VariableMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableMetadata {
    coordinate: bool,
    dtype: DataType,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
    #[serde(default)]
    fill_value: Option<f64>,
}

fn unsupported(message: impl Into<String>) -> StorageError {
    StorageError::Unsupported {
        format: "parquet".to_string(),
        message: message.into(),
    }
}

/// The single dimension every variable spans.
fn shared_dimension(dataset: &Dataset) -> Result<String, StorageError> {
    let mut shared: Option<&String> = None;
    for variable in dataset.variables() {
        let [dim] = variable.dims.as_slice() else {
            return Err(unsupported(format!(
                "variable '{}' with {} dimensions",
                variable.name,
                variable.dims.len()
            )));
        };
        match shared {
            None => shared = Some(dim),
            Some(existing) if existing == dim => {}
            Some(existing) => {
                return Err(unsupported(format!(
                    "variables over different dimensions ('{existing}' and '{dim}')"
                )))
            }
        }
        if variable.name.starts_with(FLAG_PREFIX) && dataset.contains(&variable.name[FLAG_PREFIX.len()..]) {
            return Err(unsupported(format!(
                "variable name '{}' that clashes with a flag column",
                variable.name
            )));
        }
    }
    shared
        .cloned()
        .ok_or_else(|| unsupported("a dataset without variables"))
}

pub fn encode(dataset: &Dataset, provenance: Option<&Provenance>) -> Result<Vec<u8>, StorageError> {
    let dim = shared_dimension(dataset)?;

    let mut fields = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();
    let mut variables = BTreeMap::new();
    for (coordinate, variable) in dataset
        .coords
        .values()
        .map(|v| (true, v))
        .chain(dataset.data_vars.values().map(|v| (false, v)))
    {
        fields.push(Field::new(&variable.name, ArrowType::Float64, false));
        columns.push(Arc::new(Float64Array::from_iter_values(variable.data.iter().copied())));
        fields.push(Field::new(
            format!("{FLAG_PREFIX}{}", variable.name),
            ArrowType::UInt32,
            false,
        ));
        columns.push(Arc::new(UInt32Array::from_iter_values(variable.flags.iter().copied())));
        variables.insert(
            variable.name.clone(),
            VariableMetadata {
                coordinate,
                dtype: variable.dtype,
                attrs: variable.attrs.clone(),
                fill_value: variable.fill_value,
            },
        );
    }

    let metadata = DatasetMetadata {
        attrs: dataset.attrs.clone(),
        dim,
        variables,
    };
    let mut schema_metadata = HashMap::new();
    schema_metadata.insert(DATASET_METADATA_KEY.to_string(), serde_json::to_string(&metadata)?);
    if let Some(provenance) = provenance {
        schema_metadata.insert(PROVENANCE_METADATA_KEY.to_string(), serde_json::to_string(provenance)?);
    }
    let schema = Arc::new(Schema::new_with_metadata(fields, schema_metadata));
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let mut buf = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(buf)
}

pub fn decode(path: &Path) -> Result<(Dataset, Option<Provenance>), StorageError> {
    let malformed = |message: String| StorageError::Malformed {
        path: path.to_path_buf(),
        message,
    };

    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let metadata: DatasetMetadata = schema
        .metadata()
        .get(DATASET_METADATA_KEY)
        .ok_or_else(|| malformed(format!("no '{DATASET_METADATA_KEY}' metadata")))
        .and_then(|text| serde_json::from_str(text).map_err(|e| malformed(e.to_string())))?;
    let provenance = schema
        .metadata()
        .get(PROVENANCE_METADATA_KEY)
        .map(|text| serde_json::from_str::<Provenance>(text).map_err(|e| malformed(e.to_string())))
        .transpose()?;

    let mut values: HashMap<String, Vec<f64>> = HashMap::new();
    let mut flags: HashMap<String, Vec<u32>> = HashMap::new();
    for batch in builder.build()? {
        let batch = batch?;
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if let Some(array) = column.as_any().downcast_ref::<Float64Array>() {
                values
                    .entry(field.name().clone())
                    .or_default()
                    .extend(array.values().iter().copied());
            } else if let Some(array) = column.as_any().downcast_ref::<UInt32Array>() {
                flags
                    .entry(field.name().clone())
                    .or_default()
                    .extend(array.values().iter().copied());
            }
        }
    }

    let mut dataset = Dataset::new();
    dataset.attrs = metadata.attrs;
    for (name, meta) in metadata.variables {
        let data = values
            .remove(&name)
            .ok_or_else(|| malformed(format!("missing column '{name}'")))?;
        let flag_values = flags
            .remove(&format!("{FLAG_PREFIX}{name}"))
            .unwrap_or_else(|| vec![0; data.len()]);
        if flag_values.len() != data.len() {
            return Err(malformed(format!("flag column of '{name}' has the wrong length")));
        }
        let variable = Variable {
            name: name.clone(),
            dims: vec![metadata.dim.clone()],
            dtype: meta.dtype,
            data: ArrayD::from_shape_vec(vec![data.len()], data).map_err(|e| malformed(e.to_string()))?,
            flags: ArrayD::from_shape_vec(vec![flag_values.len()], flag_values)
                .map_err(|e| malformed(e.to_string()))?,
            attrs: meta.attrs,
            fill_value: meta.fill_value,
        };
        if meta.coordinate {
            dataset.coords.insert(name, variable);
        } else {
            dataset.data_vars.insert(name, variable);
        }
    }
    Ok((dataset, provenance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::flags::{self, bit_mask, FlagMeaning};
    use ndarray::{arr1, arr2};
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.attrs.insert("datastream".to_string(), json!("sgp.met.a1"));
        ds.coords.insert(
            "time".to_string(),
            Variable::new("time", vec!["time".to_string()], DataType::Float64, arr1(&[0.0, 60.0, 120.0]).into_dyn()),
        );
        let mut temperature = Variable::new(
            "temperature",
            vec!["time".to_string()],
            DataType::Float32,
            arr1(&[10.0, -9999.0, 12.5]).into_dyn(),
        )
        .with_fill_value(-9999.0)
        .with_attr("units", "degC");
        temperature.flags[[1]] = 1;
        ds.data_vars.insert("temperature".to_string(), temperature);
        ds
    }

    #[test]
    fn test_round_trip_with_provenance() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let ds = dataset();
        let provenance = Provenance::new(Uuid::new_v4(), "met", "20240101");

        let bytes = encode(&ds, Some(&provenance)).expect("encode");
        std::fs::write(&path, bytes).expect("write");
        let (back, stored) = decode(&path).expect("decode");

        assert_eq!(back, ds);
        assert_eq!(stored, Some(provenance));
    }

    #[test]
    fn test_flag_meanings_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let mut ds = dataset();
        if let Some(temperature) = ds.data_vars.get_mut("temperature") {
            let mut custom = FlagMeaning::new(bit_mask(6), "sensor_limit");
            custom.assessment = Some("indeterminate".to_string());
            flags::annotate(temperature, FlagMeaning::new(flags::MISSING_FLAG, "missing"));
            flags::annotate(temperature, custom);
        }

        std::fs::write(&path, encode(&ds, None).expect("encode")).expect("write");
        let (back, _) = decode(&path).expect("decode");
        let recorded = flags::meanings(&back.data_vars["temperature"]);
        assert_eq!(recorded, flags::meanings(&ds.data_vars["temperature"]));
        assert_eq!(recorded[1].mask, 1 << 5);
        assert_eq!(recorded[1].description, None);
        assert_eq!(recorded[1].assessment.as_deref(), Some("indeterminate"));
    }

    #[test]
    fn test_rejects_multidimensional() {
        let mut ds = dataset();
        ds.data_vars.insert(
            "wind".to_string(),
            Variable::new(
                "wind",
                vec!["time".to_string(), "height".to_string()],
                DataType::Float64,
                arr2(&[[1.0], [2.0], [3.0]]).into_dyn(),
            ),
        );
        let err = encode(&ds, None).expect_err("2-d");
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }

    #[test]
    fn test_rejects_mixed_dimensions() {
        let mut ds = dataset();
        ds.coords.insert(
            "height".to_string(),
            Variable::new("height", vec!["height".to_string()], DataType::Float64, arr1(&[2.0]).into_dyn()),
        );
        let err = encode(&ds, None).expect_err("mixed");
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }
}
