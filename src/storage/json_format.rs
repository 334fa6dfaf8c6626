//! JSON output format.
//!
//! Variables are written with flat row-major `data` and `flags` arrays; NaN
//! is written as `null`. Provenance sits in its own top-level section.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{DataType, Dataset, Provenance, Variable};
use crate::error::StorageError;

pub const FORMAT_TAG: &str = "ts-forge/1";

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    format: String,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
    #[serde(default)]
    dims: BTreeMap<String, usize>,
    #[serde(default)]
    coords: BTreeMap<String, StoredVariable>,
    #[serde(default)]
    data_vars: BTreeMap<String, StoredVariable>,
    #[serde(default)]
    provenance: Option<Provenance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVariable {
    dims: Vec<String>,
    dtype: DataType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, Value>,
    #[serde(default)]
    fill_value: Option<f64>,
    data: Vec<Option<f64>>,
    flags: Vec<u32>,
}

impl StoredVariable {
    fn from_variable(variable: &Variable) -> Self {
        Self {
            dims: variable.dims.clone(),
            dtype: variable.dtype,
            attrs: variable.attrs.clone(),
            fill_value: variable.fill_value,
            data: variable
                .data
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect(),
            flags: variable.flags.iter().copied().collect(),
        }
    }

    fn into_variable(
        self,
        name: &str,
        dims: &BTreeMap<String, usize>,
        path: &Path,
    ) -> Result<Variable, StorageError> {
        let malformed = |message: String| StorageError::Malformed {
            path: path.to_path_buf(),
            message,
        };
        let shape = self
            .dims
            .iter()
            .map(|d| {
                dims.get(d)
                    .copied()
                    .ok_or_else(|| malformed(format!("variable '{name}' uses undeclared dimension '{d}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let values: Vec<f64> = self.data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| malformed(format!("data of '{name}': {e}")))?;
        let flags = ArrayD::from_shape_vec(IxDyn(&shape), self.flags)
            .map_err(|e| malformed(format!("flags of '{name}': {e}")))?;

        Ok(Variable {
            name: name.to_string(),
            dims: self.dims,
            dtype: self.dtype,
            data,
            flags,
            attrs: self.attrs,
            fill_value: self.fill_value,
        })
    }
}

pub fn encode(dataset: &Dataset, provenance: Option<&Provenance>) -> Result<Vec<u8>, StorageError> {
    let document = StoredDocument {
        format: FORMAT_TAG.to_string(),
        attrs: dataset.attrs.clone(),
        dims: dataset.dims(),
        coords: dataset
            .coords
            .iter()
            .map(|(name, v)| (name.clone(), StoredVariable::from_variable(v)))
            .collect(),
        data_vars: dataset
            .data_vars
            .iter()
            .map(|(name, v)| (name.clone(), StoredVariable::from_variable(v)))
            .collect(),
        provenance: provenance.cloned(),
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

pub fn decode(bytes: &[u8], path: &Path) -> Result<(Dataset, Option<Provenance>), StorageError> {
    let document: StoredDocument = serde_json::from_slice(bytes).map_err(|e| StorageError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if document.format != FORMAT_TAG {
        return Err(StorageError::Malformed {
            path: path.to_path_buf(),
            message: format!("unknown format tag '{}'", document.format),
        });
    }

    let mut dataset = Dataset::new();
    dataset.attrs = document.attrs;
    for (name, stored) in document.coords {
        let variable = stored.into_variable(&name, &document.dims, path)?;
        dataset.coords.insert(name, variable);
    }
    for (name, stored) in document.data_vars {
        let variable = stored.into_variable(&name, &document.dims, path)?;
        dataset.data_vars.insert(name, variable);
    }
    Ok((dataset, document.provenance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::flags::{self, bit_mask, FlagMeaning};
    use ndarray::{arr1, arr2};
    use serde_json::json;

    #[test]
    fn test_multidimensional_round_trip() {
        let mut ds = Dataset::new();
        ds.attrs.insert("datastream".to_string(), json!("sgp.met.a1"));
        ds.coords.insert(
            "time".to_string(),
            Variable::new("time", vec!["time".to_string()], DataType::Float64, arr1(&[0.0, 1.0]).into_dyn()),
        );
        ds.coords.insert(
            "height".to_string(),
            Variable::new("height", vec!["height".to_string()], DataType::Float32, arr1(&[2.0, 10.0, 20.0]).into_dyn()),
        );
        let mut wind = Variable::new(
            "wind",
            vec!["time".to_string(), "height".to_string()],
            DataType::Float32,
            arr2(&[[1.0, 2.0, 3.0], [4.0, f64::NAN, 6.0]]).into_dyn(),
        )
        .with_attr("units", "m/s");
        wind.flags[[1, 1]] = 1;
        ds.data_vars.insert("wind".to_string(), wind);

        let bytes = encode(&ds, None).expect("encode");
        let (back, provenance) = decode(&bytes, Path::new("x.json")).expect("decode");
        assert!(provenance.is_none());
        assert_eq!(back.attrs, ds.attrs);
        assert_eq!(back.coords, ds.coords);
        let w = &back.data_vars["wind"];
        assert_eq!(w.dims, ds.data_vars["wind"].dims);
        assert_eq!(w.flags, ds.data_vars["wind"].flags);
        assert!(w.data[[1, 1]].is_nan());
        assert_eq!(w.data[[1, 2]], 6.0);
        assert_eq!(w.units(), Some("m/s"));
    }

    #[test]
    fn test_flag_meanings_round_trip() {
        let mut ds = Dataset::new();
        let mut temperature = Variable::new(
            "temperature",
            vec!["time".to_string()],
            DataType::Float64,
            arr1(&[30.0, 1.0]).into_dyn(),
        );
        temperature.flags[[0]] = bit_mask(6);
        let mut custom = FlagMeaning::new(bit_mask(6), "sensor_limit");
        custom.description = Some("Above the rated maximum".to_string());
        custom.assessment = Some("bad".to_string());
        flags::annotate(&mut temperature, FlagMeaning::new(flags::RANGE_FLAG, "high"));
        flags::annotate(&mut temperature, custom);
        ds.data_vars.insert("temperature".to_string(), temperature);

        let bytes = encode(&ds, None).expect("encode");
        let (back, _) = decode(&bytes, Path::new("x.json")).expect("decode");
        let t = &back.data_vars["temperature"];
        assert_eq!(flags::meanings(t), flags::meanings(&ds.data_vars["temperature"]));
        assert_eq!(flags::meanings(t)[1].assessment.as_deref(), Some("bad"));
    }

    #[test]
    fn test_rejects_foreign_documents() {
        let err = decode(br#"{"format": "other"}"#, Path::new("x.json")).expect_err("tag");
        assert!(matches!(err, StorageError::Malformed { .. }));

        let bad_shape = json!({
            "format": FORMAT_TAG,
            "dims": {"time": 3},
            "data_vars": {"t": {"dims": ["time"], "dtype": "float64", "data": [1.0], "flags": [0]}}
        });
        let err = decode(bad_shape.to_string().as_bytes(), Path::new("x.json")).expect_err("shape");
        assert!(matches!(err, StorageError::Malformed { .. }));
    }
}
