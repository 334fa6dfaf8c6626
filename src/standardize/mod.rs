//! Mapping raw datasets onto the declared canonical dataset.
//!
//! For every declared variable the standardizer finds its raw source, converts
//! units, aligns the array onto the declared dimensions, and replaces missing,
//! non-finite or implausible values with the fill value (flagging them with
//! [`MISSING_FLAG`]). Output depends only on the raw dataset and the
//! configuration, so identical inputs give identical datasets.

pub mod shape;
pub mod units;

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, Zip};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{DatasetConfig, NameList, VariableConfig};
use crate::dataset::flags::MISSING_FLAG;
use crate::dataset::{Dataset, RawDataset, RawVariable, Variable};
use crate::error::StandardizationError;
use units::{resolve_converter, Converter};

/// Builds the canonical dataset for one unit.
pub fn standardize(
    config: &DatasetConfig,
    raw: &RawDataset,
) -> Result<Dataset, StandardizationError> {
    Standardizer::new(config).run(raw)
}

pub struct Standardizer<'a> {
    config: &'a DatasetConfig,
}

impl<'a> Standardizer<'a> {
    pub fn new(config: &'a DatasetConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, raw: &RawDataset) -> Result<Dataset, StandardizationError> {
        let mut dataset = Dataset::new();
        let mut sizes: BTreeMap<String, usize> = BTreeMap::new();

        for (name, var_config) in &self.config.coords {
            let coord = self.coordinate(name, var_config, raw)?;
            sizes.insert(name.clone(), coord.len());
            dataset.coords.insert(name.clone(), coord);
        }

        for (name, var_config) in &self.config.data_vars {
            let variable = self.data_variable(name, var_config, raw, &sizes)?;
            debug!(
                variable = %name,
                missing = variable.flagged_count(),
                "Standardized variable"
            );
            dataset.data_vars.insert(name.clone(), variable);
        }

        dataset.attrs = self.config.attrs.clone();
        if let Some(datastream) = derive_datastream(&dataset.attrs) {
            dataset
                .attrs
                .entry("datastream".to_string())
                .or_insert(Value::String(datastream));
        }

        info!(
            coords = dataset.coords.len(),
            data_vars = dataset.data_vars.len(),
            "Standardized dataset"
        );
        Ok(dataset)
    }

    fn coordinate(
        &self,
        name: &str,
        config: &VariableConfig,
        raw: &RawDataset,
    ) -> Result<Variable, StandardizationError> {
        let values = match &config.data {
            Some(literal) => Array1::from(literal.clone())
                .into_dyn()
                .mapv(|v| config.dtype.cast(v)),
            None => {
                let source = self.find_source(name, config, raw)?;
                if source.data.ndim() > 1 {
                    return Err(StandardizationError::ShapeMismatch {
                        variable: name.to_string(),
                        dims: config.dims.clone(),
                        found: source.data.shape().to_vec(),
                    });
                }
                let converter = self.converter(name, config, source)?;
                let valid_range = config.source.as_ref().and_then(|s| s.valid_range);
                let marker = source.missing_marker();
                let data = source.data.mapv(|v| {
                    if is_raw_missing(v, marker, valid_range) {
                        f64::NAN
                    } else {
                        config.dtype.cast(converter.apply(v))
                    }
                });
                data.into_shape_with_order(ndarray::IxDyn(&[source.data.len()]))
                    .map_err(|_| StandardizationError::InvalidCoordinate {
                        variable: name.to_string(),
                    })?
            }
        };

        if values.iter().any(|v| !config.dtype.can_represent(*v)) {
            return Err(StandardizationError::InvalidCoordinate {
                variable: name.to_string(),
            });
        }

        let mut coord = Variable::new(name, config.dims.clone(), config.dtype, values);
        coord.attrs = variable_attrs(config);
        coord.fill_value = config.fill_value;
        Ok(coord)
    }

    fn data_variable(
        &self,
        name: &str,
        config: &VariableConfig,
        raw: &RawDataset,
        sizes: &BTreeMap<String, usize>,
    ) -> Result<Variable, StandardizationError> {
        let source = self.find_source(name, config, raw)?;
        let converter = self.converter(name, config, source)?;
        let valid_range = config.source.as_ref().and_then(|s| s.valid_range);
        let marker = source.missing_marker();
        let fill = config.effective_fill();
        let dtype = config.dtype;

        let mut data = shape::align(
            name,
            source.data.clone(),
            &source.dims,
            &config.dims,
            sizes,
        )?;
        let mut flags: ArrayD<u32> = ArrayD::zeros(data.raw_dim());

        Zip::from(&mut data).and(&mut flags).for_each(|value, flag| {
            let raw_value = *value;
            let converted = if is_raw_missing(raw_value, marker, valid_range) {
                None
            } else {
                let v = dtype.cast(converter.apply(raw_value));
                dtype.can_represent(v).then_some(v)
            };
            match converted {
                Some(v) => *value = v,
                None => {
                    *value = fill;
                    *flag |= MISSING_FLAG;
                }
            }
        });

        let mut variable = Variable::new(name, config.dims.clone(), dtype, data);
        variable.flags = flags;
        variable.attrs = variable_attrs(config);
        variable.fill_value = Some(fill);
        Ok(variable)
    }

    /// First candidate name present in the raw dataset.
    fn find_source<'r>(
        &self,
        name: &str,
        config: &VariableConfig,
        raw: &'r RawDataset,
    ) -> Result<&'r RawVariable, StandardizationError> {
        let default = NameList::One(name.to_string());
        let names = config.source.as_ref().map(|s| &s.name).unwrap_or(&default);
        let candidates = names.candidates();
        candidates
            .iter()
            .find_map(|candidate| raw.get(candidate))
            .ok_or_else(|| StandardizationError::MissingSource {
                variable: name.to_string(),
                tried: candidates.join(", "),
            })
    }

    fn converter(
        &self,
        name: &str,
        config: &VariableConfig,
        source: &RawVariable,
    ) -> Result<Converter, StandardizationError> {
        let Some(target) = config.units.as_deref() else {
            return Ok(Converter::Identity);
        };
        let from = config
            .source
            .as_ref()
            .and_then(|s| s.units.as_deref())
            .or_else(|| source.units());
        let Some(from) = from else {
            return Ok(Converter::Identity);
        };
        resolve_converter(&self.config.conversions, from, target).ok_or_else(|| {
            StandardizationError::NoConversion {
                variable: name.to_string(),
                from: from.to_string(),
                to: target.to_string(),
            }
        })
    }
}

fn is_raw_missing(value: f64, marker: Option<f64>, valid_range: Option<[f64; 2]>) -> bool {
    if !value.is_finite() || marker == Some(value) {
        return true;
    }
    match valid_range {
        Some([min, max]) => value < min || value > max,
        None => false,
    }
}

fn variable_attrs(config: &VariableConfig) -> BTreeMap<String, Value> {
    let mut attrs = config.attrs.clone();
    if let Some(units) = &config.units {
        attrs.insert("units".to_string(), Value::String(units.clone()));
    }
    attrs
}

/// `location_id.dataset_name[-qualifier][-temporal].data_level`, when the
/// attributes needed are present.
pub fn derive_datastream(attrs: &BTreeMap<String, Value>) -> Option<String> {
    let get = |key: &str| -> Option<String> {
        match attrs.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let location = get("location_id")?;
    let dataset = get("dataset_name")?;
    let level = get("data_level")?;
    let mut name = format!("{location}.{dataset}");
    for suffix in ["qualifier", "temporal"] {
        if let Some(value) = get(suffix) {
            name.push('-');
            name.push_str(&value);
        }
    }
    name.push('.');
    name.push_str(&level);
    Some(name)
}
