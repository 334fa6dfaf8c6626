//! Retrieval of raw input.
//!
//! [`retrieve`] reads every file of one [`InputReference`] with the parser
//! declared for its source and merges the results into a single
//! [`RawDataset`] keyed by source-native names (after any configured renames).

pub mod input;
pub mod readers;

use std::collections::BTreeMap;

use ndarray::{concatenate, Axis};
use tracing::{debug, info};

pub use input::{classify_files, discover_units, InputReference, SourceMatcher, UNMATCHED_UNIT};
pub use readers::{reader_for, SourceReader};

use crate::config::{RetrieverConfig, SourceConfig};
use crate::dataset::{RawDataset, RawVariable};
use crate::error::RetrievalError;

/// Reads and merges all sources of one unit.
pub fn retrieve(
    config: &RetrieverConfig,
    input: &InputReference,
) -> Result<RawDataset, RetrievalError> {
    if input.is_empty() {
        return Err(RetrievalError::NoInputs {
            unit: input.key.clone(),
        });
    }

    let mut merged = RawDataset::new();
    // variable name -> source that provided it
    let mut origin: BTreeMap<String, String> = BTreeMap::new();

    for source in &config.sources {
        let files = input
            .files
            .get(&source.name)
            .filter(|files| !files.is_empty())
            .ok_or_else(|| RetrievalError::SourceUnmatched {
                source_name: source.name.clone(),
                unit: input.key.clone(),
            })?;

        let raw = read_source(source, files)?;
        debug!(
            unit = %input.key,
            source = %source.name,
            files = files.len(),
            variables = raw.len(),
            "Read source"
        );
        merge_into(&mut merged, &mut origin, raw, &source.name, config)?;
    }

    info!(
        unit = %input.key,
        files = merged.sources.len(),
        variables = merged.len(),
        "Retrieved raw dataset"
    );
    Ok(merged)
}

/// Reads all files of one source; several files concatenate along axis 0.
fn read_source(
    source: &SourceConfig,
    files: &[std::path::PathBuf],
) -> Result<RawDataset, RetrievalError> {
    let reader = reader_for(source);
    let mut combined: Option<RawDataset> = None;

    for path in files {
        let mut raw = reader.read(path)?;
        apply_renames(&mut raw, source);
        combined = Some(match combined {
            None => raw,
            Some(acc) => concat_datasets(acc, raw, path, reader.format())?,
        });
    }

    combined.ok_or_else(|| RetrievalError::SourceUnmatched {
        source_name: source.name.clone(),
        unit: String::new(),
    })
}

fn apply_renames(raw: &mut RawDataset, source: &SourceConfig) {
    if source.rename.is_empty() {
        return;
    }
    let variables = std::mem::take(&mut raw.variables);
    for (name, mut variable) in variables {
        let name = source.rename.get(&name).cloned().unwrap_or(name);
        variable.name = name.clone();
        raw.variables.insert(name, variable);
    }
}

fn concat_datasets(
    mut acc: RawDataset,
    next: RawDataset,
    path: &std::path::Path,
    format: &str,
) -> Result<RawDataset, RetrievalError> {
    if acc.variables.keys().ne(next.variables.keys()) {
        return Err(RetrievalError::decode(
            path,
            format,
            "file has different variables than earlier files of the same source",
        ));
    }

    for (name, variable) in next.variables {
        let Some(existing) = acc.variables.get_mut(&name) else {
            continue;
        };
        if existing.data.ndim() == 0 {
            // Scalars must agree across files rather than concatenate.
            if existing.data != variable.data {
                return Err(RetrievalError::decode(
                    path,
                    format,
                    format!("scalar '{name}' differs between files"),
                ));
            }
            continue;
        }
        let joined = concatenate(Axis(0), &[existing.data.view(), variable.data.view()])
            .map_err(|e| RetrievalError::decode(path, format, format!("cannot append '{name}': {e}")))?;
        existing.data = joined;
    }

    for (key, value) in next.attrs {
        acc.attrs.entry(key).or_insert(value);
    }
    acc.sources.extend(next.sources);
    Ok(acc)
}

fn merge_into(
    merged: &mut RawDataset,
    origin: &mut BTreeMap<String, String>,
    raw: RawDataset,
    source: &str,
    config: &RetrieverConfig,
) -> Result<(), RetrievalError> {
    for (name, variable) in raw.variables {
        match merged.variables.get(&name) {
            None => {
                origin.insert(name.clone(), source.to_string());
                merged.variables.insert(name, variable);
            }
            Some(existing) => {
                let first = origin.get(&name).cloned().unwrap_or_default();
                if !config.shared_variables.contains(&name) {
                    return Err(RetrievalError::Collision {
                        variable: name,
                        first,
                        second: source.to_string(),
                    });
                }
                if !same_values(existing, &variable) {
                    return Err(RetrievalError::SharedMismatch {
                        variable: name,
                        first,
                        second: source.to_string(),
                    });
                }
            }
        }
    }

    for (key, value) in raw.attrs {
        merged.attrs.entry(key).or_insert(value);
    }
    merged.sources.extend(raw.sources);
    Ok(())
}

/// Equal shape and values, treating NaN as equal to NaN.
fn same_values(a: &RawVariable, b: &RawVariable) -> bool {
    a.data.shape() == b.data.shape()
        && a.data
            .iter()
            .zip(b.data.iter())
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
}
