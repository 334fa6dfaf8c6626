//! Loads a pipeline document and its four sub-documents from YAML.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::{
    CheckKind, ComponentRef, DatasetConfig, PipelineDocument, QualityConfig, RetrieverConfig,
    StorageConfig, ALL_VARIABLES,
};
use crate::error::PipelineError;
use crate::validation::{constraints, validate_as, SchemaError, SchemaKind, Validated};

/// A pipeline whose five documents all passed validation.
///
/// Relative paths (`retriever.root`, `storage.root`) are already resolved
/// against the directory holding the pipeline document.
#[derive(Debug, Clone)]
pub struct ValidatedPipeline {
    pub document: Validated<PipelineDocument>,
    pub base_dir: PathBuf,
    pub retriever: Validated<RetrieverConfig>,
    pub dataset: Validated<DatasetConfig>,
    pub quality: Validated<QualityConfig>,
    pub storage: Validated<StorageConfig>,
    /// Cross-document warnings; the per-document ones stay on each part.
    pub warnings: Vec<String>,
}

impl ValidatedPipeline {
    pub fn name(&self) -> &str {
        &self.document.name
    }

    /// Every warning from every document.
    pub fn all_warnings(&self) -> Vec<String> {
        self.document
            .warnings()
            .iter()
            .chain(self.retriever.warnings())
            .chain(self.dataset.warnings())
            .chain(self.quality.warnings())
            .chain(self.storage.warnings())
            .chain(self.warnings.iter())
            .cloned()
            .collect()
    }
}

/// Reads and validates the pipeline document at `path`.
pub fn load_pipeline(path: &Path) -> Result<ValidatedPipeline, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    load_document(&text, &base_dir, Some(path))
}

/// Validates a pipeline document given as text. Relative paths resolve
/// against `base_dir`.
pub fn load_pipeline_str(text: &str, base_dir: &Path) -> Result<ValidatedPipeline, PipelineError> {
    load_document(text, base_dir, None)
}

fn load_document(
    text: &str,
    base_dir: &Path,
    path: Option<&Path>,
) -> Result<ValidatedPipeline, PipelineError> {
    let origin = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("<inline>"));
    let raw = parse_yaml(text, &origin)?;

    let document = validate_as(&raw, SchemaKind::Pipeline, constraints::check_pipeline)
        .map_err(|e| attach_document(e, path))?;

    let retriever = load_component(
        &document.retriever,
        base_dir,
        SchemaKind::Retriever,
        constraints::check_retriever,
    )?;
    let dataset = load_component(
        &document.dataset,
        base_dir,
        SchemaKind::Dataset,
        constraints::check_dataset,
    )?;
    let quality = load_component(
        &document.quality,
        base_dir,
        SchemaKind::Quality,
        constraints::check_quality,
    )?;
    let storage = load_component(
        &document.storage,
        base_dir,
        SchemaKind::Storage,
        constraints::check_storage,
    )?;

    let retriever = retriever.map(|mut config| {
        config.root = Some(match config.root.take() {
            Some(root) => base_dir.join(root),
            None => base_dir.to_path_buf(),
        });
        config
    });
    let storage = storage.map(|mut config| {
        config.root = base_dir.join(&config.root);
        config
    });

    let warnings = cross_document_warnings(&dataset, &quality);
    for warning in &warnings {
        warn!(pipeline = %document.name, "{warning}");
    }
    debug!(pipeline = %document.name, base_dir = %base_dir.display(), "Loaded pipeline configuration");

    Ok(ValidatedPipeline {
        document,
        base_dir: base_dir.to_path_buf(),
        retriever,
        dataset,
        quality,
        storage,
        warnings,
    })
}

fn parse_yaml(text: &str, origin: &Path) -> Result<Value, PipelineError> {
    serde_yaml::from_str::<Value>(text).map_err(|e| PipelineError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })
}

fn attach_document(error: SchemaError, path: Option<&Path>) -> SchemaError {
    match path {
        Some(path) => error.with_document(path),
        None => error,
    }
}

fn load_component<T: serde::de::DeserializeOwned>(
    component: &ComponentRef,
    base_dir: &Path,
    kind: SchemaKind,
    check: fn(&T) -> constraints::SchemaValidationResult,
) -> Result<Validated<T>, PipelineError> {
    match component {
        ComponentRef::Inline(value) => Ok(validate_as(value, kind, check)?),
        ComponentRef::Path(relative) => {
            let path = base_dir.join(relative);
            let text = std::fs::read_to_string(&path).map_err(|source| PipelineError::Read {
                path: path.clone(),
                source,
            })?;
            let value = parse_yaml(&text, &path)?;
            validate_as(&value, kind, check).map_err(|e| PipelineError::Schema(e.with_document(&path)))
        }
    }
}

/// Quality tests naming variables the dataset never declares. Not fatal:
/// the mismatch surfaces per unit as a quality failure.
fn cross_document_warnings(dataset: &DatasetConfig, quality: &QualityConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    for test in &quality.tests {
        for variable in &test.variables {
            if variable != ALL_VARIABLES && dataset.variable(variable).is_none() {
                warnings.push(format!(
                    "quality test '{}' targets '{}' which the dataset does not declare",
                    test.name, variable
                ));
            }
        }
        let dim = match &test.check {
            CheckKind::Monotonic { dim, .. } | CheckKind::Delta { dim, .. } => dim.as_ref(),
            _ => None,
        };
        if let Some(dim) = dim {
            if !dataset.coords.contains_key(dim) {
                warnings.push(format!(
                    "quality test '{}' runs along '{}' which is not a coordinate",
                    test.name, dim
                ));
            }
        }
    }
    warnings
}
