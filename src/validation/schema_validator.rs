//! Structural validation of configuration documents.
//!
//! A document is accepted in three passes: the JSON Schema for its kind
//! (required fields, types, enumerated values), deserialization into the typed
//! config, and the cross-field constraints in [`super::constraints`]. Only a
//! document passing all three becomes a [`Validated`] value, which the rest of
//! the crate takes as proof that its preconditions hold.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::OnceLock;

use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::constraints;
use crate::config::{DatasetConfig, PipelineDocument, QualityConfig, RetrieverConfig, StorageConfig};

/// The five document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Pipeline,
    Retriever,
    Dataset,
    Quality,
    Storage,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 5] = [
        SchemaKind::Pipeline,
        SchemaKind::Retriever,
        SchemaKind::Dataset,
        SchemaKind::Quality,
        SchemaKind::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Pipeline => "pipeline",
            SchemaKind::Retriever => "retriever",
            SchemaKind::Dataset => "dataset",
            SchemaKind::Quality => "quality",
            SchemaKind::Storage => "storage",
        }
    }

    /// Raw text of the JSON Schema shipped for this kind.
    pub fn schema_source(&self) -> &'static str {
        match self {
            SchemaKind::Pipeline => include_str!("../../schemas/pipeline.schema.json"),
            SchemaKind::Retriever => include_str!("../../schemas/retriever.schema.json"),
            SchemaKind::Dataset => include_str!("../../schemas/dataset.schema.json"),
            SchemaKind::Quality => include_str!("../../schemas/quality.schema.json"),
            SchemaKind::Storage => include_str!("../../schemas/storage.schema.json"),
        }
    }

    fn slot(&self) -> &'static OnceLock<Result<JSONSchema, String>> {
        static PIPELINE: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
        static RETRIEVER: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
        static DATASET: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
        static QUALITY: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
        static STORAGE: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
        match self {
            SchemaKind::Pipeline => &PIPELINE,
            SchemaKind::Retriever => &RETRIEVER,
            SchemaKind::Dataset => &DATASET,
            SchemaKind::Quality => &QUALITY,
            SchemaKind::Storage => &STORAGE,
        }
    }

    fn compiled(&self) -> Result<&'static JSONSchema, SchemaError> {
        let compiled = self.slot().get_or_init(|| {
            let schema: Value =
                serde_json::from_str(self.schema_source()).map_err(|e| e.to_string())?;
            JSONSchema::options()
                .compile(&schema)
                .map_err(|e| e.to_string())
        });
        compiled.as_ref().map_err(|message| {
            SchemaError::single(*self, "", format!("schema failed to compile: {message}"))
        })
    }
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Dotted field path, e.g. `sources[0].pattern`. Empty for the document root.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "(document): {}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// A document rejected by the validator. Fatal: no unit runs.
#[derive(Debug, Clone, Error)]
#[error("invalid {kind} configuration{}: {}", document_suffix(.document), join_violations(.violations))]
pub struct SchemaError {
    pub kind: SchemaKind,
    /// File the document was read from, when known.
    pub document: Option<PathBuf>,
    pub violations: Vec<FieldViolation>,
}

impl SchemaError {
    pub fn new(kind: SchemaKind, violations: Vec<FieldViolation>) -> Self {
        Self {
            kind,
            document: None,
            violations,
        }
    }

    pub fn single(kind: SchemaKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            kind,
            vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        )
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>) -> Self {
        self.document = Some(path.into());
        self
    }

    /// True if any violation is reported at `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn document_suffix(document: &Option<PathBuf>) -> String {
    document
        .as_ref()
        .map(|p| format!(" in '{}'", p.display()))
        .unwrap_or_default()
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A config that passed validation, with any non-fatal warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<T> {
    inner: T,
    warnings: Vec<String>,
}

impl<T> Validated<T> {
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Rewrites the inner value without revalidating. Only for path
    /// resolution and runtime overrides, which cannot break constraints.
    pub(crate) fn map(self, f: impl FnOnce(T) -> T) -> Self {
        Self {
            inner: f(self.inner),
            warnings: self.warnings,
        }
    }
}

impl<T> Deref for Validated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Result of [`validate`], tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedConfig {
    Pipeline(Validated<PipelineDocument>),
    Retriever(Validated<RetrieverConfig>),
    Dataset(Validated<DatasetConfig>),
    Quality(Validated<QualityConfig>),
    Storage(Validated<StorageConfig>),
}

impl ValidatedConfig {
    pub fn kind(&self) -> SchemaKind {
        match self {
            ValidatedConfig::Pipeline(_) => SchemaKind::Pipeline,
            ValidatedConfig::Retriever(_) => SchemaKind::Retriever,
            ValidatedConfig::Dataset(_) => SchemaKind::Dataset,
            ValidatedConfig::Quality(_) => SchemaKind::Quality,
            ValidatedConfig::Storage(_) => SchemaKind::Storage,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            ValidatedConfig::Pipeline(v) => v.warnings(),
            ValidatedConfig::Retriever(v) => v.warnings(),
            ValidatedConfig::Dataset(v) => v.warnings(),
            ValidatedConfig::Quality(v) => v.warnings(),
            ValidatedConfig::Storage(v) => v.warnings(),
        }
    }
}

/// Validates `document` as a `kind` document.
pub fn validate(document: &Value, kind: SchemaKind) -> Result<ValidatedConfig, SchemaError> {
    Ok(match kind {
        SchemaKind::Pipeline => ValidatedConfig::Pipeline(validate_as(
            document,
            kind,
            constraints::check_pipeline,
        )?),
        SchemaKind::Retriever => ValidatedConfig::Retriever(validate_as(
            document,
            kind,
            constraints::check_retriever,
        )?),
        SchemaKind::Dataset => ValidatedConfig::Dataset(validate_as(
            document,
            kind,
            constraints::check_dataset,
        )?),
        SchemaKind::Quality => ValidatedConfig::Quality(validate_as(
            document,
            kind,
            constraints::check_quality,
        )?),
        SchemaKind::Storage => ValidatedConfig::Storage(validate_as(
            document,
            kind,
            constraints::check_storage,
        )?),
    })
}

/// Typed form of [`validate`] used by the loader.
pub fn validate_as<T: DeserializeOwned>(
    document: &Value,
    kind: SchemaKind,
    check: fn(&T) -> constraints::SchemaValidationResult,
) -> Result<Validated<T>, SchemaError> {
    let violations = structural_violations(document, kind)?;
    if !violations.is_empty() {
        return Err(SchemaError::new(kind, violations));
    }

    let typed: T = serde_json::from_value(document.clone())
        .map_err(|e| SchemaError::single(kind, "", e.to_string()))?;

    let result = check(&typed);
    if !result.valid {
        return Err(SchemaError::new(kind, result.errors));
    }

    Ok(Validated {
        inner: typed,
        warnings: result.warnings,
    })
}

fn structural_violations(
    document: &Value,
    kind: SchemaKind,
) -> Result<Vec<FieldViolation>, SchemaError> {
    let schema = kind.compiled()?;
    let violations = match schema.validate(document) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| {
                let mut field = pointer_to_field(&error.instance_path.to_string());
                // A missing property is reported on its parent object.
                if let ValidationErrorKind::Required { property } = &error.kind {
                    if let Some(name) = property.as_str() {
                        if !field.is_empty() {
                            field.push('.');
                        }
                        field.push_str(name);
                    }
                }
                FieldViolation {
                    field,
                    message: error.to_string(),
                }
            })
            .collect(),
    };
    Ok(violations)
}

/// `/sources/0/pattern` becomes `sources[0].pattern`.
pub(crate) fn pointer_to_field(pointer: &str) -> String {
    let mut field = String::new();
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.chars().all(|c| c.is_ascii_digit()) {
            field.push('[');
            field.push_str(&segment);
            field.push(']');
        } else {
            if !field.is_empty() {
                field.push('.');
            }
            field.push_str(&segment);
        }
    }
    field
}
