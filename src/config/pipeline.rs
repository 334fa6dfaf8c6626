//! Top-level pipeline document.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A sub-document given either as a path or inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentRef {
    /// Relative to the directory of the pipeline document.
    Path(PathBuf),
    Inline(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub retriever: ComponentRef,
    pub dataset: ComponentRef,
    pub quality: ComponentRef,
    pub storage: ComponentRef,
    #[serde(default)]
    pub settings: SettingsDocument,
}

/// Runtime knobs declared in the pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    pub workers: Option<usize>,
}
