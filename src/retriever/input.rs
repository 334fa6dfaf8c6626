//! Discovery of input units.
//!
//! Files under the retriever root are matched against each source's pattern
//! and grouped into units by key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{Grouping, RetrieverConfig};
use crate::error::RetrievalError;

/// Key of the unit reported when no file matched at all.
pub const UNMATCHED_UNIT: &str = "unmatched";

/// One logical unit of input: the files each source contributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReference {
    pub key: String,
    /// Source name to matched files, sorted.
    pub files: BTreeMap<String, Vec<PathBuf>>,
}

impl InputReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            files: BTreeMap::new(),
        }
    }

    /// Placeholder unit for a discovery that found nothing.
    pub fn unmatched() -> Self {
        Self::new(UNMATCHED_UNIT)
    }

    pub fn with_file(mut self, source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.add_file(source, path);
        self
    }

    pub fn add_file(&mut self, source: impl Into<String>, path: impl Into<PathBuf>) {
        let files = self.files.entry(source.into()).or_default();
        files.push(path.into());
        files.sort();
    }

    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.file_count() == 0
    }

    pub fn all_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.values().flatten()
    }
}

/// Compiled source patterns and unit key.
pub struct SourceMatcher {
    patterns: Vec<(String, Regex)>,
    unit_key: Option<Regex>,
    grouping: Grouping,
}

impl SourceMatcher {
    pub fn new(config: &RetrieverConfig) -> Result<Self, RetrievalError> {
        let patterns = config
            .sources
            .iter()
            .map(|source| {
                let anchored = format!("^(?:{})$", source.pattern);
                Regex::new(&anchored)
                    .map(|re| (source.name.clone(), re))
                    .map_err(|e| RetrievalError::Pattern {
                        pattern: source.pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let unit_key = config
            .unit_key
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| RetrievalError::Pattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            patterns,
            unit_key,
            grouping: config.grouping,
        })
    }

    /// First source whose pattern matches the root-relative path.
    pub fn source_for(&self, relative: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(relative))
            .map(|(name, _)| name.as_str())
    }

    /// Unit key for a matched file.
    pub fn key_for(&self, path: &Path, batch_key: &str) -> String {
        if self.grouping == Grouping::Batch {
            return batch_key.to_string();
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(re) = &self.unit_key {
            if let Some(key) = re.captures(&file_name).and_then(|c| c.name("key")) {
                return key.as_str().to_string();
            }
        }
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(file_name)
    }
}

/// Walks `root` and groups every matched file into units.
///
/// Never returns an empty list: when nothing matches, a single
/// [`UNMATCHED_UNIT`] is returned so the failure shows up in the run summary.
pub fn discover_units(
    config: &RetrieverConfig,
    root: &Path,
    batch_key: &str,
) -> Result<Vec<InputReference>, RetrievalError> {
    let matcher = SourceMatcher::new(config)?;
    let mut units: BTreeMap<String, InputReference> = BTreeMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable path during discovery");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        if let Some(source) = matcher.source_for(&relative) {
            let key = matcher.key_for(entry.path(), batch_key);
            debug!(file = %relative, source, unit = %key, "Matched input file");
            units
                .entry(key.clone())
                .or_insert_with(|| InputReference::new(key))
                .add_file(source, entry.path());
        }
    }

    if units.is_empty() {
        warn!(root = %root.display(), "No input files matched any source pattern");
        return Ok(vec![InputReference::unmatched()]);
    }
    Ok(units.into_values().collect())
}

/// Groups explicitly named files into units, as discovery would.
pub fn classify_files(
    config: &RetrieverConfig,
    root: &Path,
    files: &[PathBuf],
    batch_key: &str,
) -> Result<Vec<InputReference>, RetrievalError> {
    let matcher = SourceMatcher::new(config)?;
    let mut units: BTreeMap<String, InputReference> = BTreeMap::new();

    for file in files {
        let relative = relative_path(root, file).unwrap_or_else(|| file.to_string_lossy().replace('\\', "/"));
        let source = matcher
            .source_for(&relative)
            .ok_or_else(|| RetrievalError::UnknownInput { path: file.clone() })?;
        let key = matcher.key_for(file, batch_key);
        units
            .entry(key.clone())
            .or_insert_with(|| InputReference::new(key))
            .add_file(source, file);
    }

    if units.is_empty() {
        return Ok(vec![InputReference::unmatched()]);
    }
    Ok(units.into_values().collect())
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
