//! Cross-field constraints that a JSON Schema cannot express.

use std::collections::{BTreeSet, HashSet};

use chrono::format::{Item, StrftimeItems};
use regex::Regex;

use super::schema_validator::FieldViolation;
use crate::config::{
    CheckKind, ConversionRule, DatasetConfig, ParserConfig, PipelineDocument, QualityConfig,
    RetrieverConfig, StorageConfig, ALL_VARIABLES,
};
use crate::config::retriever::Compression;
use crate::dataset::flags::{bit_mask, describe};
use crate::storage::naming::{parse_template, TemplatePart};

/// Outcome of the constraint pass for one document.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidationResult {
    /// Whether the document passes all required checks.
    pub valid: bool,
    pub errors: Vec<FieldViolation>,
    /// Suspicious but allowed.
    pub warnings: Vec<String>,
}

impl SchemaValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
        self.valid = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Identifiers used in file names: letters, digits, `-` and `_`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// True if `format` is a chrono format string without invalid specifiers.
pub fn is_valid_time_format(format: &str) -> bool {
    !format.is_empty() && StrftimeItems::new(format).all(|item| !matches!(item, Item::Error))
}

pub fn check_pipeline(doc: &PipelineDocument) -> SchemaValidationResult {
    let mut result = SchemaValidationResult::valid();

    if !is_valid_id(&doc.name) {
        result.add_error(
            "name",
            "must contain only alphanumeric characters, hyphens, and underscores",
        );
    }

    if doc.settings.workers == Some(0) {
        result.add_error("settings.workers", "must be at least 1");
    }

    result
}

pub fn check_retriever(config: &RetrieverConfig) -> SchemaValidationResult {
    let mut result = SchemaValidationResult::valid();
    let mut names = HashSet::new();

    for (i, source) in config.sources.iter().enumerate() {
        let field = format!("sources[{i}]");
        if !names.insert(source.name.as_str()) {
            result.add_error(
                format!("{field}.name"),
                format!("duplicate source name '{}'", source.name),
            );
        }

        if let Err(e) = Regex::new(&source.pattern) {
            result.add_error(format!("{field}.pattern"), format!("invalid regex: {e}"));
        }

        if matches!(source.parser, ParserConfig::Parquet) && source.compression == Compression::Gzip
        {
            result.add_error(
                format!("{field}.compression"),
                "parquet sources cannot be gzip-compressed",
            );
        }

        let mut targets = HashSet::new();
        for (from, to) in &source.rename {
            if !targets.insert(to.as_str()) {
                result.add_error(
                    format!("{field}.rename.{from}"),
                    format!("more than one variable renamed to '{to}'"),
                );
            }
        }

        if let ParserConfig::Csv(options) = &source.parser {
            if options.delimiter.len() != 1 {
                result.add_error(
                    format!("{field}.parser.delimiter"),
                    "must be a single ASCII character",
                );
            }
            if let Some(comment) = &options.comment {
                if comment.len() != 1 {
                    result.add_error(
                        format!("{field}.parser.comment"),
                        "must be a single ASCII character",
                    );
                }
            }
            for (column, format) in &options.time_columns {
                if !is_valid_time_format(format) {
                    result.add_error(
                        format!("{field}.parser.time_columns.{column}"),
                        format!("invalid time format '{format}'"),
                    );
                }
            }
        }
    }

    if let Some(unit_key) = &config.unit_key {
        match Regex::new(unit_key) {
            Ok(re) => {
                if !re.capture_names().flatten().any(|n| n == "key") {
                    result.add_error("unit_key", "must contain a named group 'key'");
                }
            }
            Err(e) => result.add_error("unit_key", format!("invalid regex: {e}")),
        }
    }

    if config.timeout_seconds == Some(0) {
        result.add_error("timeout_seconds", "must be at least 1");
    }

    result
}

pub fn check_dataset(config: &DatasetConfig) -> SchemaValidationResult {
    let mut result = SchemaValidationResult::valid();

    for (name, coord) in &config.coords {
        let field = format!("coords.{name}");
        if coord.dims != [name.clone()] {
            result.add_error(
                format!("{field}.dims"),
                format!("a coordinate must have exactly one dimension named '{name}'"),
            );
        }
        if coord.data.is_some() && coord.source.is_some() {
            result.add_error(&field, "declare either 'data' or 'source', not both");
        }
        if config.data_vars.contains_key(name) {
            result.add_error(
                &field,
                format!("'{name}' is declared both as a coordinate and as a data variable"),
            );
        }
    }

    for (name, var) in &config.data_vars {
        let field = format!("data_vars.{name}");
        let mut seen = HashSet::new();
        for (i, dim) in var.dims.iter().enumerate() {
            if !config.coords.contains_key(dim) {
                result.add_error(
                    format!("{field}.dims[{i}]"),
                    format!("dimension '{dim}' is not a declared coordinate"),
                );
            }
            if !seen.insert(dim) {
                result.add_error(
                    format!("{field}.dims[{i}]"),
                    format!("dimension '{dim}' repeated"),
                );
            }
        }
        if var.data.is_some() {
            result.add_error(
                format!("{field}.data"),
                "literal data is only allowed on coordinates",
            );
        }
        if !var.dtype.can_represent(var.effective_fill()) {
            result.add_error(
                format!("{field}.fill_value"),
                format!(
                    "fill value {} is not representable as {}",
                    var.effective_fill(),
                    var.dtype
                ),
            );
        }
    }

    for (field, var) in config
        .coords
        .iter()
        .map(|(n, v)| (format!("coords.{n}"), v))
        .chain(config.data_vars.iter().map(|(n, v)| (format!("data_vars.{n}"), v)))
    {
        if let Some([min, max]) = var.source.as_ref().and_then(|s| s.valid_range) {
            if min > max {
                result.add_error(
                    format!("{field}.source.valid_range"),
                    format!("min ({min}) must be <= max ({max})"),
                );
            }
        }
    }

    let mut pairs = HashSet::new();
    for (i, conversion) in config.conversions.iter().enumerate() {
        let field = format!("conversions[{i}]");
        if conversion.from == conversion.to {
            result.add_error(&field, "'from' and 'to' units are identical");
        }
        if !pairs.insert((conversion.from.as_str(), conversion.to.as_str())) {
            result.add_error(
                &field,
                format!(
                    "duplicate conversion from '{}' to '{}'",
                    conversion.from, conversion.to
                ),
            );
        }
        match &conversion.rule {
            ConversionRule::Linear { scale, .. } => {
                if *scale == 0.0 || !scale.is_finite() {
                    result.add_error(format!("{field}.rule.scale"), "must be finite and non-zero");
                }
            }
            ConversionRule::Table { points } => {
                if points.len() < 2 {
                    result.add_error(format!("{field}.rule.points"), "needs at least 2 points");
                }
                if points.windows(2).any(|w| w[1][0] <= w[0][0]) {
                    result.add_error(
                        format!("{field}.rule.points"),
                        "source values must be strictly increasing",
                    );
                }
            }
        }
    }

    if let Some(value) = config.attrs.get("datastream") {
        if !value.is_string() {
            result.add_error("attrs.datastream", "must be a string");
        }
    } else if !["location_id", "dataset_name", "data_level"]
        .iter()
        .all(|key| config.attrs.contains_key(*key))
    {
        result.add_warning(
            "dataset has no 'datastream' attribute and no location_id/dataset_name/data_level to derive one",
        );
    }

    result
}

pub fn check_quality(config: &QualityConfig) -> SchemaValidationResult {
    let mut result = SchemaValidationResult::valid();
    let mut names = HashSet::new();

    for (i, test) in config.tests.iter().enumerate() {
        let field = format!("tests[{i}]");
        if !names.insert(test.name.as_str()) {
            result.add_error(
                format!("{field}.name"),
                format!("duplicate test name '{}'", test.name),
            );
        }

        if test.targets_all() && test.variables.len() > 1 {
            result.add_error(
                format!("{field}.variables"),
                format!("'{ALL_VARIABLES}' cannot be combined with other names"),
            );
        }
        let unique: BTreeSet<_> = test.variables.iter().collect();
        if unique.len() != test.variables.len() {
            result.add_error(format!("{field}.variables"), "variable listed twice");
        }
        if !test.exclude.is_empty() && !test.targets_all() {
            result.add_warning(format!(
                "test '{}' has 'exclude' but does not target {ALL_VARIABLES}",
                test.name
            ));
        }

        match &test.check {
            CheckKind::Range { min, max } => match (min, max) {
                (None, None) => {
                    result.add_error(format!("{field}.check"), "range needs 'min' or 'max'")
                }
                (Some(lo), Some(hi)) if lo > hi => result.add_error(
                    format!("{field}.check"),
                    format!("min ({lo}) must be <= max ({hi})"),
                ),
                _ => {}
            },
            CheckKind::Delta { max_delta, .. } => {
                if !max_delta.is_finite() || *max_delta < 0.0 {
                    result.add_error(
                        format!("{field}.check.max_delta"),
                        "must be a non-negative number",
                    );
                }
            }
            CheckKind::ValidRange | CheckKind::Missing | CheckKind::Monotonic { .. } => {}
        }

        if let Some(bit) = test.bit {
            if !(1..=32).contains(&bit) {
                result.add_error(format!("{field}.bit"), "must be between 1 and 32");
            } else if let Some(builtin) = builtin_flag_name(bit_mask(bit)) {
                if bit_mask(bit) != test.check.default_flag() {
                    result.add_warning(format!(
                        "test '{}' uses bit {bit}, which is the built-in '{builtin}' flag",
                        test.name
                    ));
                }
            }
        }
    }

    result
}

/// Name of the built-in flag occupying `mask`, if any.
fn builtin_flag_name(mask: u32) -> Option<&'static str> {
    describe(mask).first().copied()
}

pub fn check_storage(config: &StorageConfig) -> SchemaValidationResult {
    let mut result = SchemaValidationResult::valid();

    for (field, template) in [
        ("path_template", &config.path_template),
        ("filename_template", &config.filename_template),
    ] {
        match parse_template(template) {
            Ok(parts) => {
                for part in parts {
                    if let TemplatePart::Start(Some(format)) | TemplatePart::End(Some(format)) =
                        &part
                    {
                        if !is_valid_time_format(format) {
                            result.add_error(field, format!("invalid time format '{format}'"));
                        }
                    }
                }
            }
            Err(message) => result.add_error(field, message),
        }
    }

    if config.filename_template.contains('/') {
        result.add_error("filename_template", "must not contain '/'");
    }

    if config.timeout_seconds == Some(0) {
        result.add_error("timeout_seconds", "must be at least 1");
    }

    result
}
