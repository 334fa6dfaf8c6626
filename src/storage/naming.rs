//! Output naming templates.
//!
//! A template is literal text with `{token}` placeholders:
//! `{start[:fmt]}` and `{end[:fmt]}` bind the first and last timestamp of the
//! time coordinate, `{ext}` the format's file extension, and any other
//! `{name}` the dataset attribute of that name.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::StorageConfig;
use crate::dataset::Dataset;
use crate::error::StorageError;

pub const DEFAULT_TIME_FORMAT: &str = "%Y%m%d.%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Attr(String),
    Start(Option<String>),
    End(Option<String>),
    Ext,
}

/// Splits `template` into literal text and tokens.
pub fn parse_template(template: &str) -> Result<Vec<TemplatePart>, String> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut token = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err("nested '{' inside a token".to_string()),
                        c => token.push(c),
                    }
                }
                if !closed {
                    return Err(format!("unclosed token '{{{token}'"));
                }
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(parse_token(&token)?);
            }
            '}' => return Err("unmatched '}'".to_string()),
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

fn parse_token(token: &str) -> Result<TemplatePart, String> {
    let (name, format) = match token.split_once(':') {
        Some((name, format)) => (name.trim(), Some(format.to_string())),
        None => (token.trim(), None),
    };
    match (name, format) {
        ("start", format) => Ok(TemplatePart::Start(format)),
        ("end", format) => Ok(TemplatePart::End(format)),
        ("ext", None) => Ok(TemplatePart::Ext),
        ("", _) => Err("empty token '{}'".to_string()),
        (name, Some(_)) => Err(format!("token '{name}' does not take a format")),
        (name, None) => {
            if name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                Ok(TemplatePart::Attr(name.to_string()))
            } else {
                Err(format!("invalid attribute name '{name}'"))
            }
        }
    }
}

/// Converts epoch seconds into a UTC timestamp.
pub fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Renders `template` against `dataset`.
pub fn render(template: &str, dataset: &Dataset, config: &StorageConfig) -> Result<String, StorageError> {
    let parts = parse_template(template).map_err(|message| StorageError::Template {
        template: template.to_string(),
        message,
    })?;

    let missing_time = || StorageError::MissingTimeCoordinate(config.time_coordinate.clone());
    let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    let mut time_bounds = || -> Result<(DateTime<Utc>, DateTime<Utc>), StorageError> {
        if let Some(bounds) = bounds {
            return Ok(bounds);
        }
        let (start, end) = dataset
            .time_bounds(&config.time_coordinate)
            .ok_or_else(missing_time)?;
        let resolved = (
            epoch_to_datetime(start).ok_or_else(missing_time)?,
            epoch_to_datetime(end).ok_or_else(missing_time)?,
        );
        bounds = Some(resolved);
        Ok(resolved)
    };

    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(&text),
            TemplatePart::Ext => out.push_str(config.format.extension()),
            TemplatePart::Attr(name) => {
                let value = dataset
                    .attr_string(&name)
                    .ok_or(StorageError::MissingAttribute(name))?;
                out.push_str(&value);
            }
            TemplatePart::Start(format) => {
                let (start, _) = time_bounds()?;
                let format = format.as_deref().unwrap_or(DEFAULT_TIME_FORMAT);
                out.push_str(&start.format(format).to_string());
            }
            TemplatePart::End(format) => {
                let (_, end) = time_bounds()?;
                let format = format.as_deref().unwrap_or(DEFAULT_TIME_FORMAT);
                out.push_str(&end.format(format).to_string());
            }
        }
    }
    Ok(out)
}

/// Full destination of `dataset` under the configured root.
pub fn output_path(config: &StorageConfig, dataset: &Dataset) -> Result<PathBuf, StorageError> {
    let dir = render(&config.path_template, dataset, config)?;
    let file = render(&config.filename_template, dataset, config)?;
    Ok(config.root.join(dir).join(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::dataset::{DataType, Variable};
    use ndarray::arr1;
    use serde_json::json;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.attrs.insert("datastream".to_string(), json!("sgp.met.a1"));
        ds.attrs.insert("version".to_string(), json!(2));
        ds.coords.insert(
            "time".to_string(),
            Variable::new(
                "time",
                vec!["time".to_string()],
                DataType::Float64,
                // 2024-01-02T03:04:05Z and one hour later
                arr1(&[1_704_164_645.0, f64::NAN, 1_704_168_245.0]).into_dyn(),
            ),
        );
        ds
    }

    #[test]
    fn test_parse_template() {
        let parts = parse_template("{datastream}.{start:%Y}.{ext}").expect("parse");
        assert_eq!(
            parts,
            vec![
                TemplatePart::Attr("datastream".to_string()),
                TemplatePart::Literal(".".to_string()),
                TemplatePart::Start(Some("%Y".to_string())),
                TemplatePart::Literal(".".to_string()),
                TemplatePart::Ext,
            ]
        );
        assert!(parse_template("{datastream").is_err());
        assert!(parse_template("data}").is_err());
        assert!(parse_template("{}").is_err());
        assert!(parse_template("{ext:%Y}").is_err());
        assert!(parse_template("{a b}").is_err());
    }

    #[test]
    fn test_default_layout() {
        let config = StorageConfig::new("/out");
        let path = output_path(&config, &dataset()).expect("path");
        assert_eq!(
            path,
            PathBuf::from("/out/data/sgp.met.a1/sgp.met.a1.20240102.030405.json")
        );
    }

    #[test]
    fn test_end_token_and_numeric_attr() {
        let mut config = StorageConfig::new("/out").with_format(OutputFormat::Parquet);
        config.filename_template = "v{version}-{end:%H%M}.{ext}".to_string();
        let name = render(&config.filename_template, &dataset(), &config).expect("render");
        assert_eq!(name, "v2-0404.parquet");
    }

    #[test]
    fn test_missing_attribute_and_time() {
        let mut config = StorageConfig::new("/out");
        config.path_template = "{site}".to_string();
        let err = output_path(&config, &dataset()).expect_err("attr");
        assert!(matches!(err, StorageError::MissingAttribute(ref a) if a == "site"));

        let mut ds = dataset();
        ds.coords.clear();
        let err = output_path(&StorageConfig::new("/out"), &ds).expect_err("time");
        assert!(matches!(err, StorageError::MissingTimeCoordinate(_)));
    }

    #[test]
    fn test_epoch_to_datetime() {
        let dt = epoch_to_datetime(0.5).expect("dt");
        assert_eq!(dt.timestamp_millis(), 500);
        assert!(epoch_to_datetime(f64::NAN).is_none());
    }
}
