//! Runtime settings for a pipeline run.
//!
//! Settings start from the pipeline document's `settings` block and can be
//! overridden from the environment and then from the command line.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::SettingsDocument;

pub const WORKERS_ENV: &str = "TSFORGE_WORKERS";
pub const STORAGE_ROOT_ENV: &str = "TSFORGE_STORAGE_ROOT";
pub const OVERWRITE_ENV: &str = "TSFORGE_OVERWRITE";

/// Errors in runtime settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Settings validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Units processed concurrently.
    pub workers: usize,
    /// Replaces the storage document's `root` when set.
    pub storage_root: Option<PathBuf>,
    /// Replaces the storage document's `overwrite` when set.
    pub overwrite: Option<bool>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            storage_root: None,
            overwrite: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings declared in the pipeline document.
    pub fn from_document(settings: &SettingsDocument) -> Self {
        let mut runtime = Self::default();
        if let Some(workers) = settings.workers {
            runtime.workers = workers;
        }
        runtime
    }

    /// Applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `TSFORGE_WORKERS`: units processed concurrently
    /// - `TSFORGE_STORAGE_ROOT`: storage root replacing the configured one
    /// - `TSFORGE_OVERWRITE`: overwrite policy (`true`/`false`, `1`/`0`, ...)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result
    /// does not validate.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(val) = lookup(WORKERS_ENV) {
            self.workers = parse_env_value(&val, WORKERS_ENV)?;
        }
        if let Some(val) = lookup(STORAGE_ROOT_ENV) {
            if !val.trim().is_empty() {
                self.storage_root = Some(PathBuf::from(val));
            }
        }
        if let Some(val) = lookup(OVERWRITE_ENV) {
            self.overwrite = Some(parse_env_bool(&val, OVERWRITE_ENV)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self
            .storage_root
            .as_ref()
            .is_some_and(|root| root.as_os_str().is_empty())
        {
            return Err(ConfigError::ValidationFailed(
                "storage_root cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = Some(overwrite);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
