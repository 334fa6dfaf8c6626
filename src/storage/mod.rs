//! Storage of standardized datasets.
//!
//! Datasets are written under the configured root at a location rendered
//! from the naming templates. Every write goes to a temporary file in the
//! destination directory first and is renamed into place, so a reader never
//! sees a partial output and an existing output is only replaced when the
//! overwrite policy allows it.

pub mod json_format;
pub mod naming;
pub mod parquet_format;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{OutputFormat, StorageConfig};
use crate::dataset::{Dataset, Provenance};
use crate::error::StorageError;

pub const ANCILLARY_DIR: &str = "ancillary";

/// Where a dataset was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// SHA-256 of the written file, hex encoded.
    pub checksum: String,
    pub bytes: u64,
}

/// A dataset read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDataset {
    pub path: PathBuf,
    pub dataset: Dataset,
    pub provenance: Option<Provenance>,
}

/// Writes datasets according to one storage configuration.
pub struct StorageHandler<'a> {
    config: &'a StorageConfig,
    provenance: Option<Provenance>,
    deadline: Option<Instant>,
}

impl<'a> StorageHandler<'a> {
    pub fn new(config: &'a StorageConfig) -> Self {
        Self {
            config,
            provenance: None,
            deadline: None,
        }
    }

    /// Provenance written next to the data.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Writes finishing after `deadline` are rolled back instead of renamed
    /// into place.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn store(&self, dataset: &Dataset) -> Result<StoredLocation, StorageError> {
        let path = naming::output_path(self.config, dataset)?;
        if !self.config.overwrite && path.exists() {
            return Err(StorageError::AlreadyExists(path));
        }

        let bytes = match self.config.format {
            OutputFormat::Json => json_format::encode(dataset, self.provenance.as_ref())?,
            OutputFormat::Parquet => parquet_format::encode(dataset, self.provenance.as_ref())?,
        };

        write_atomically(&path, self.config, self.deadline, |file| file.write_all(&bytes))?;

        let location = StoredLocation {
            checksum: hex::encode(Sha256::digest(&bytes)),
            bytes: bytes.len() as u64,
            format: self.config.format,
            path,
        };
        info!(
            path = %location.path.display(),
            format = %location.format,
            bytes = location.bytes,
            "Stored dataset"
        );
        Ok(location)
    }
}

/// Stores `dataset` without provenance or deadline.
pub fn store(config: &StorageConfig, dataset: &Dataset) -> Result<StoredLocation, StorageError> {
    StorageHandler::new(config).store(dataset)
}

/// Writes through a temporary file in the destination directory and renames
/// it onto `path`.
fn write_atomically(
    path: &Path,
    config: &StorageConfig,
    deadline: Option<Instant>,
    write: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::io(path, std::io::Error::other("destination has no parent directory")))?;
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    write(tmp.as_file_mut()).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StorageError::io(tmp.path(), e))?;

    if deadline.is_some_and(|d| Instant::now() > d) {
        debug!(path = %path.display(), "Deadline passed, discarding temporary output");
        return Err(StorageError::Timeout {
            seconds: config.timeout_seconds.unwrap_or_default(),
        });
    }

    let persisted = if config.overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists(path.to_path_buf())
        } else {
            StorageError::io(path, e.error)
        }
    })?;
    Ok(())
}

/// Reads a stored dataset, picking the format from the file extension.
pub fn read_stored(path: &Path) -> Result<StoredDataset, StorageError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let (dataset, provenance) = match OutputFormat::from_extension(ext) {
        Some(OutputFormat::Json) => {
            let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
            json_format::decode(&bytes, path)?
        }
        Some(OutputFormat::Parquet) => parquet_format::decode(path)?,
        None => {
            return Err(StorageError::Unsupported {
                format: ext.to_string(),
                message: format!("reading '{}'", path.display()),
            })
        }
    };
    Ok(StoredDataset {
        path: path.to_path_buf(),
        dataset,
        provenance,
    })
}

/// Stored datasets of `datastream` whose time coordinate overlaps
/// `[start, end]`, ordered by their first timestamp.
pub fn fetch_data(
    config: &StorageConfig,
    datastream: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<StoredDataset>, StorageError> {
    let (start, end) = (start.timestamp() as f64, end.timestamp() as f64);

    // Narrow the search to the datastream's directory when the path template
    // only needs the datastream name.
    let mut lookup = Dataset::new();
    lookup.attrs.insert("datastream".to_string(), datastream.into());
    let dir = match naming::render(&config.path_template, &lookup, config) {
        Ok(relative) => config.root.join(relative),
        Err(_) => config.root.clone(),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let ancillary = config.root.join(ANCILLARY_DIR);
    let mut found = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
            StorageError::io(&path, std::io::Error::other(e.to_string()))
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.starts_with(&ancillary) {
            continue;
        }
        let known = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(OutputFormat::from_extension)
            .is_some();
        if !known {
            continue;
        }

        let stored = read_stored(path)?;
        if stored.dataset.datastream().as_deref() != Some(datastream) {
            continue;
        }
        match stored.dataset.time_bounds(&config.time_coordinate) {
            Some((lo, hi)) if lo <= end && hi >= start => found.push((lo, stored)),
            _ => {}
        }
    }

    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    debug!(datastream, matches = found.len(), "Fetched stored datasets");
    Ok(found.into_iter().map(|(_, stored)| stored).collect())
}

/// Copies a non-dataset file under `<root>/ancillary/<datastream>/`.
pub fn store_ancillary(
    config: &StorageConfig,
    source: &Path,
    datastream: &str,
) -> Result<PathBuf, StorageError> {
    let name = source
        .file_name()
        .ok_or_else(|| StorageError::io(source, std::io::Error::other("not a file path")))?;
    let dest = config.root.join(ANCILLARY_DIR).join(datastream).join(name);
    if !config.overwrite && dest.exists() {
        return Err(StorageError::AlreadyExists(dest));
    }

    let mut input = File::open(source).map_err(|e| StorageError::io(source, e))?;
    write_atomically(&dest, config, None, |file| {
        std::io::copy(&mut input, file).map(|_| ())
    })?;
    info!(source = %source.display(), path = %dest.display(), "Stored ancillary file");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Variable};
    use ndarray::arr1;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn dataset(start: f64) -> Dataset {
        let mut ds = Dataset::new();
        ds.attrs.insert("datastream".to_string(), json!("sgp.met.a1"));
        ds.coords.insert(
            "time".to_string(),
            Variable::new(
                "time",
                vec!["time".to_string()],
                DataType::Float64,
                arr1(&[start, start + 60.0]).into_dyn(),
            ),
        );
        ds.data_vars.insert(
            "temperature".to_string(),
            Variable::new(
                "temperature",
                vec!["time".to_string()],
                DataType::Float32,
                arr1(&[10.0, 11.0]).into_dyn(),
            )
            .with_attr("units", "degC"),
        );
        ds
    }

    #[test]
    fn test_store_and_read_back() {
        let dir = TempDir::new().expect("tempdir");
        for format in [OutputFormat::Json, OutputFormat::Parquet] {
            let config = StorageConfig::new(dir.path()).with_format(format);
            let ds = dataset(0.0);
            let location = store(&config, &ds).expect("store");

            assert_eq!(
                location.path,
                dir.path()
                    .join(format!("data/sgp.met.a1/sgp.met.a1.19700101.000000.{}", format.extension()))
            );
            assert_eq!(location.checksum.len(), 64);
            let on_disk = fs::read(&location.path).expect("read");
            assert_eq!(on_disk.len() as u64, location.bytes);
            assert_eq!(hex::encode(Sha256::digest(&on_disk)), location.checksum);

            let back = read_stored(&location.path).expect("read back");
            assert_eq!(back.dataset, ds);
        }
    }

    #[test]
    fn test_overwrite_policy() {
        let dir = TempDir::new().expect("tempdir");
        let config = StorageConfig::new(dir.path());
        let first = store(&config, &dataset(0.0)).expect("first");

        let mut changed = dataset(0.0);
        changed.attrs.insert("title".to_string(), json!("second"));
        let err = store(&config, &changed).expect_err("exists");
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        let kept = read_stored(&first.path).expect("read");
        assert!(!kept.dataset.attrs.contains_key("title"));

        let config = config.with_overwrite(true);
        store(&config, &changed).expect("overwrite");
        let replaced = read_stored(&first.path).expect("read");
        assert_eq!(replaced.dataset.attr_string("title").as_deref(), Some("second"));
    }

    #[test]
    fn test_deadline_rolls_back() {
        let dir = TempDir::new().expect("tempdir");
        let config = StorageConfig::new(dir.path());
        let past = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        std::thread::sleep(Duration::from_millis(5));
        let err = StorageHandler::new(&config)
            .with_deadline(past)
            .store(&dataset(0.0))
            .expect_err("late");
        assert!(matches!(err, StorageError::Timeout { .. }));

        let out_dir = dir.path().join("data/sgp.met.a1");
        let leftovers = fs::read_dir(&out_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_fetch_data_window() {
        let dir = TempDir::new().expect("tempdir");
        let config = StorageConfig::new(dir.path());
        store(&config, &dataset(0.0)).expect("day 1");
        store(&config, &dataset(86_400.0)).expect("day 2");
        store(&config, &dataset(2.0 * 86_400.0)).expect("day 3");

        let at = |secs: i64| DateTime::from_timestamp(secs, 0).expect("timestamp");
        let hits = fetch_data(&config, "sgp.met.a1", at(80_000), at(90_000)).expect("fetch");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dataset.time_bounds("time"), Some((86_400.0, 86_460.0)));

        let hits = fetch_data(&config, "sgp.met.a1", at(0), at(200_000)).expect("fetch");
        assert_eq!(hits.len(), 3);
        assert!(fetch_data(&config, "nsa.met.a1", at(0), at(200_000)).expect("fetch").is_empty());
    }

    #[test]
    fn test_store_ancillary() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("notes.txt");
        fs::write(&source, "calibrated 2024-01-01").expect("write");
        let config = StorageConfig::new(dir.path().join("root"));

        let dest = store_ancillary(&config, &source, "sgp.met.a1").expect("copy");
        assert_eq!(dest, dir.path().join("root/ancillary/sgp.met.a1/notes.txt"));
        assert_eq!(fs::read_to_string(&dest).expect("read"), "calibrated 2024-01-01");
        assert!(matches!(
            store_ancillary(&config, &source, "sgp.met.a1"),
            Err(StorageError::AlreadyExists(_))
        ));
    }
}
