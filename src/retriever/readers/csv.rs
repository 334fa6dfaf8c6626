//! Delimited text sources.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use super::{read_text, SourceReader};
use crate::config::{Compression, CsvOptions};
use crate::dataset::{RawDataset, RawVariable};
use crate::error::RetrievalError;

/// Units attached to columns parsed as timestamps.
pub const EPOCH_UNITS: &str = "seconds since 1970-01-01 00:00:00";

pub struct CsvReader<'a> {
    options: &'a CsvOptions,
    compression: Compression,
}

impl<'a> CsvReader<'a> {
    pub fn new(options: &'a CsvOptions, compression: Compression) -> Self {
        Self {
            options,
            compression,
        }
    }

    fn is_null(&self, cell: &str) -> bool {
        self.options.null_values.iter().any(|n| n == cell)
    }

    /// Parses one column. `Ok(None)` means no cell in the column is numeric
    /// and it is left out of the raw dataset. A column mixing numbers with
    /// unparsable cells is an error.
    fn parse_column(&self, name: &str, cells: &[String]) -> Result<Option<Vec<f64>>, String> {
        if let Some(format) = self.options.time_columns.get(name) {
            return cells
                .iter()
                .enumerate()
                .map(|(row, cell)| {
                    if self.is_null(cell) {
                        Ok(f64::NAN)
                    } else {
                        parse_timestamp(cell, format).ok_or_else(|| {
                            format!("row {}: cannot parse '{cell}' in column '{name}' with '{format}'", row + 1)
                        })
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some);
        }

        let mut values = Vec::with_capacity(cells.len());
        let mut bad = None;
        let mut parsed = 0usize;
        for (row, cell) in cells.iter().enumerate() {
            if self.is_null(cell) {
                values.push(f64::NAN);
                continue;
            }
            match cell.parse::<f64>() {
                Ok(v) => {
                    parsed += 1;
                    values.push(v);
                }
                Err(_) => {
                    bad.get_or_insert((row, cell));
                    values.push(f64::NAN);
                }
            }
        }
        match bad {
            None => Ok(Some(values)),
            // A column with no numeric cell at all is a text column.
            Some(_) if parsed == 0 => Ok(None),
            Some((row, cell)) => Err(format!(
                "row {}: cannot parse '{cell}' in column '{name}'",
                row + 1
            )),
        }
    }
}

impl SourceReader for CsvReader<'_> {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn read(&self, path: &Path) -> Result<RawDataset, RetrievalError> {
        let text = read_text(path, self.compression, self.format())?;
        let body = skip_lines(&text, self.options.skip_rows);

        let mut builder = ::csv::ReaderBuilder::new();
        builder
            .delimiter(self.options.delimiter.as_bytes().first().copied().unwrap_or(b','))
            .trim(::csv::Trim::All);
        if let Some(comment) = &self.options.comment {
            builder.comment(comment.as_bytes().first().copied());
        }
        let mut reader = builder.from_reader(body.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| RetrievalError::decode(path, "csv", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(RetrievalError::decode(path, "csv", "no header row"));
        }

        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(|e| RetrievalError::decode(path, "csv", e))?;
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                column.push(cell.to_string());
            }
        }

        let mut raw = RawDataset::new();
        for (name, cells) in headers.iter().zip(&columns) {
            match self
                .parse_column(name, cells)
                .map_err(|message| RetrievalError::decode(path, "csv", message))?
            {
                Some(values) => {
                    let mut variable = RawVariable::column(name.clone(), values);
                    if self.options.time_columns.contains_key(name) {
                        variable
                            .attrs
                            .insert("units".to_string(), EPOCH_UNITS.into());
                    }
                    raw.insert(variable);
                }
                None => debug!(path = %path.display(), column = %name, "Skipping non-numeric column"),
            }
        }
        raw.sources.push(path.to_path_buf());
        Ok(raw)
    }
}

fn skip_lines(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        rest = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => "",
        };
    }
    rest
}

/// Parses a timestamp into epoch seconds. Offsets are honoured when the
/// format has one; otherwise the value is taken as UTC.
pub(crate) fn parse_timestamp(value: &str, format: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_str(value, format) {
        return Some(dt.timestamp_micros() as f64 / 1e6);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
        return Some(dt.and_utc().timestamp_micros() as f64 / 1e6);
    }
    NaiveDate::parse_from_str(value, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("write");
        path
    }

    #[test]
    fn test_read_numeric_and_time_columns() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(
            &dir,
            "met.csv",
            "# station header\ntimestamp,temp_f,station\n2024-01-01 00:00:00,50.0,A\n2024-01-01 00:01:00,NA,A\n",
        );
        let options = CsvOptions {
            skip_rows: 1,
            time_columns: BTreeMap::from([(
                "timestamp".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
            )]),
            ..CsvOptions::default()
        };
        let raw = CsvReader::new(&options, Compression::None)
            .read(&path)
            .expect("read");

        assert_eq!(raw.len(), 2, "text column is skipped");
        let time = raw.get("timestamp").expect("time");
        assert_eq!(time.data.as_slice(), Some(&[1_704_067_200.0, 1_704_067_260.0][..]));
        assert_eq!(time.units(), Some(EPOCH_UNITS));
        let temp = raw.get("temp_f").expect("temp");
        assert_eq!(temp.data[[0]], 50.0);
        assert!(temp.data[[1]].is_nan());
        assert_eq!(raw.sources, vec![path]);
    }

    #[test]
    fn test_read_gzip_with_delimiter() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("met.csv.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).expect("create"),
            flate2::Compression::default(),
        );
        encoder.write_all(b"a;b\n1;2\n3;4\n").expect("write");
        encoder.finish().expect("finish");

        let options = CsvOptions {
            delimiter: ";".to_string(),
            ..CsvOptions::default()
        };
        let raw = CsvReader::new(&options, Compression::Gzip)
            .read(&path)
            .expect("read");
        assert_eq!(raw.get("b").expect("b").data.as_slice(), Some(&[2.0, 4.0][..]));
    }

    #[test]
    fn test_bad_timestamp_is_decode_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "bad.csv", "time,v\nyesterday,1\n");
        let options = CsvOptions {
            time_columns: BTreeMap::from([("time".to_string(), "%Y-%m-%d".to_string())]),
            ..CsvOptions::default()
        };
        let err = CsvReader::new(&options, Compression::None)
            .read(&path)
            .expect_err("bad time");
        assert!(matches!(err, RetrievalError::Decode { .. }));
    }

    #[test]
    fn test_ragged_rows_are_decode_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "ragged.csv", "a,b\n1,2\n3\n");
        let options = CsvOptions::default();
        let err = CsvReader::new(&options, Compression::None)
            .read(&path)
            .expect_err("ragged");
        assert!(err.to_string().contains("ragged.csv"));
    }

    #[test]
    fn test_mixed_column_is_decode_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "mixed.csv", "time,temp_f,site\n0,50,A\n60,ERR,A\n120,52,B\n");
        let options = CsvOptions::default();
        let err = CsvReader::new(&options, Compression::None)
            .read(&path)
            .expect_err("mixed column");
        assert!(matches!(err, RetrievalError::Decode { .. }));
        let message = err.to_string();
        assert!(message.contains("row 2: cannot parse 'ERR' in column 'temp_f'"), "{message}");
    }

    #[test]
    fn test_text_column_with_nulls_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "text.csv", "time,site\n0,A\n60,NA\n");
        let options = CsvOptions::default();
        let raw = CsvReader::new(&options, Compression::None)
            .read(&path)
            .expect("read");
        assert_eq!(raw.len(), 1);
        assert!(raw.get("site").is_none());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("2024-01-01", "%Y-%m-%d"), Some(1_704_067_200.0));
        assert_eq!(
            parse_timestamp("2024-01-01T01:00:00+01:00", "%Y-%m-%dT%H:%M:%S%:z"),
            Some(1_704_067_200.0)
        );
        assert_eq!(parse_timestamp("junk", "%Y"), None);
    }
}
