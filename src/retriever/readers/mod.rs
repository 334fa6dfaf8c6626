//! Parsers for the declared source formats.
//!
//! The parser is chosen from the source's declared format, never by sniffing
//! the file.

mod csv;
mod json;
mod parquet;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

pub use self::csv::CsvReader;
pub use self::json::JsonReader;
pub use self::parquet::ParquetReader;

use crate::config::{Compression, ParserConfig, SourceConfig};
use crate::dataset::RawDataset;
use crate::error::RetrievalError;

/// Reads one file into raw variables keyed by source-native names.
pub trait SourceReader {
    fn format(&self) -> &'static str;

    fn read(&self, path: &Path) -> Result<RawDataset, RetrievalError>;
}

/// Parser registered for `source`'s declared format.
pub fn reader_for(source: &SourceConfig) -> Box<dyn SourceReader + '_> {
    match &source.parser {
        ParserConfig::Csv(options) => Box::new(CsvReader::new(options, source.compression)),
        ParserConfig::Json => Box::new(JsonReader::new(source.compression)),
        ParserConfig::Parquet => Box::new(ParquetReader),
    }
}

/// Opens `path`, transparently decompressing gzip sources.
pub(crate) fn open_source(
    path: &Path,
    compression: Compression,
) -> Result<Box<dyn Read>, RetrievalError> {
    let file = File::open(path).map_err(|e| RetrievalError::io(path, e))?;
    let reader = BufReader::new(file);
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
    })
}

/// Reads the whole (decompressed) source into a string.
pub(crate) fn read_text(
    path: &Path,
    compression: Compression,
    format: &str,
) -> Result<String, RetrievalError> {
    let mut text = String::new();
    open_source(path, compression)?
        .read_to_string(&mut text)
        .map_err(|e| RetrievalError::decode(path, format, e))?;
    Ok(text)
}
