//! CSV adapter over the external movie dataset: the one `KeySource`
//! implementation that actually touches the filesystem, kept out of
//! `dht-workload` so the driver never depends on an I/O boundary.

use dht_core::Value;
use serde_json::{Map, Value as Json};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Errors from the CSV ingestion boundary. Kept separate from
/// `dht_core::Error`: these are adapter-layer I/O/schema problems, never
/// overlay protocol errors, so they never travel through the typed error
/// the library crates share.
#[derive(Debug, Error)]
pub enum CsvError {
    /// The underlying CSV reader failed (malformed CSV syntax, I/O error).
    #[error("CSV read failed: {0}")]
    Io(#[from] csv::Error),

    /// A row, or the header row itself, did not carry the required key
    /// column.
    #[error("CSV schema error: {reason}")]
    CsvSchema {
        /// What was missing or mismatched.
        reason: String,
    },
}

/// Reads key/value pairs from a CSV file: the first column is the key, every
/// other column is folded into a JSON object keyed by its header name.
pub struct CsvKeySource {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    error: Option<CsvError>,
}

impl CsvKeySource {
    /// Open `path`, reading and caching its header row.
    ///
    /// # Errors
    /// Returns [`CsvError::Io`] if the file can't be opened or its header
    /// row can't be read, or [`CsvError::CsvSchema`] if the header row has
    /// no columns at all (so there is no key column to read).
    pub fn open(path: &Path) -> Result<Self, CsvError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() {
            return Err(CsvError::CsvSchema {
                reason: format!("{} has an empty header row; expected a key column", path.display()),
            });
        }
        Ok(Self { reader, headers, error: None })
    }

    /// Take the first read/schema error encountered during iteration, if
    /// any. `next()` stops yielding items once an error occurs (it "fuses"),
    /// so the caller should check this after consuming the source to tell a
    /// deliberately-short dataset apart from a malformed one.
    pub fn take_error(&mut self) -> Option<CsvError> {
        self.error.take()
    }
}

impl Iterator for CsvKeySource {
    type Item = (Vec<u8>, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() {
            return None;
        }
        let mut record = csv::StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                self.error = Some(CsvError::Io(e));
                return None;
            }
        }
        let Some(key_field) = record.get(0) else {
            let line = record.position().map_or(0, |p| p.line());
            self.error = Some(CsvError::CsvSchema {
                reason: format!("row at line {line} is missing the required key column"),
            });
            return None;
        };
        let key = key_field.as_bytes().to_vec();
        let mut fields = Map::new();
        for (name, value) in self.headers.iter().zip(record.iter()).skip(1) {
            fields.insert(name.clone(), Json::String(value.to_string()));
        }
        Some((key, Json::Object(fields)))
    }
}
