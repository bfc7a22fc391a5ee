//! Tabular latency sample reader
//!
//! The filesystem benchmark writes one CSV row per request. Columns are
//! matched by header name, extra columns are ignored.
//!
//! ```text
//! group,size,read_latency_ns,write_latency_ns
//! 0,64000,81234,190112
//! 2,4000000,1203311,3349120
//! ```

use std::{fs::File, io::Read, path::Path};

use tracing::debug;

use crate::record::LatencySample;

/// Columns every latency table must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["group", "size", "read_latency_ns", "write_latency_ns"];

/// Table reader errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors opening the table
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The header row could not be read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// A required column is absent from the header row
    #[error("Required column {column} is missing")]
    Schema {
        /// Name of the missing column
        column: &'static str,
    },
    /// A row did not decode into a sample
    #[error("Malformed record on line {line}: {source}")]
    MalformedRecord {
        /// 1-based line number of the offending row
        line: u64,
        /// Underlying decode error
        #[source]
        source: csv::Error,
    },
}

/// Read every latency sample from `reader`, in row order.
///
/// # Errors
///
/// Returns [`Error::Schema`] if a required column is missing and
/// [`Error::MalformedRecord`] for the first row that does not decode.
pub fn read_samples<R: Read>(reader: R) -> Result<Vec<LatencySample>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(Error::Schema { column });
        }
    }

    let mut samples = Vec::new();
    for (row, result) in reader.deserialize::<LatencySample>().enumerate() {
        let sample = result.map_err(|source| {
            // The header occupies line 1.
            let line = source.position().map_or(row as u64 + 2, csv::Position::line);
            Error::MalformedRecord { line, source }
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Read every latency sample from the CSV file at `path`.
///
/// # Errors
///
/// See [`read_samples`]. Also fails if the file cannot be opened.
pub fn read_path<P: AsRef<Path>>(path: P) -> Result<Vec<LatencySample>, Error> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let samples = read_samples(file)?;
    debug!(path = %path.display(), samples = samples.len(), "read latency table");
    Ok(samples)
}
