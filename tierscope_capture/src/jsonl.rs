//! JSONL record reader
//!
//! Every telemetry stream is one JSON value per line. [`Records`] decodes a
//! stream lazily, in file order, and reports the 1-based line number of any
//! line that does not decode. No line is ever skipped: downstream series
//! assume one record per timestep, so a bad line must end the read.
//!
//! [`Source`] is a restartable handle on a file. Each call to
//! [`Source::records`] reopens the file and starts again at line one.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::format::{self, RecordFormat};

/// JSONL reader errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors during read operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Format detection failed
    #[error("Format detection failed: {0}")]
    Detection(#[from] format::DetectionError),
    /// A line did not decode into the expected record
    #[error("Malformed record on line {line}: {source}")]
    MalformedRecord {
        /// 1-based line number of the offending line
        line: u64,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },
}

/// Lazy iterator over the records of a JSONL stream.
///
/// Yields `Err` for the first line that fails to decode. After an IO error
/// the iterator is exhausted.
pub struct Records<R, T> {
    reader: R,
    line: u64,
    buf: String,
    done: bool,
    _record: PhantomData<fn() -> T>,
}

impl<R, T> std::fmt::Debug for Records<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("line", &self.line)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R, T> Records<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    /// Create a new instance of `Records` reading from `reader`
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
            done: false,
            _record: PhantomData,
        }
    }

    /// Number of lines consumed so far.
    #[must_use]
    pub fn line(&self) -> u64 {
        self.line
    }
}

impl<R, T> Iterator for Records<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_line(&mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line += 1;
                let line = self.line;
                let payload = self.buf.trim_end_matches(['\n', '\r']);
                Some(
                    serde_json::from_str(payload)
                        .map_err(|source| Error::MalformedRecord { line, source }),
                )
            }
            Err(err) => {
                self.done = true;
                Some(Err(Error::Io(err)))
            }
        }
    }
}

/// Decode every record of `reader`, aborting on the first error.
///
/// # Errors
///
/// Returns an error if reading fails or any line does not decode.
pub fn read_all<R, T>(reader: R) -> Result<Vec<T>, Error>
where
    R: BufRead,
    T: DeserializeOwned,
{
    Records::new(reader).collect()
}

/// A restartable JSONL file.
#[derive(Debug, Clone)]
pub struct Source {
    path: PathBuf,
    format: RecordFormat,
}

impl Source {
    /// Open a JSONL file, detecting whether it is compressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let format = format::detect_format(&path)?;
        debug!(path = %path.display(), ?format, "opened telemetry source");
        Ok(Self { path, format })
    }

    /// The path this source reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate the records of this source from the first line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be reopened.
    pub fn records<T>(&self) -> Result<Records<Box<dyn BufRead>, T>, Error>
    where
        T: DeserializeOwned,
    {
        let file = File::open(&self.path)?;
        let reader: Box<dyn BufRead> = match self.format {
            RecordFormat::Jsonl { compressed: true } => {
                Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?))
            }
            RecordFormat::Jsonl { compressed: false } => Box::new(BufReader::new(file)),
        };
        Ok(Records::new(reader))
    }

    /// Decode every record of this source, aborting on the first error.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or any line does not decode.
    pub fn read_all<T>(&self) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.records()?.collect()
    }
}
