//! Streaming FASTQ reader.

use crate::buffers::DEFAULT_INPUT_BUFFER;
use crate::record::{KeyOrder, ReadOptions, Record, HEADER_MARKER, SEPARATOR_MARKER};
use flate2::read::MultiGzDecoder;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Leading bytes of a gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Longest excerpt of an offending line quoted in error messages.
const MAX_QUOTED_LINE: usize = 60;

/// One of the two inputs of a paired run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Read 1
    A,
    /// Read 2
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A (read 1)"),
            Side::B => f.write_str("B (read 2)"),
        }
    }
}

/// Errors that can occur while reading, joining or writing FASTQ data.
#[derive(Error, Debug)]
pub enum FastqError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed record at line {line}: expected a line starting with '{expected}', found '{found}'")]
    MalformedRecord {
        line: usize,
        expected: char,
        found: String,
    },

    #[error("Truncated stream: {lines} lines is not a multiple of 4")]
    TruncatedStream { lines: usize },

    #[error("Duplicate identifier '{id}' in input {side}")]
    DuplicateIdentifier { side: Side, id: String },

    #[error("Invalid identifier '{id}' at line {line}: numeric key order requires decimal digits")]
    InvalidIdentifier { line: usize, id: String },

    #[error("Inputs are out of sync at record {record}: '{id_a}' vs '{id_b}'")]
    PairingMismatch {
        record: u64,
        id_a: String,
        id_b: String,
    },

    #[error("Inputs differ in length: input {shorter} ended after {records} records")]
    LengthMismatch { shorter: Side, records: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: Box<FastqError>,
    },
}

impl FastqError {
    /// Attach the input path to an error raised while reading it.
    pub fn in_file(self, path: &Path) -> Self {
        match self {
            FastqError::Io(source) => FastqError::File {
                path: path.to_path_buf(),
                source,
            },
            e @ (FastqError::File { .. } | FastqError::Input { .. }) => e,
            e => FastqError::Input {
                path: path.to_path_buf(),
                source: Box::new(e),
            },
        }
    }

    /// The underlying error with any path context removed.
    pub fn root(&self) -> &FastqError {
        match self {
            FastqError::Input { source, .. } => source.root(),
            e => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, FastqError>;

/// Shared flag used to abort a running read from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Open a FASTQ file, transparently decompressing gzip input.
///
/// Compression is detected from the magic bytes, not the file extension.
/// Concatenated gzip members (e.g. `cat a.gz b.gz`) are read in full.
pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).map_err(|source| FastqError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buffered = BufReader::with_capacity(DEFAULT_INPUT_BUFFER, file);
    let is_gzip = buffered
        .fill_buf()
        .map_err(|source| FastqError::File {
            path: path.to_path_buf(),
            source,
        })?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        log::debug!("{}: gzip input", path.display());
        Ok(Box::new(MultiGzDecoder::new(buffered)))
    } else {
        log::debug!("{}: plain input", path.display());
        Ok(Box::new(buffered))
    }
}

/// A streaming FASTQ reader.
///
/// Yields one [`Record`] per four-line group in a single forward pass.
pub struct FastqReader<R: Read> {
    reader: BufReader<R>,
    options: ReadOptions,
    line_number: usize,
    cancel: Option<CancelToken>,
}

impl FastqReader<Box<dyn Read + Send>> {
    /// Open a FASTQ file (plain or gzip) from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(open_input(path.as_ref())?))
    }
}

impl<R: Read> FastqReader<R> {
    /// Create a new FASTQ reader from any readable source.
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_INPUT_BUFFER)
    }

    /// Create a FASTQ reader with custom buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            options: ReadOptions::default(),
            line_number: 0,
            cancel: None,
        }
    }

    /// Set identifier extraction options.
    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort with [`FastqError::Cancelled`] once `token` is triggered.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Read one line without its terminator. Returns false at end of input.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        if self.reader.read_until(b'\n', buf)? == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(true)
    }

    /// Read a line that must exist because a record has already started.
    fn read_required_line(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if self.read_line(buf)? {
            Ok(())
        } else {
            Err(FastqError::TruncatedStream {
                lines: self.line_number,
            })
        }
    }

    fn malformed(&self, expected: u8, line: &[u8]) -> FastqError {
        let shown = &line[..line.len().min(MAX_QUOTED_LINE)];
        FastqError::MalformedRecord {
            line: self.line_number,
            expected: expected as char,
            found: String::from_utf8_lossy(shown).into_owned(),
        }
    }

    /// Read the next FASTQ record.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(FastqError::Cancelled);
        }

        let mut header = Vec::with_capacity(128);
        if !self.read_line(&mut header)? {
            return Ok(None);
        }
        let header_line = self.line_number;
        if header.first() != Some(&HEADER_MARKER) {
            return Err(self.malformed(HEADER_MARKER, &header));
        }

        let mut sequence = Vec::with_capacity(256);
        self.read_required_line(&mut sequence)?;

        let mut separator = Vec::with_capacity(4);
        self.read_required_line(&mut separator)?;
        if separator.first() != Some(&SEPARATOR_MARKER) {
            return Err(self.malformed(SEPARATOR_MARKER, &separator));
        }

        let mut quality = Vec::with_capacity(sequence.len());
        self.read_required_line(&mut quality)?;

        let record = Record::from_parts(
            header,
            sequence,
            separator,
            quality,
            self.options.strip_mate_suffix,
        );

        if self.options.key_order != KeyOrder::Lexicographic
            && !self.options.key_order.accepts(record.identifier())
        {
            return Err(FastqError::InvalidIdentifier {
                line: header_line,
                id: record.identifier_str().into_owned(),
            });
        }

        Ok(Some(record))
    }

    /// Get an iterator over all records.
    pub fn records(self) -> FastqRecordIter<R> {
        FastqRecordIter {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over FASTQ records. Stops after the first error.
pub struct FastqRecordIter<R: Read> {
    reader: FastqReader<R>,
    done: bool,
}

impl<R: Read> Iterator for FastqRecordIter<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read all records from a FASTQ file.
pub fn read_records<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let reader = FastqReader::from_path(path)?.with_options(options);
    reader
        .records()
        .collect::<Result<Vec<_>>>()
        .map_err(|e| e.in_file(path))
}

/// Parse records from a string (useful for testing).
pub fn parse_records(content: &str, options: ReadOptions) -> Result<Vec<Record>> {
    FastqReader::new(content.as_bytes())
        .with_options(options)
        .records()
        .collect()
}
