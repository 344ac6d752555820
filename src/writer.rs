//! FASTQ output: record serialization, compression, and atomic replacement
//! of destination files.

use crate::buffers::{DEFAULT_OUTPUT_BUFFER, WRITER_CHANNEL_CAPACITY};
use crate::fastq::{FastqError, Result};
use crate::record::Record;
use crossbeam_channel::{bounded, Sender};
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tempfile::TempPath;

/// Name prefix of every temporary file pairsync leaves next to an output.
const TEMP_PREFIX: &str = ".pairsync-";

/// Default gzip level, same as `gzip` itself.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// How output files are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCompression {
    /// Gzip when the destination ends in `.gz`, plain text otherwise.
    #[default]
    Auto,
    Gzip,
    Plain,
}

impl OutputCompression {
    /// Parse a mode from its command-line name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "gzip" | "gz" => Some(Self::Gzip),
            "plain" | "none" => Some(Self::Plain),
            _ => None,
        }
    }

    /// Whether a file written to `path` should be gzip-compressed.
    pub fn is_gzip_for(&self, path: &Path) -> bool {
        match self {
            Self::Auto => path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("gz")),
            Self::Gzip => true,
            Self::Plain => false,
        }
    }
}

/// Buffered four-line FASTQ serializer.
pub struct FastqWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FastqWriter<W> {
    /// Create a new writer with the default output buffer.
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_BUFFER, output)
    }

    /// Create a new writer with specified buffer size.
    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
        }
    }

    /// Write one record as four newline-terminated lines.
    #[inline]
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        for line in [
            record.header(),
            record.sequence(),
            record.separator(),
            record.quality(),
        ] {
            self.writer.write_all(line)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flush the output buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| FastqError::Io(e.into_error()))
    }
}

/// Plain or gzip sink over a file.
enum Encoder {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Encoder {
    /// Write any trailer and return the file.
    fn finish(self) -> io::Result<File> {
        match self {
            Encoder::Plain(file) => Ok(file),
            Encoder::Gzip(encoder) => encoder.finish(),
        }
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(file) => file.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(file) => file.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Directory a sibling temporary file of `path` goes in.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// A FASTQ destination that only appears once fully written.
///
/// Records go to a hidden temporary file next to the destination. `commit`
/// finishes the encoder and renames the file into place; dropping without
/// committing deletes the temporary file and leaves the destination as it was.
/// Every I/O error names the destination path.
pub struct AtomicOutput {
    path: PathBuf,
    writer: FastqWriter<Encoder>,
    temp_path: TempPath,
    records: u64,
}

impl AtomicOutput {
    pub fn create(path: &Path, compression: OutputCompression, level: u32) -> Result<Self> {
        if path.is_dir() {
            return Err(FastqError::File {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::IsADirectory, "is a directory"),
            });
        }
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(parent_dir(path))
            .map_err(|source| FastqError::File {
                path: path.to_path_buf(),
                source,
            })?;
        let (file, temp_path) = temp.into_parts();

        let encoder = if compression.is_gzip_for(path) {
            Encoder::Gzip(GzEncoder::new(file, flate2::Compression::new(level.min(9))))
        } else {
            Encoder::Plain(file)
        };

        Ok(Self {
            path: path.to_path_buf(),
            writer: FastqWriter::new(encoder),
            temp_path,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    #[inline]
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.writer
            .write_record(record)
            .map_err(|e| e.in_file(&self.path))?;
        self.records += 1;
        Ok(())
    }

    /// Finish the stream and move it over the destination.
    pub fn commit(self) -> Result<PathBuf> {
        let path = self.path;
        let in_file = |source: io::Error| FastqError::File {
            path: path.clone(),
            source,
        };

        let encoder = self.writer.into_inner().map_err(|e| e.in_file(&path))?;
        let file = encoder.finish().map_err(in_file)?;
        file.sync_all().map_err(in_file)?;
        drop(file);

        self.temp_path
            .persist(&path)
            .map_err(|e| in_file(e.error))?;
        log::debug!("wrote {} records to {}", self.records, path.display());
        Ok(path)
    }
}

/// Writes matched pairs to two atomic outputs.
///
/// Side A is written on the calling thread; side B is handed through a
/// bounded channel to a dedicated thread so the two compressors run in
/// parallel. Both outputs stay hidden until [`PairedWriter::finish`].
pub struct PairedWriter {
    a: Option<AtomicOutput>,
    b_tx: Option<Sender<Record>>,
    b_handle: Option<JoinHandle<Result<AtomicOutput>>>,
    pairs: u64,
}

impl PairedWriter {
    pub fn create(
        path_a: &Path,
        path_b: &Path,
        compression: OutputCompression,
        level: u32,
    ) -> Result<Self> {
        let a = AtomicOutput::create(path_a, compression, level)?;
        let mut b = AtomicOutput::create(path_b, compression, level)?;

        let (tx, rx) = bounded::<Record>(WRITER_CHANNEL_CAPACITY);
        let handle = thread::Builder::new()
            .name("pairsync-writer-b".to_string())
            .spawn(move || -> Result<AtomicOutput> {
                for record in rx {
                    b.write_record(&record)?;
                }
                Ok(b)
            })?;

        Ok(Self {
            a: Some(a),
            b_tx: Some(tx),
            b_handle: Some(handle),
            pairs: 0,
        })
    }

    pub fn pairs_written(&self) -> u64 {
        self.pairs
    }

    /// Write one mate to each output.
    pub fn write_pair(&mut self, a: &Record, b: Record) -> Result<()> {
        if let Some(out) = self.a.as_mut() {
            out.write_record(a)?;
        }
        let sent = match &self.b_tx {
            Some(tx) => tx.send(b).is_ok(),
            None => false,
        };
        if !sent {
            // The writer thread only hangs up after an error
            self.join_b()?;
            return Err(FastqError::Io(io::Error::other(
                "side B writer stopped unexpectedly",
            )));
        }
        self.pairs += 1;
        Ok(())
    }

    /// Stop the side B thread and take back its output.
    fn join_b(&mut self) -> Result<AtomicOutput> {
        drop(self.b_tx.take());
        let handle = self.b_handle.take().ok_or_else(|| {
            FastqError::Io(io::Error::other("side B writer already finished"))
        })?;
        handle
            .join()
            .map_err(|_| FastqError::Io(io::Error::other("side B writer panicked")))?
    }

    /// Commit both outputs. Returns the number of pairs written.
    ///
    /// B is committed first, with any file already at B's destination moved
    /// aside. If committing A then fails, the new B is removed and the old
    /// one put back, so both destinations end up as they were before the run.
    pub fn finish(mut self) -> Result<u64> {
        let b = self.join_b()?;
        let a = self.a.take().ok_or_else(|| {
            FastqError::Io(io::Error::other("side A output already finished"))
        })?;

        let b_path = b.path().to_path_buf();
        let previous_b = set_aside(&b_path)?;
        let committed = b.commit().and_then(|_| {
            a.commit().inspect_err(|_| {
                if let Err(rm) = fs::remove_file(&b_path) {
                    log::warn!("could not remove {}: {}", b_path.display(), rm);
                }
            })
        });

        match committed {
            // Dropping the set-aside copy deletes it
            Ok(_) => Ok(self.pairs),
            Err(e) => {
                if let Some(previous) = previous_b {
                    if let Err(restore) = previous.persist(&b_path) {
                        log::warn!(
                            "could not restore previous {}: {}",
                            b_path.display(),
                            restore.error
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

/// Move an existing file at `path` to a hidden sibling so it can be put back.
///
/// Returns `None` when there is nothing to preserve.
fn set_aside(path: &Path) -> Result<Option<TempPath>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => {}
        _ => return Ok(None),
    }
    let in_file = |source: io::Error| FastqError::File {
        path: path.to_path_buf(),
        source,
    };
    let backup = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".bak")
        .tempfile_in(parent_dir(path))
        .map_err(in_file)?
        .into_temp_path();
    fs::rename(path, &backup).map_err(in_file)?;
    Ok(Some(backup))
}

impl Drop for PairedWriter {
    fn drop(&mut self) {
        // Unfinished: wait for the B thread so its temp file is gone
        // before the caller reports the error and exits.
        if self.b_handle.is_some() {
            let _ = self.join_b();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastq::{parse_records, read_records};
    use crate::record::ReadOptions;

    fn sample(ids: &[&str]) -> Vec<Record> {
        let content: String = ids
            .iter()
            .map(|id| format!("@{id} desc\nACGT\n+\nIIII\n"))
            .collect();
        parse_records(&content, ReadOptions::default()).unwrap()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_record() {
        let mut output = Vec::new();
        {
            let mut writer = FastqWriter::new(&mut output);
            for record in sample(&["r1", "r2"]) {
                writer.write_record(&record).unwrap();
            }
            writer.flush().unwrap();
        }
        assert_eq!(output, b"@r1 desc\nACGT\n+\nIIII\n@r2 desc\nACGT\n+\nIIII\n");
    }

    #[test]
    fn test_compression_for_path() {
        let auto = OutputCompression::Auto;
        assert!(auto.is_gzip_for(Path::new("out_R1.fastq.gz")));
        assert!(auto.is_gzip_for(Path::new("out.GZ")));
        assert!(!auto.is_gzip_for(Path::new("out_R1.fastq")));
        assert!(OutputCompression::Gzip.is_gzip_for(Path::new("out.fq")));
        assert!(!OutputCompression::Plain.is_gzip_for(Path::new("out.fq.gz")));
        assert_eq!(OutputCompression::from_str("none"), Some(OutputCompression::Plain));
    }

    #[test]
    fn test_atomic_output_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fastq.gz");

        let mut out = AtomicOutput::create(&path, OutputCompression::Auto, 6).unwrap();
        for record in sample(&["a", "b", "c"]) {
            out.write_record(&record).unwrap();
        }
        assert!(!path.exists());
        assert_eq!(out.records_written(), 3);
        out.commit().unwrap();

        assert_eq!(dir_entries(dir.path()), vec!["out.fastq.gz"]);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &crate::fastq::GZIP_MAGIC);
        let back = read_records(&path, ReadOptions::default()).unwrap();
        assert_eq!(back, sample(&["a", "b", "c"]));
    }

    #[test]
    fn test_atomic_output_dropped_leaves_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fastq");
        fs::write(&path, "previous").unwrap();

        {
            let mut out = AtomicOutput::create(&path, OutputCompression::Auto, 6).unwrap();
            out.write_record(&sample(&["a"])[0]).unwrap();
        }

        assert_eq!(dir_entries(dir.path()), vec!["out.fastq"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
    }

    #[test]
    fn test_paired_writer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("sync_R1.fq.gz");
        let pb = dir.path().join("sync_R2.fq.gz");

        let mut writer =
            PairedWriter::create(&pa, &pb, OutputCompression::Auto, 1).unwrap();
        let a = sample(&["x", "y", "z"]);
        let b = sample(&["x", "y", "z"]);
        for (ra, rb) in a.iter().zip(b) {
            writer.write_pair(ra, rb).unwrap();
        }
        assert_eq!(writer.pairs_written(), 3);
        assert_eq!(writer.finish().unwrap(), 3);

        let back_a = read_records(&pa, ReadOptions::default()).unwrap();
        let back_b = read_records(&pb, ReadOptions::default()).unwrap();
        assert_eq!(back_a.len(), back_b.len());
        for (ra, rb) in back_a.iter().zip(&back_b) {
            assert_eq!(ra.identifier(), rb.identifier());
        }
        assert_eq!(dir_entries(dir.path()), vec!["sync_R1.fq.gz", "sync_R2.fq.gz"]);
    }

    #[test]
    fn test_paired_writer_abandoned_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("a.fq");
        let pb = dir.path().join("b.fq");
        {
            let mut writer =
                PairedWriter::create(&pa, &pb, OutputCompression::Plain, 6).unwrap();
            let recs = sample(&["x"]);
            writer.write_pair(&recs[0], recs[0].clone()).unwrap();
        }
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_commit_restores_previous_b() {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("a.fq");
        let pb = dir.path().join("b.fq");
        fs::write(&pb, "previous run").unwrap();

        let mut writer = PairedWriter::create(&pa, &pb, OutputCompression::Plain, 6).unwrap();
        let recs = sample(&["x"]);
        writer.write_pair(&recs[0], recs[0].clone()).unwrap();

        // A's destination turns into a non-empty directory before commit
        fs::create_dir(&pa).unwrap();
        fs::write(pa.join("keep"), "").unwrap();

        let err = writer.finish().unwrap_err();
        assert!(err.to_string().contains("a.fq"), "{err}");
        assert_eq!(fs::read_to_string(&pb).unwrap(), "previous run");
        assert!(pa.is_dir());
        assert_eq!(dir_entries(dir.path()), vec!["a.fq", "b.fq"]);
    }

    #[test]
    fn test_failed_commit_removes_new_b() {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("a.fq");
        let pb = dir.path().join("b.fq");

        let mut writer = PairedWriter::create(&pa, &pb, OutputCompression::Plain, 6).unwrap();
        let recs = sample(&["x"]);
        writer.write_pair(&recs[0], recs[0].clone()).unwrap();
        fs::create_dir(&pa).unwrap();
        fs::write(pa.join("keep"), "").unwrap();

        assert!(writer.finish().is_err());
        assert_eq!(dir_entries(dir.path()), vec!["a.fq"]);
    }

    #[test]
    fn test_successful_commit_replaces_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let pa = dir.path().join("a.fq");
        let pb = dir.path().join("b.fq");
        fs::write(&pa, "old a").unwrap();
        fs::write(&pb, "old b").unwrap();

        let mut writer = PairedWriter::create(&pa, &pb, OutputCompression::Plain, 6).unwrap();
        let recs = sample(&["x"]);
        writer.write_pair(&recs[0], recs[0].clone()).unwrap();
        assert_eq!(writer.finish().unwrap(), 1);

        assert_eq!(fs::read_to_string(&pb).unwrap(), "@x desc\nACGT\n+\nIIII\n");
        assert_eq!(dir_entries(dir.path()), vec!["a.fq", "b.fq"]);
    }

    #[test]
    fn test_create_rejects_directory_destination() {
        let dir = tempfile::tempdir().unwrap();
        let err = AtomicOutput::create(dir.path(), OutputCompression::Auto, 6)
            .err()
            .unwrap();
        assert!(matches!(err, FastqError::File { .. }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let err = AtomicOutput::create(
            Path::new("/nonexistent-dir/out.fq"),
            OutputCompression::Auto,
            6,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("out.fq"));
    }
}
