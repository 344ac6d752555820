//! Re-synchronize a pair of FASTQ files.
//!
//! Keeps only reads whose identifier occurs in both inputs and writes the
//! two outputs so that record *i* of one is the mate of record *i* of the
//! other.
//!
//! # Pipeline
//!
//! 1. Read and sort both inputs by identifier (concurrently, via rayon)
//! 2. Collapse duplicate identifiers per the configured policy
//! 3. Merge-join the sorted streams
//! 4. Write each pair to the two outputs (side B on its own thread)
//! 5. Rename both finished outputs into place
//!
//! Nothing is created at the destinations unless every step succeeds.
//!
//! # Output order
//!
//! Pairs follow the configured [`KeyOrder`], not the original file order.

use crate::fastq::{CancelToken, FastqError, FastqReader, Result, Side};
use crate::join::{Dedup, DuplicatePolicy, MergeJoin, SortedSide};
use crate::record::{KeyOrder, ReadOptions};
use crate::spill::ExternalSorter;
use crate::writer::{OutputCompression, PairedWriter, DEFAULT_GZIP_LEVEL};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Statistics from a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub records_a: u64,
    pub records_b: u64,
    pub pairs_written: u64,
    pub duplicates_a: u64,
    pub duplicates_b: u64,
    pub chunks_a: usize,
    pub chunks_b: usize,
}

impl SyncStats {
    /// Records of A dropped because their mate is missing from B.
    pub fn orphans_a(&self) -> u64 {
        self.records_a - self.duplicates_a - self.pairs_written
    }

    /// Records of B dropped because their mate is missing from A.
    pub fn orphans_b(&self) -> u64 {
        self.records_b - self.duplicates_b - self.pairs_written
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Read A: {}, Read B: {}, Pairs: {}, Orphans A: {}, Orphans B: {}, Duplicates A: {}, Duplicates B: {}, Spilled chunks: {}",
            self.records_a,
            self.records_b,
            self.pairs_written,
            self.orphans_a(),
            self.orphans_b(),
            self.duplicates_a,
            self.duplicates_b,
            self.chunks_a + self.chunks_b
        )
    }
}

/// Paired-end sync command configuration.
#[derive(Debug, Clone)]
pub struct SyncCommand {
    /// Identifier ordering used for sorting and matching.
    pub key_order: KeyOrder,
    /// Handling of repeated identifiers within one input.
    pub duplicates: DuplicatePolicy,
    /// Ignore trailing `/1` and `/2` when matching.
    pub strip_mate_suffix: bool,
    /// Output encoding.
    pub compression: OutputCompression,
    /// Gzip level (0-9).
    pub level: u32,
    /// Spill sorted chunks of this many records to disk (None: sort in memory).
    pub chunk_records: Option<usize>,
    /// Where spilled chunks go (default: system temp directory).
    pub temp_dir: Option<PathBuf>,
    cancel: Option<CancelToken>,
}

impl Default for SyncCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCommand {
    pub fn new() -> Self {
        Self {
            key_order: KeyOrder::Lexicographic,
            duplicates: DuplicatePolicy::Fail,
            strip_mate_suffix: false,
            compression: OutputCompression::Auto,
            level: DEFAULT_GZIP_LEVEL,
            chunk_records: None,
            temp_dir: None,
            cancel: None,
        }
    }

    pub fn with_key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn with_chunk_records(mut self, chunk_records: Option<usize>) -> Self {
        self.chunk_records = chunk_records;
        self
    }

    /// Abort reading with [`FastqError::Cancelled`] once `token` fires.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions::new()
            .key_order(self.key_order)
            .strip_mate_suffix(self.strip_mate_suffix)
    }

    /// Read and sort one input.
    fn sort_side(&self, path: &Path) -> Result<SortedSide> {
        let options = self.read_options();
        let mut reader = FastqReader::from_path(path)?.with_options(options);
        if let Some(token) = &self.cancel {
            reader = reader.with_cancel(token.clone());
        }
        let records = reader.records();

        let sorted = match self.chunk_records {
            Some(chunk_records) => ExternalSorter::new(self.key_order, chunk_records)
                .with_options(options)
                .with_temp_dir(self.temp_dir.clone())
                .sort(records),
            None => records
                .collect::<Result<Vec<_>>>()
                .map(|records| SortedSide::in_memory(records, self.key_order)),
        };
        sorted.map_err(|e| e.in_file(path))
    }

    /// Synchronize `input_a`/`input_b` into `output_a`/`output_b`.
    pub fn run<P: AsRef<Path>>(
        &self,
        input_a: P,
        input_b: P,
        output_a: P,
        output_b: P,
    ) -> Result<SyncStats> {
        let (input_a, input_b) = (input_a.as_ref(), input_b.as_ref());
        let (output_a, output_b) = (output_a.as_ref(), output_b.as_ref());
        let started = Instant::now();

        log::info!(
            "Reading {} and {} (key order: {}, duplicates: {})",
            input_a.display(),
            input_b.display(),
            self.key_order,
            self.duplicates.name()
        );
        let (side_a, side_b) =
            rayon::join(|| self.sort_side(input_a), || self.sort_side(input_b));
        let (side_a, side_b) = (side_a?, side_b?);
        log::info!(
            "Sorted {} + {} records in {:.2}s",
            side_a.total,
            side_b.total,
            started.elapsed().as_secs_f64()
        );

        let mut stats = SyncStats {
            records_a: side_a.total,
            records_b: side_b.total,
            chunks_a: side_a.chunks,
            chunks_b: side_b.chunks,
            ..Default::default()
        };

        let mut join = MergeJoin::new(
            Dedup::new(side_a.records, self.duplicates, Side::A),
            Dedup::new(side_b.records, self.duplicates, Side::B),
            self.key_order,
        );
        let mut writer =
            PairedWriter::create(output_a, output_b, self.compression, self.level)?;

        for pair in &mut join {
            let (a, b) = pair.map_err(|e| with_duplicate_source(e, input_a, input_b))?;
            writer.write_pair(&a, b)?;
        }

        stats.pairs_written = writer.finish()?;
        stats.duplicates_a = join.left().duplicates_dropped();
        stats.duplicates_b = join.right().duplicates_dropped();

        log::info!(
            "Wrote {} pairs to {} and {} in {:.2}s",
            stats.pairs_written,
            output_a.display(),
            output_b.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(stats)
    }
}

/// Name the input file in duplicate-identifier errors.
fn with_duplicate_source(e: FastqError, input_a: &Path, input_b: &Path) -> FastqError {
    let path = match e {
        FastqError::DuplicateIdentifier { side: Side::A, .. } => input_a,
        FastqError::DuplicateIdentifier { side: Side::B, .. } => input_b,
        _ => return e,
    };
    e.in_file(path)
}
