//! Generate synthetic out-of-sync paired FASTQ files for benchmarking.
//!
//! Produces `reads_R1.fastq.gz` and `reads_R2.fastq.gz` from a common set
//! of read pairs, then drops records from each side independently to mimic
//! per-file quality filtering. Optionally shuffles read 2 so the files share
//! no ordering at all. Output is deterministic for a given seed.

use crate::fastq::{FastqError, Result};
use crate::record::Record;
use crate::writer::{AtomicOutput, OutputCompression};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;

const BASES: &[u8; 4] = b"ACGT";

/// Output file names inside the output directory.
pub const R1_NAME: &str = "reads_R1.fastq.gz";
pub const R2_NAME: &str = "reads_R2.fastq.gz";

/// Size specification (parses 1K, 1M, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub count: u64,
}

impl SizeSpec {
    /// Parse size from string (e.g., "1K", "5M", "100").
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return None;
        }

        let (num_part, multiplier) = if let Some(n) = s.strip_suffix('K') {
            (n, 1_000u64)
        } else if let Some(n) = s.strip_suffix('M') {
            (n, 1_000_000u64)
        } else if let Some(n) = s.strip_suffix('G') {
            (n, 1_000_000_000u64)
        } else {
            (s.as_str(), 1u64)
        };

        num_part
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(multiplier))
            .map(|count| Self { count })
    }
}

/// Configuration for the generate command.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub output_dir: PathBuf,
    /// Read pairs before any records are dropped.
    pub pairs: u64,
    /// Probability of dropping each read 1 record.
    pub drop_rate_a: f64,
    /// Probability of dropping each read 2 record.
    pub drop_rate_b: f64,
    pub read_len: usize,
    pub seed: u64,
    /// Plain integer identifiers (for `--key-order numeric`).
    pub numeric_ids: bool,
    /// Shuffle read 2 instead of keeping the read 1 order.
    pub shuffle_b: bool,
    /// Overwrite existing output files.
    pub force: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./pairsync_bench_data"),
            pairs: 1_000_000,
            drop_rate_a: 0.05,
            drop_rate_b: 0.05,
            read_len: 150,
            seed: 42,
            numeric_ids: false,
            shuffle_b: false,
            force: false,
        }
    }
}

/// Statistics from generate operation.
#[derive(Debug, Default, Clone)]
pub struct GenerateStats {
    pub records_a: u64,
    pub records_b: u64,
    /// Pairs present in both files.
    pub shared: u64,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for GenerateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "R1: {} records, R2: {} records, shared: {} ({:.1}s)",
            self.records_a, self.records_b, self.shared, self.elapsed_secs
        )
    }
}

/// Synthetic paired FASTQ generator.
pub struct GenerateCommand {
    config: GenerateConfig,
}

impl GenerateCommand {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    fn header(&self, index: u64, mate: u8, buf: &mut itoa::Buffer) -> Vec<u8> {
        let mut header = Vec::with_capacity(48);
        header.push(b'@');
        if !self.config.numeric_ids {
            header.extend_from_slice(b"PAIRSYNC:1:FC01:");
        }
        header.extend_from_slice(buf.format(index).as_bytes());
        header.extend_from_slice(b" ");
        header.push(b'0' + mate);
        header.extend_from_slice(b":N:0:ACGTAC");
        header
    }

    fn record(
        &self,
        index: u64,
        mate: u8,
        rng: &mut SmallRng,
        buf: &mut itoa::Buffer,
    ) -> Record {
        let len = self.config.read_len.max(1);
        let sequence: Vec<u8> = (0..len).map(|_| BASES[rng.gen_range(0..4)]).collect();
        let quality: Vec<u8> = (0..len).map(|_| rng.gen_range(b'#'..=b'J')).collect();
        Record::from_parts(
            self.header(index, mate, buf),
            sequence,
            b"+".to_vec(),
            quality,
            false,
        )
    }

    /// Write both files. Returns record counts.
    pub fn run(&self) -> Result<GenerateStats> {
        let start = Instant::now();
        let cfg = &self.config;
        let path_a = cfg.output_dir.join(R1_NAME);
        let path_b = cfg.output_dir.join(R2_NAME);

        std::fs::create_dir_all(&cfg.output_dir).map_err(|source| FastqError::File {
            path: cfg.output_dir.clone(),
            source,
        })?;
        if !cfg.force {
            for path in [&path_a, &path_b] {
                if path.exists() {
                    return Err(FastqError::File {
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::AlreadyExists,
                            "file exists (use --force to overwrite)",
                        ),
                    });
                }
            }
        }

        let mut rng = SmallRng::seed_from_u64(cfg.seed);
        let mut itoa_buf = itoa::Buffer::new();
        let mut out_a = AtomicOutput::create(&path_a, OutputCompression::Gzip, 1)?;
        let mut out_b = AtomicOutput::create(&path_b, OutputCompression::Gzip, 1)?;
        let mut stats = GenerateStats::default();

        // Decide survivors first so R2 can be shuffled independently
        let mut kept_b: Vec<u64> = Vec::new();
        for index in 0..cfg.pairs {
            let keep_a = !rng.gen_bool(cfg.drop_rate_a.clamp(0.0, 1.0));
            let keep_b = !rng.gen_bool(cfg.drop_rate_b.clamp(0.0, 1.0));
            if keep_a {
                out_a.write_record(&self.record(index, 1, &mut rng, &mut itoa_buf))?;
                stats.records_a += 1;
            }
            if keep_b {
                kept_b.push(index);
            }
            if keep_a && keep_b {
                stats.shared += 1;
            }
        }

        if cfg.shuffle_b {
            kept_b.shuffle(&mut rng);
        }
        for &index in &kept_b {
            out_b.write_record(&self.record(index, 2, &mut rng, &mut itoa_buf))?;
        }
        stats.records_b = kept_b.len() as u64;

        out_a.commit()?;
        out_b.commit()?;

        stats.elapsed_secs = start.elapsed().as_secs_f64();
        log::info!("Generated {} and {}: {}", path_a.display(), path_b.display(), stats);
        Ok(stats)
    }
}
