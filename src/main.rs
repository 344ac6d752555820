//! pairsync: paired-end FASTQ re-synchronization
//!
//! Usage: pairsync <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use pairsync::commands::{GenerateCommand, GenerateConfig, SizeSpec, SyncCommand, VerifyCommand};
use pairsync::fastq::FastqError;
use pairsync::join::DuplicatePolicy;
use pairsync::record::KeyOrder;
use pairsync::writer::{OutputCompression, DEFAULT_GZIP_LEVEL};

#[derive(Parser)]
#[command(name = "pairsync")]
#[command(version)]
#[command(about = "pairsync: restore pairing between read 1 and read 2 FASTQ files", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Log progress details (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep only reads present in both files and write them in matching order
    Sync {
        /// Read 1 input FASTQ (plain or gzip)
        r1: PathBuf,

        /// Read 2 input FASTQ (plain or gzip)
        r2: PathBuf,

        /// Read 1 output FASTQ
        #[arg(short = 'o', long = "out1")]
        out1: PathBuf,

        /// Read 2 output FASTQ
        #[arg(short = 'p', long = "out2")]
        out2: PathBuf,

        /// Identifier ordering for sorting and output
        #[arg(short = 'k', long, default_value = "lexicographic", value_parser = ["lexicographic", "numeric"])]
        key_order: String,

        /// Handling of identifiers repeated within one file
        #[arg(short = 'd', long, default_value = "fail", value_parser = ["fail", "keep-first", "keep-last"])]
        duplicates: String,

        /// Ignore trailing /1 and /2 on identifiers when matching
        #[arg(long)]
        strip_mate_suffix: bool,

        /// Output compression (auto: gzip when the name ends in .gz)
        #[arg(long, default_value = "auto", value_parser = ["auto", "gzip", "plain"])]
        compression: String,

        /// Gzip compression level (0-9)
        #[arg(short = 'l', long, default_value_t = DEFAULT_GZIP_LEVEL)]
        level: u32,

        /// Sort externally, holding at most this many records per file in memory
        #[arg(long)]
        chunk_records: Option<usize>,

        /// Directory for spilled sort chunks (default: system temp)
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Print sync statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Check that two FASTQ files are pairwise in sync
    Verify {
        /// Read 1 FASTQ
        r1: PathBuf,

        /// Read 2 FASTQ
        r2: PathBuf,

        /// Ignore trailing /1 and /2 on identifiers
        #[arg(long)]
        strip_mate_suffix: bool,

        /// Print verification statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Generate synthetic out-of-sync paired FASTQ files for benchmarking
    Generate {
        /// Output directory
        #[arg(short, long, default_value = "./pairsync_bench_data")]
        output: PathBuf,

        /// Read pairs before dropping (e.g. 100K, 1M)
        #[arg(short = 'n', long, default_value = "1M")]
        pairs: String,

        /// Fraction of read 1 records to drop
        #[arg(long, default_value = "0.05")]
        drop_a: f64,

        /// Fraction of read 2 records to drop
        #[arg(long, default_value = "0.05")]
        drop_b: f64,

        /// Read length
        #[arg(long, default_value = "150")]
        read_len: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Use bare integer identifiers
        #[arg(long)]
        numeric_ids: bool,

        /// Shuffle read 2 order
        #[arg(long)]
        shuffle: bool,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            eprintln!("Error: failed to initialize thread pool: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Sync {
            r1,
            r2,
            out1,
            out2,
            key_order,
            duplicates,
            strip_mate_suffix,
            compression,
            level,
            chunk_records,
            temp_dir,
            stats,
        } => run_sync(
            r1,
            r2,
            out1,
            out2,
            key_order,
            duplicates,
            strip_mate_suffix,
            compression,
            level,
            chunk_records,
            temp_dir,
            stats,
        ),

        Commands::Verify {
            r1,
            r2,
            strip_mate_suffix,
            stats,
        } => run_verify(r1, r2, strip_mate_suffix, stats),

        Commands::Generate {
            output,
            pairs,
            drop_a,
            drop_b,
            read_len,
            seed,
            numeric_ids,
            shuffle,
            force,
        } => run_generate(
            output,
            pairs,
            drop_a,
            drop_b,
            read_len,
            seed,
            numeric_ids,
            shuffle,
            force,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_sync(
    r1: PathBuf,
    r2: PathBuf,
    out1: PathBuf,
    out2: PathBuf,
    key_order: String,
    duplicates: String,
    strip_mate_suffix: bool,
    compression: String,
    level: u32,
    chunk_records: Option<usize>,
    temp_dir: Option<PathBuf>,
    stats: bool,
) -> Result<(), FastqError> {
    let key_order = KeyOrder::from_str(&key_order).ok_or_else(|| {
        FastqError::InvalidArgument(format!(
            "Invalid key order '{}'. Use: lexicographic, numeric",
            key_order
        ))
    })?;
    let duplicates = DuplicatePolicy::from_str(&duplicates).ok_or_else(|| {
        FastqError::InvalidArgument(format!(
            "Invalid duplicate policy '{}'. Use: fail, keep-first, keep-last",
            duplicates
        ))
    })?;
    let compression = OutputCompression::from_str(&compression).ok_or_else(|| {
        FastqError::InvalidArgument(format!(
            "Invalid compression '{}'. Use: auto, gzip, plain",
            compression
        ))
    })?;
    if level > 9 {
        return Err(FastqError::InvalidArgument(format!(
            "Invalid gzip level {}. Use 0-9",
            level
        )));
    }
    if chunk_records == Some(0) {
        return Err(FastqError::InvalidArgument(
            "--chunk-records must be at least 1".to_string(),
        ));
    }
    if out1 == out2 {
        return Err(FastqError::InvalidArgument(
            "--out1 and --out2 must be different files".to_string(),
        ));
    }

    let mut cmd = SyncCommand::new()
        .with_key_order(key_order)
        .with_duplicates(duplicates)
        .with_chunk_records(chunk_records);
    cmd.strip_mate_suffix = strip_mate_suffix;
    cmd.compression = compression;
    cmd.level = level;
    cmd.temp_dir = temp_dir;

    let result = cmd.run(r1, r2, out1, out2)?;
    if stats {
        eprintln!("Sync stats: {}", result);
    }
    Ok(())
}

fn run_verify(
    r1: PathBuf,
    r2: PathBuf,
    strip_mate_suffix: bool,
    stats: bool,
) -> Result<(), FastqError> {
    let cmd = VerifyCommand { strip_mate_suffix };
    let result = cmd.run(r1, r2)?;
    if stats {
        eprintln!("Verify stats: {}", result);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_generate(
    output: PathBuf,
    pairs: String,
    drop_a: f64,
    drop_b: f64,
    read_len: usize,
    seed: u64,
    numeric_ids: bool,
    shuffle: bool,
    force: bool,
) -> Result<(), FastqError> {
    let pairs = SizeSpec::from_str(&pairs).ok_or_else(|| {
        FastqError::InvalidArgument(format!(
            "Invalid size '{}'. Use formats like 1K, 5M, 100",
            pairs
        ))
    })?;
    for (name, rate) in [("--drop-a", drop_a), ("--drop-b", drop_b)] {
        if !(0.0..=1.0).contains(&rate) {
            return Err(FastqError::InvalidArgument(format!(
                "{} must be between 0 and 1, got {}",
                name, rate
            )));
        }
    }

    let config = GenerateConfig {
        output_dir: output,
        pairs: pairs.count,
        drop_rate_a: drop_a,
        drop_rate_b: drop_b,
        read_len,
        seed,
        numeric_ids,
        shuffle_b: shuffle,
        force,
    };

    let stats = GenerateCommand::new(config).run()?;
    eprintln!("Generated: {}", stats);
    Ok(())
}
