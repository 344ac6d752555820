//! Pairing validation.
//!
//! Checks that two FASTQ files are already in sync: same number of records
//! and, at every position, the same identifier on both sides. Both files are
//! streamed in lockstep, so memory use is one record per side.

use crate::fastq::{FastqError, FastqReader, Result, Side};
use crate::record::ReadOptions;
use std::path::Path;

/// Verify that two FASTQ files are pairwise in sync.
///
/// # Example
///
/// ```rust,no_run
/// use pairsync::commands::verify_paired;
///
/// verify_paired("sync_R1.fastq.gz", "sync_R2.fastq.gz").expect("outputs must be paired");
/// ```
pub fn verify_paired<P: AsRef<Path>>(path_a: P, path_b: P) -> Result<VerifyStats> {
    VerifyCommand::new().run(path_a, path_b)
}

/// Statistics from a successful verification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyStats {
    pub pairs: u64,
}

impl std::fmt::Display for VerifyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pairs: {}, In sync: yes", self.pairs)
    }
}

/// Pairing validation command.
#[derive(Debug, Clone, Default)]
pub struct VerifyCommand {
    /// Ignore trailing `/1` and `/2` when comparing identifiers.
    pub strip_mate_suffix: bool,
}

impl VerifyCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<P: AsRef<Path>>(&self, path_a: P, path_b: P) -> Result<VerifyStats> {
        let (path_a, path_b) = (path_a.as_ref(), path_b.as_ref());
        let options = ReadOptions::new().strip_mate_suffix(self.strip_mate_suffix);

        let mut reader_a = FastqReader::from_path(path_a)?.with_options(options);
        let mut reader_b = FastqReader::from_path(path_b)?.with_options(options);
        let mut pairs: u64 = 0;

        loop {
            let a = reader_a.read_record().map_err(|e| e.in_file(path_a))?;
            let b = reader_b.read_record().map_err(|e| e.in_file(path_b))?;

            match (a, b) {
                (None, None) => break,
                (Some(_), None) => {
                    return Err(FastqError::LengthMismatch {
                        shorter: Side::B,
                        records: pairs,
                    })
                }
                (None, Some(_)) => {
                    return Err(FastqError::LengthMismatch {
                        shorter: Side::A,
                        records: pairs,
                    })
                }
                (Some(a), Some(b)) => {
                    pairs += 1;
                    if a.identifier() != b.identifier() {
                        return Err(FastqError::PairingMismatch {
                            record: pairs,
                            id_a: a.identifier_str().into_owned(),
                            id_b: b.identifier_str().into_owned(),
                        });
                    }
                }
            }
        }

        log::debug!(
            "{} and {} are in sync ({} pairs)",
            path_a.display(),
            path_b.display(),
            pairs
        );
        Ok(VerifyStats { pairs })
    }
}
