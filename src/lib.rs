// Clippy allows for the whole crate
#![allow(clippy::should_implement_trait)]

//! pairsync: paired-end FASTQ re-synchronization
//!
//! Paired sequencing runs produce two files whose records correspond one to
//! one. When each file is filtered on its own, mates go missing and the
//! files drift out of step. This library restores the pairing: it keeps only
//! reads whose identifier appears in both files and writes them back out so
//! that record *i* of each output is a mate pair.
//!
//! # Features
//!
//! - **Sort-merge equijoin**: explicit, configurable identifier ordering
//! - **Streaming I/O**: gzip in and out without loading whole files as text
//! - **External sorting**: optional spill to scoped temporary files
//! - **Atomic outputs**: destinations are only replaced by complete results
//!
//! # Example
//!
//! ```rust,no_run
//! use pairsync::commands::SyncCommand;
//!
//! let stats = SyncCommand::new()
//!     .run("in_R1.fastq.gz", "in_R2.fastq.gz", "out_R1.fastq.gz", "out_R2.fastq.gz")
//!     .unwrap();
//! println!("{}", stats);
//! ```

pub mod buffers;
pub mod commands;
pub mod fastq;
pub mod join;
pub mod record;
pub mod spill;
pub mod writer;

// Re-export commonly used types
pub use fastq::{read_records, CancelToken, FastqError, FastqReader, Side};
pub use join::{join_records, DuplicatePolicy, MergeJoin};
pub use record::{KeyOrder, ReadOptions, Record};
pub use writer::{FastqWriter, OutputCompression};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{GenerateCommand, SyncCommand, VerifyCommand};
    pub use crate::fastq::{read_records, FastqError, FastqReader};
    pub use crate::join::{join_records, DuplicatePolicy};
    pub use crate::record::{KeyOrder, ReadOptions, Record};
}
