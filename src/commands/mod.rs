//! Command implementations for pairsync.

pub mod generate;
pub mod sync;
pub mod verify;

pub use generate::{GenerateCommand, GenerateConfig, GenerateStats, SizeSpec};
pub use sync::{SyncCommand, SyncStats};
pub use verify::{verify_paired, VerifyCommand, VerifyStats};
