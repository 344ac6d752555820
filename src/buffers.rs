//! Buffer size constants for FASTQ I/O.
//!
//! These control memory usage vs I/O throughput. Gzip throughput is bound
//! by the codec, so buffers beyond a few hundred KB buy little.

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Default output buffer size (1 MB) in front of each encoder.
pub const DEFAULT_OUTPUT_BUFFER: usize = 1024 * 1024;

/// Buffer for spilled chunk files (128 KB). Many may be open at once
/// during the k-way merge.
pub const CHUNK_IO_BUFFER: usize = 128 * 1024;

/// Records buffered in flight between the join and the side-B writer thread.
pub const WRITER_CHANNEL_CAPACITY: usize = 4096;

/// Minimum records before sorting in parallel. Below this threshold
/// sequential sorting is faster due to thread spawn overhead.
pub const PARALLEL_SORT_THRESHOLD: usize = 10_000;

/// Most chunk files merged at once. Larger spills are merged in passes so
/// the number of open files stays bounded.
pub const MAX_MERGE_FAN_IN: usize = 256;
