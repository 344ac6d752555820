//! External sorting for inputs too large to sort in memory.
//!
//! Records are buffered up to a chunk limit, stably sorted, and written as
//! plain FASTQ to a private temporary directory. The sorted chunks are then
//! merged with a k-way heap merge. Ties are broken by chunk index, so the
//! merged stream preserves input order among equal identifiers, the same as
//! an in-memory stable sort.
//!
//! At most [`MAX_MERGE_FAN_IN`] chunks are open at a time. When more were
//! spilled, consecutive groups are merged into larger chunks first, one pass
//! at a time, which keeps the tie order intact.
//!
//! The temporary directory is owned by [`ChunkMerge`] (or by the sorter
//! while chunks are still being written) and is deleted on drop, whether
//! the join completes or fails.

use crate::buffers::{CHUNK_IO_BUFFER, MAX_MERGE_FAN_IN};
use crate::fastq::{FastqError, FastqRecordIter, FastqReader, Result};
use crate::join::{sort_records, SortedRecords, SortedSide};
use crate::record::{KeyOrder, ReadOptions, Record};
use crate::writer::FastqWriter;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Sorts a record stream, spilling sorted chunks to disk past a limit.
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    order: KeyOrder,
    chunk_records: usize,
    options: ReadOptions,
    temp_root: Option<PathBuf>,
    max_fan_in: usize,
}

impl ExternalSorter {
    /// Sort with at most `chunk_records` records held in memory.
    pub fn new(order: KeyOrder, chunk_records: usize) -> Self {
        Self {
            order,
            chunk_records: chunk_records.max(1),
            options: ReadOptions::default().key_order(order),
            temp_root: None,
            max_fan_in: MAX_MERGE_FAN_IN,
        }
    }

    /// Options used to re-read spilled chunks. Must match the input's.
    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options.key_order(self.order);
        self
    }

    /// Directory to create the scratch directory in (default: system temp).
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_root = dir;
        self
    }

    /// Most chunk files open at once during a merge (at least 2).
    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Self {
        self.max_fan_in = max_fan_in.max(2);
        self
    }

    fn create_scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pairsync-sort-");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root).map_err(|source| FastqError::File {
                path: root.clone(),
                source,
            })?,
            None => builder.tempdir()?,
        };
        log::debug!("spilling sorted chunks to {}", dir.path().display());
        Ok(dir)
    }

    /// Sort `records`. Inputs that fit in one chunk never touch the disk.
    pub fn sort<I>(&self, records: I) -> Result<SortedSide>
    where
        I: Iterator<Item = Result<Record>>,
    {
        let mut buffer: Vec<Record> = Vec::new();
        let mut scratch: Option<TempDir> = None;
        let mut chunk_paths: Vec<PathBuf> = Vec::new();
        let mut total: u64 = 0;

        for record in records {
            buffer.push(record?);
            total += 1;

            if buffer.len() >= self.chunk_records {
                if scratch.is_none() {
                    scratch = Some(self.create_scratch()?);
                }
                if let Some(dir) = &scratch {
                    let index = chunk_paths.len();
                    chunk_paths.push(self.write_chunk(dir.path(), index, &mut buffer)?);
                }
            }
        }

        let Some(dir) = scratch else {
            return Ok(SortedSide::in_memory(buffer, self.order));
        };

        if !buffer.is_empty() {
            let index = chunk_paths.len();
            chunk_paths.push(self.write_chunk(dir.path(), index, &mut buffer)?);
        }

        log::debug!("{} records spilled into {} chunks", total, chunk_paths.len());
        let chunks = chunk_paths.len();
        let chunk_paths = self.reduce_fan_in(dir.path(), chunk_paths)?;
        let merge = HeapMerge::open(chunk_paths, self.order, self.options)?;

        Ok(SortedSide {
            records: SortedRecords::External(ChunkMerge {
                merge,
                scratch: dir,
            }),
            total,
            chunks,
        })
    }

    /// Sort and write one chunk, leaving `buffer` empty.
    fn write_chunk(&self, dir: &Path, index: usize, buffer: &mut Vec<Record>) -> Result<PathBuf> {
        sort_records(buffer, self.order);

        let path = dir.join(format!("chunk_{}.fastq", index));
        let mut writer = create_chunk(&path)?;
        for record in buffer.drain(..) {
            writer
                .write_record(&record)
                .map_err(|e| e.in_file(&path))?;
        }
        writer.flush().map_err(|e| e.in_file(&path))?;

        Ok(path)
    }

    /// Merge consecutive groups of chunks until at most `max_fan_in` remain.
    fn reduce_fan_in(&self, dir: &Path, mut paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        let mut pass = 0;
        while paths.len() > self.max_fan_in {
            pass += 1;
            let mut merged = Vec::with_capacity(paths.len().div_ceil(self.max_fan_in));

            for (index, group) in paths.chunks(self.max_fan_in).enumerate() {
                let path = dir.join(format!("pass{}_chunk_{}.fastq", pass, index));
                let mut writer = create_chunk(&path)?;
                for record in HeapMerge::open(group.to_vec(), self.order, self.options)? {
                    writer
                        .write_record(&record?)
                        .map_err(|e| e.in_file(&path))?;
                }
                writer.flush().map_err(|e| e.in_file(&path))?;

                for done in group {
                    fs::remove_file(done).map_err(|source| FastqError::File {
                        path: done.clone(),
                        source,
                    })?;
                }
                merged.push(path);
            }

            log::debug!("merge pass {}: {} -> {} chunks", pass, paths.len(), merged.len());
            paths = merged;
        }
        Ok(paths)
    }
}

fn create_chunk(path: &Path) -> Result<FastqWriter<File>> {
    let file = File::create(path).map_err(|source| FastqError::File {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FastqWriter::with_capacity(CHUNK_IO_BUFFER, file))
}

/// Head record of one chunk, ordered for a min-heap via `Reverse`.
struct HeapEntry {
    record: Record,
    chunk: usize,
    order: KeyOrder,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(self.record.identifier(), other.record.identifier())
            .then(self.chunk.cmp(&other.chunk))
    }
}

/// K-way merge over sorted chunk files, in chunk order for equal keys.
struct HeapMerge {
    readers: Vec<FastqRecordIter<File>>,
    paths: Vec<PathBuf>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    order: KeyOrder,
    done: bool,
}

impl HeapMerge {
    fn open(paths: Vec<PathBuf>, order: KeyOrder, options: ReadOptions) -> Result<Self> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in &paths {
            let file = File::open(path).map_err(|source| FastqError::File {
                path: path.clone(),
                source,
            })?;
            readers.push(
                FastqReader::with_capacity(file, CHUNK_IO_BUFFER)
                    .with_options(options)
                    .records(),
            );
        }

        let mut merge = Self {
            readers,
            heap: BinaryHeap::with_capacity(paths.len()),
            paths,
            order,
            done: false,
        };
        for chunk in 0..merge.readers.len() {
            merge.refill(chunk)?;
        }
        Ok(merge)
    }

    fn refill(&mut self, chunk: usize) -> Result<()> {
        let next = self.readers[chunk]
            .next()
            .transpose()
            .map_err(|e| e.in_file(&self.paths[chunk]))?;
        if let Some(record) = next {
            self.heap.push(Reverse(HeapEntry {
                record,
                chunk,
                order: self.order,
            }));
        }
        Ok(())
    }
}

impl Iterator for HeapMerge {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(Reverse(entry)) = self.heap.pop() else {
            self.done = true;
            return None;
        };
        if let Err(e) = self.refill(entry.chunk) {
            self.done = true;
            return Some(Err(e));
        }
        Some(Ok(entry.record))
    }
}

/// Final merge of a spilled side, owning its scratch directory.
pub struct ChunkMerge {
    merge: HeapMerge,
    // Declared last: chunk files are closed before the directory is removed
    scratch: TempDir,
}

impl ChunkMerge {
    /// Number of chunk files being merged.
    pub fn chunk_count(&self) -> usize {
        self.merge.readers.len()
    }

    /// Path of the scratch directory (removed when the merge is dropped).
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

impl Iterator for ChunkMerge {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next()
    }
}
