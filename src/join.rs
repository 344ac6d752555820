//! Sort-merge equijoin on read identifiers.
//!
//! Both sides are sorted by identifier under a [`KeyOrder`], collapsed to
//! one record per identifier according to a [`DuplicatePolicy`], and then
//! walked in lockstep. Pairs come out in key order, not in input order.
//!
//! # Complexity
//!
//! - Sorting: O(n log n) per side (parallel above a size threshold)
//! - Merge: O(|A| + |B|), one record of lookahead per side

use crate::buffers::PARALLEL_SORT_THRESHOLD;
use crate::fastq::{FastqError, Result, Side};
use crate::record::{KeyOrder, Record};
use crate::spill::ChunkMerge;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::iter::Fuse;

/// What to do when an identifier occurs more than once within one input.
///
/// Sorting is stable, so "first" and "last" refer to input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Abort with [`FastqError::DuplicateIdentifier`].
    #[default]
    Fail,
    /// Keep the earliest record, drop later ones.
    KeepFirst,
    /// Keep the latest record, drop earlier ones.
    KeepLast,
}

impl DuplicatePolicy {
    /// Parse a policy from its command-line name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail" | "error" => Some(Self::Fail),
            "keep-first" | "keep_first" | "first" => Some(Self::KeepFirst),
            "keep-last" | "keep_last" | "last" => Some(Self::KeepLast),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::KeepFirst => "keep-first",
            Self::KeepLast => "keep-last",
        }
    }
}

/// Stable sort of records by identifier.
pub fn sort_records(records: &mut [Record], order: KeyOrder) {
    let cmp = |a: &Record, b: &Record| order.compare(a.identifier(), b.identifier());
    if records.len() >= PARALLEL_SORT_THRESHOLD {
        records.par_sort_by(cmp);
    } else {
        records.sort_by(cmp);
    }
}

/// One side of the join, sorted either in memory or through spilled chunks.
pub enum SortedRecords {
    InMemory(std::vec::IntoIter<Record>),
    External(ChunkMerge),
}

impl SortedRecords {
    /// Sort a fully loaded side in memory.
    pub fn from_vec(mut records: Vec<Record>, order: KeyOrder) -> Self {
        sort_records(&mut records, order);
        SortedRecords::InMemory(records.into_iter())
    }
}

impl Iterator for SortedRecords {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedRecords::InMemory(iter) => iter.next().map(Ok),
            SortedRecords::External(merge) => merge.next(),
        }
    }
}

/// A sorted side together with what it took to produce it.
pub struct SortedSide {
    pub records: SortedRecords,
    /// Records read from the input.
    pub total: u64,
    /// Chunk files spilled to disk (0 for in-memory sorting).
    pub chunks: usize,
}

impl SortedSide {
    pub fn in_memory(records: Vec<Record>, order: KeyOrder) -> Self {
        let total = records.len() as u64;
        Self {
            records: SortedRecords::from_vec(records, order),
            total,
            chunks: 0,
        }
    }
}

/// Collapses runs of equal identifiers in a sorted stream.
pub struct Dedup<I> {
    inner: Fuse<I>,
    policy: DuplicatePolicy,
    side: Side,
    pending: Option<Record>,
    dropped: u64,
    done: bool,
}

impl<I> Dedup<I>
where
    I: Iterator<Item = Result<Record>>,
{
    pub fn new(inner: I, policy: DuplicatePolicy, side: Side) -> Self {
        Self {
            inner: inner.fuse(),
            policy,
            side,
            pending: None,
            dropped: 0,
            done: false,
        }
    }

    /// Records discarded under `KeepFirst`/`KeepLast`.
    pub fn duplicates_dropped(&self) -> u64 {
        self.dropped
    }

    fn step(&mut self) -> Result<Option<Record>> {
        let mut current = match self.pending.take() {
            Some(record) => record,
            None => match self.inner.next().transpose()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };

        // Both key orders are total, so equal keys are byte-equal keys
        while let Some(next) = self.inner.next().transpose()? {
            if next.identifier() != current.identifier() {
                self.pending = Some(next);
                break;
            }
            match self.policy {
                DuplicatePolicy::Fail => {
                    return Err(FastqError::DuplicateIdentifier {
                        side: self.side,
                        id: next.identifier_str().into_owned(),
                    });
                }
                DuplicatePolicy::KeepFirst => {}
                DuplicatePolicy::KeepLast => current = next,
            }
            self.dropped += 1;
        }

        Ok(Some(current))
    }
}

impl<I> Iterator for Dedup<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
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

/// Inner join of two sorted, duplicate-free record streams.
///
/// Yields `(a, b)` for every identifier present on both sides, in key order.
/// Once either side is exhausted the other is still drained so that errors
/// further down it (duplicates, parse failures) are reported.
pub struct MergeJoin<A, B>
where
    A: Iterator<Item = Result<Record>>,
    B: Iterator<Item = Result<Record>>,
{
    a: A,
    b: B,
    a_done: bool,
    b_done: bool,
    order: KeyOrder,
    head_a: Option<Record>,
    head_b: Option<Record>,
    unmatched_a: u64,
    unmatched_b: u64,
    pairs: u64,
    done: bool,
}

impl<A, B> MergeJoin<A, B>
where
    A: Iterator<Item = Result<Record>>,
    B: Iterator<Item = Result<Record>>,
{
    pub fn new(a: A, b: B, order: KeyOrder) -> Self {
        Self {
            a,
            b,
            a_done: false,
            b_done: false,
            order,
            head_a: None,
            head_b: None,
            unmatched_a: 0,
            unmatched_b: 0,
            pairs: 0,
            done: false,
        }
    }

    pub fn left(&self) -> &A {
        &self.a
    }

    pub fn right(&self) -> &B {
        &self.b
    }

    pub fn pairs(&self) -> u64 {
        self.pairs
    }

    /// Records from A with no mate in B seen so far.
    pub fn unmatched_a(&self) -> u64 {
        self.unmatched_a
    }

    /// Records from B with no mate in A seen so far.
    pub fn unmatched_b(&self) -> u64 {
        self.unmatched_b
    }

    fn step(&mut self) -> Result<Option<(Record, Record)>> {
        loop {
            if self.head_a.is_none() && !self.a_done {
                self.head_a = self.a.next().transpose()?;
                self.a_done = self.head_a.is_none();
            }
            if self.head_b.is_none() && !self.b_done {
                self.head_b = self.b.next().transpose()?;
                self.b_done = self.head_b.is_none();
            }

            let ord = match (&self.head_a, &self.head_b) {
                (Some(a), Some(b)) => self.order.compare(a.identifier(), b.identifier()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => return Ok(None),
            };

            match ord {
                Ordering::Less => {
                    self.head_a = None;
                    self.unmatched_a += 1;
                }
                Ordering::Greater => {
                    self.head_b = None;
                    self.unmatched_b += 1;
                }
                Ordering::Equal => {
                    if let (Some(a), Some(b)) = (self.head_a.take(), self.head_b.take()) {
                        self.pairs += 1;
                        return Ok(Some((a, b)));
                    }
                }
            }
        }
    }
}

impl<A, B> Iterator for MergeJoin<A, B>
where
    A: Iterator<Item = Result<Record>>,
    B: Iterator<Item = Result<Record>>,
{
    type Item = Result<(Record, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(pair)) => Some(Ok(pair)),
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

/// Join two in-memory record sets.
///
/// Convenience wrapper over [`SortedRecords`], [`Dedup`] and [`MergeJoin`].
pub fn join_records(
    a: Vec<Record>,
    b: Vec<Record>,
    order: KeyOrder,
    policy: DuplicatePolicy,
) -> Result<Vec<(Record, Record)>> {
    let a = Dedup::new(SortedRecords::from_vec(a, order), policy, Side::A);
    let b = Dedup::new(SortedRecords::from_vec(b, order), policy, Side::B);
    MergeJoin::new(a, b, order).collect()
}
