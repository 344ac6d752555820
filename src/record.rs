//! FASTQ record type, identifier extraction, and join-key ordering.

use memchr::memchr3;
use std::cmp::Ordering;
use std::fmt;

/// First byte of every FASTQ header line.
pub const HEADER_MARKER: u8 = b'@';

/// First byte of every FASTQ separator line.
pub const SEPARATOR_MARKER: u8 = b'+';

/// Comparison used to order identifiers for the sort-merge join.
///
/// Both orders are strict total orders over identifier strings: two
/// identifiers compare `Equal` only when they are byte-identical, so the
/// join never pairs reads whose names merely look alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrder {
    /// Plain byte-wise comparison (`LC_ALL=C sort` order).
    #[default]
    Lexicographic,
    /// Identifiers must be unsigned decimal integers of any length.
    /// Compared by value; different spellings of the same value
    /// (`007` and `7`) are ordered byte-wise and never match each other.
    Numeric,
}

impl KeyOrder {
    /// Parse an order from its command-line name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lexicographic" | "lex" | "bytes" => Some(Self::Lexicographic),
            "numeric" | "num" => Some(Self::Numeric),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lexicographic => "lexicographic",
            Self::Numeric => "numeric",
        }
    }

    /// Compare two identifiers under this order.
    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Lexicographic => a.cmp(b),
            Self::Numeric => compare_numeric(a, b),
        }
    }

    /// Whether an identifier can be ordered under this policy.
    #[inline]
    pub fn accepts(&self, id: &[u8]) -> bool {
        match self {
            Self::Lexicographic => true,
            Self::Numeric => !id.is_empty() && id.iter().all(u8::is_ascii_digit),
        }
    }
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
fn strip_leading_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&b| b != b'0').unwrap_or(digits.len());
    &digits[first..]
}

/// Numeric comparison on digit strings without parsing into a fixed-width
/// integer, so identifiers longer than 20 digits still order correctly.
fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let sa = strip_leading_zeros(a);
    let sb = strip_leading_zeros(b);
    sa.len()
        .cmp(&sb.len())
        .then_with(|| sa.cmp(sb))
        .then_with(|| a.cmp(b))
}

/// Options controlling how identifiers are extracted and validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Ordering the identifiers must support.
    pub key_order: KeyOrder,
    /// Drop a trailing `/1` or `/2` mate suffix from the join key.
    pub strip_mate_suffix: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    pub fn strip_mate_suffix(mut self, strip: bool) -> Self {
        self.strip_mate_suffix = strip;
        self
    }
}

/// Byte offset in `header` where the identifier ends.
///
/// The header must start with [`HEADER_MARKER`]. The identifier runs from
/// the byte after the marker up to the first ASCII whitespace byte (space,
/// tab, CR, LF, vertical tab or form feed).
#[inline]
pub fn identifier_end(header: &[u8], strip_mate_suffix: bool) -> usize {
    debug_assert!(!header.is_empty());
    let body = &header[1..];
    let common = memchr3(b' ', b'\t', b'\r', body).unwrap_or(body.len());
    // Vertical tab, form feed and a stray LF only matter before that point
    let rare = memchr3(b'\x0b', b'\x0c', b'\n', &body[..common]).unwrap_or(common);
    let mut end = 1 + rare;
    if strip_mate_suffix
        && end >= 4
        && header[end - 2] == b'/'
        && matches!(header[end - 1], b'1' | b'2')
    {
        end -= 2;
    }
    end
}

/// One sequencing read: header, sequence, separator and quality lines.
///
/// Lines are stored without their terminators. Records are immutable once
/// built; the identifier is a view into the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    header: Vec<u8>,
    sequence: Vec<u8>,
    separator: Vec<u8>,
    quality: Vec<u8>,
    id_end: usize,
}

impl Record {
    /// Build a record from its four lines.
    ///
    /// Returns `None` if the header does not start with `@` or the
    /// separator does not start with `+`.
    pub fn new(
        header: impl Into<Vec<u8>>,
        sequence: impl Into<Vec<u8>>,
        separator: impl Into<Vec<u8>>,
        quality: impl Into<Vec<u8>>,
        options: &ReadOptions,
    ) -> Option<Self> {
        let header = header.into();
        let separator = separator.into();
        if header.first() != Some(&HEADER_MARKER) || separator.first() != Some(&SEPARATOR_MARKER)
        {
            return None;
        }
        Some(Self::from_parts(
            header,
            sequence.into(),
            separator,
            quality.into(),
            options.strip_mate_suffix,
        ))
    }

    /// Build a record whose header and separator markers were already checked.
    pub(crate) fn from_parts(
        header: Vec<u8>,
        sequence: Vec<u8>,
        separator: Vec<u8>,
        quality: Vec<u8>,
        strip_mate_suffix: bool,
    ) -> Self {
        let id_end = identifier_end(&header, strip_mate_suffix);
        Self {
            header,
            sequence,
            separator,
            quality,
            id_end,
        }
    }

    /// Join key: first header token without the marker.
    #[inline]
    pub fn identifier(&self) -> &[u8] {
        &self.header[1..self.id_end]
    }

    /// Identifier as text, with invalid UTF-8 replaced.
    pub fn identifier_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.identifier())
    }

    #[inline]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    #[inline]
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    #[inline]
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    #[inline]
    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    /// Size of the record when serialized, including four newlines.
    pub fn encoded_len(&self) -> usize {
        self.header.len() + self.sequence.len() + self.separator.len() + self.quality.len() + 4
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}\n{}\n{}",
            String::from_utf8_lossy(&self.header),
            String::from_utf8_lossy(&self.sequence),
            String::from_utf8_lossy(&self.separator),
            String::from_utf8_lossy(&self.quality)
        )
    }
}
