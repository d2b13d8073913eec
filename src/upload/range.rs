//! Content-Range parsing and received-range bookkeeping.

use std::fmt;

use crate::db::MAX_DB_SIZE;
use crate::{Result, StowageError};

/// A chunk's position within a file: bytes `start..end` of `total`.
///
/// `end` is exclusive. The wire form `bytes a-b/t` carries an inclusive
/// last byte, so `end = b + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Parse a `bytes <first>-<last>/<total>` header value.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = || StowageError::InvalidRange(format!("malformed Content-Range '{header}'"));

        let rest = header.trim().strip_prefix("bytes").ok_or_else(invalid)?;
        if !rest.starts_with(char::is_whitespace) {
            return Err(invalid());
        }
        let (span, total) = rest.trim_start().split_once('/').ok_or_else(invalid)?;
        let (first, last) = span.split_once('-').ok_or_else(invalid)?;

        let first = parse_number(first).ok_or_else(invalid)?;
        let last = parse_number(last).ok_or_else(invalid)?;
        let total = parse_number(total).ok_or_else(invalid)?;

        if first > last {
            return Err(StowageError::InvalidRange(format!(
                "first byte {first} is after last byte {last}"
            )));
        }
        if last >= total {
            return Err(StowageError::InvalidRange(format!(
                "last byte {last} is outside a {total} byte file"
            )));
        }
        if total > MAX_DB_SIZE {
            return Err(StowageError::InvalidRange(format!("total {total} is too large")));
        }

        Ok(Self {
            start: first,
            end: last + 1,
            total,
        })
    }

    /// The range covering a whole body sent without a Content-Range header.
    pub fn whole(len: u64) -> Self {
        Self {
            start: 0,
            end: len,
            total: len,
        }
    }

    /// Number of bytes the range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check whether this chunk starts a new upload.
    pub fn is_first(&self) -> bool {
        self.start == 0
    }

    /// Check whether a single chunk carries the whole file.
    pub fn is_complete(&self) -> bool {
        self.start == 0 && self.end == self.total
    }

    /// Check that the body length matches the declared span.
    pub fn check_chunk_len(&self, body_len: u64) -> Result<()> {
        if body_len != self.len() {
            return Err(StowageError::InvalidRange(format!(
                "range {self} declares {} bytes but the chunk carries {body_len}",
                self.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "bytes */{}", self.total)
        } else {
            write!(f, "bytes {}-{}/{}", self.start, self.end - 1, self.total)
        }
    }
}

fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Length of the gap-free prefix starting at byte 0.
///
/// `ranges` are half-open `(start, end)` pairs in any order and may
/// overlap.
pub fn contiguous_prefix(ranges: &[(u64, u64)]) -> u64 {
    let mut sorted: Vec<(u64, u64)> = ranges.iter().copied().filter(|(s, e)| s < e).collect();
    sorted.sort_unstable();

    let mut covered = 0;
    for (start, end) in sorted {
        if start > covered {
            break;
        }
        covered = covered.max(end);
    }
    covered
}
