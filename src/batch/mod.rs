//! Batching: partitioning the ordered line sequence into fixed-size chunks.

use std::ops::Range;

use serde::Serialize;

use crate::error::{Result, VolleyError};
use crate::lines::LogLine;

/// Batch size used when the caller doesn't pick one.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A contiguous group of lines submitted together in one outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Position of this batch in the run (0-based)
    pub index: usize,
    /// Position of the batch's first line in the full input
    pub offset: usize,
    /// The lines, in input order
    pub lines: Vec<LogLine>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// Indices this batch covers in the full input.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.lines.len()
    }
}

/// Partition `lines` into batches of `size`.
///
/// Produces `ceil(N / size)` batches. Every batch but the last holds exactly
/// `size` lines; the last is not padded. Fails with
/// [`VolleyError::InvalidConfiguration`] if `size` is zero.
pub fn batch_lines(lines: Vec<LogLine>, size: usize) -> Result<Vec<Batch>> {
    if size == 0 {
        return Err(VolleyError::InvalidConfiguration(
            "batch size must be greater than zero".to_string(),
        ));
    }

    let mut batches = Vec::with_capacity(lines.len().div_ceil(size));
    let mut remaining = lines.into_iter().peekable();
    let mut offset = 0;

    while remaining.peek().is_some() {
        let chunk: Vec<LogLine> = remaining.by_ref().take(size).collect();
        let len = chunk.len();
        batches.push(Batch {
            index: batches.len(),
            offset,
            lines: chunk,
        });
        offset += len;
    }

    Ok(batches)
}
