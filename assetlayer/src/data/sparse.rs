//! Partial knowledge of one file's bytes.

use std::fmt::Write as _;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::DenseData;
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::range::{add_to_list, list_contains, Range, RangedChunk};

/// Error returned when a fingerprint is requested over data with a hole.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot hash sparse data: {missing} bytes missing at offset {offset}")]
pub struct GapError {
    pub offset: u64,
    pub missing: u64,
}

/// Result of looking up a single offset in [`SparseData`].
#[derive(Debug, PartialEq, Eq)]
pub enum DataAt<'a> {
    /// Valid bytes starting at the offset, running to the end of their chunk.
    Valid(&'a [u8]),
    /// No data at the offset; the next `u64` bytes are unknown.
    Gap(u64),
    /// No data at or after the offset.
    End,
}

/// Ordered, non-overlapping chunks of one file.
///
/// A whole-file chunk replaces every other chunk. Coverage queries treat an
/// open-ended chunk as running to infinity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseData {
    chunks: Vec<DenseData>,
}

impl SparseData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates sparse data holding a single chunk.
    pub fn from_dense(chunk: DenseData) -> Self {
        let mut sparse = Self::new();
        sparse.add_valid_data(chunk);
        sparse
    }

    /// Adds a chunk of valid data. Returns `true` if coverage changed.
    pub fn add_valid_data(&mut self, chunk: DenseData) -> bool {
        add_to_list(chunk, &mut self.chunks)
    }

    /// Merges every chunk of `other` into this set.
    pub fn merge(&mut self, other: &SparseData) -> bool {
        let mut changed = false;
        for chunk in &other.chunks {
            changed |= self.add_valid_data(chunk.clone());
        }
        changed
    }

    /// Whether the stored chunks cover `range` with no gap.
    pub fn contains(&self, range: &Range) -> bool {
        list_contains(&self.chunks, range)
    }

    /// Whether the complete file is present.
    pub fn contains_whole_file(&self) -> bool {
        self.contains(&Range::whole_file())
    }

    pub fn chunks(&self) -> &[DenseData] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes held across all chunks.
    pub fn space_used(&self) -> u64 {
        self.chunks.iter().map(DenseData::len).sum()
    }

    /// Looks up the data at `offset`.
    pub fn data_at(&self, offset: u64) -> DataAt<'_> {
        for chunk in &self.chunks {
            if let Some(bytes) = chunk.data_at(offset) {
                return DataAt::Valid(bytes);
            }
            if offset < chunk.start() {
                return DataAt::Gap(chunk.start() - offset);
            }
        }
        DataAt::End
    }

    /// Copies out the chunks of this set that fall within `range`.
    ///
    /// A finite range reaching past the end of an open-ended chunk keeps the
    /// end-of-file mark, so the result still covers the query.
    pub fn subset(&self, range: &Range) -> SparseData {
        let chunks = self
            .chunks
            .iter()
            .filter(|c| c.range().overlaps(range) || range.contains(c.range()))
            .map(|c| {
                let to_eof = c.range().goes_to_eof()
                    && (range.goes_to_eof() || range.end_byte() >= c.end_byte());
                let sub = if to_eof {
                    Range::with_bounds(range.start(), c.end_byte(), true)
                } else if range.goes_to_eof() {
                    Range::with_bounds(range.start(), c.end_byte(), false)
                } else {
                    Range::with_bounds(range.start(), range.end_byte(), false)
                };
                c.restrict(sub)
            })
            .filter(|c| !c.is_empty())
            .collect();
        SparseData { chunks }
    }

    /// Materialises the bytes of `range` as one contiguous buffer.
    ///
    /// Returns `None` unless the range is fully covered. The result is
    /// truncated at end of file. A range lying inside a single chunk is
    /// returned without copying.
    pub fn extract(&self, range: &Range) -> Option<Bytes> {
        if !self.contains(range) {
            return None;
        }
        self.subset(range).flatten()
    }

    /// Joins all chunks into a single buffer, copying only when more than one
    /// chunk exists. Returns `None` if the chunks are not contiguous.
    pub fn flatten(&self) -> Option<Bytes> {
        match self.chunks.as_slice() {
            [] => Some(Bytes::new()),
            [only] => Some(only.bytes().clone()),
            chunks => {
                let total: u64 = chunks.iter().map(DenseData::len).sum();
                let mut out = BytesMut::with_capacity(total as usize);
                let mut expected = chunks[0].start();
                for chunk in chunks {
                    if chunk.start() != expected {
                        return None;
                    }
                    out.extend_from_slice(chunk.bytes());
                    expected = chunk.end_byte();
                }
                Some(out.freeze())
            }
        }
    }

    /// Streams every covered byte from offset zero through a SHA-256 hasher.
    ///
    /// A gap anywhere, including before the first chunk, is an error.
    pub fn compute_fingerprint(&self) -> Result<Fingerprint, GapError> {
        let mut hasher = FingerprintHasher::new();
        let mut offset = 0u64;
        for chunk in &self.chunks {
            if chunk.start() != offset {
                return Err(GapError {
                    offset,
                    missing: chunk.start().saturating_sub(offset),
                });
            }
            hasher.update(chunk.bytes());
            offset = chunk.end_byte();
        }
        Ok(hasher.finish())
    }

    /// Human-readable dump of valid and invalid stretches, for tests and logs.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        let mut position = 0u64;
        loop {
            match self.data_at(position) {
                DataAt::Valid(bytes) => {
                    let _ = write!(out, "{{GOT DATA {}}}", bytes.len());
                    out.push_str(&String::from_utf8_lossy(bytes));
                    position += bytes.len() as u64;
                }
                DataAt::Gap(len) => {
                    let _ = write!(out, "[INVALID:{}]", len);
                    position += len;
                }
                DataAt::End => break,
            }
        }
        out
    }
}

impl From<DenseData> for SparseData {
    fn from(chunk: DenseData) -> Self {
        Self::from_dense(chunk)
    }
}
