//! A contiguous block of file bytes together with the range it covers.

use bytes::Bytes;

use crate::range::{Range, RangedChunk};

/// An immutable contiguous byte buffer plus the exact [`Range`] it covers.
///
/// A chunk is built once from the complete body of a read or download and
/// never changes afterwards. The buffer is reference-counted, so cloning a
/// `DenseData` or narrowing it to a sub-range never copies bytes. An open-ended chunk holds the final
/// bytes of the file: its range length equals the buffer length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseData {
    range: Range,
    data: Bytes,
}

impl DenseData {
    /// Wraps `data` as the bytes starting at `start`.
    ///
    /// `goes_to_eof` records that the buffer runs to the end of the file.
    pub fn new(start: u64, data: impl Into<Bytes>, goes_to_eof: bool) -> Self {
        let data = data.into();
        Self {
            range: Range::with_length(start, data.len() as u64, goes_to_eof),
            data,
        }
    }

    /// A chunk holding an entire file.
    pub fn whole_file(data: impl Into<Bytes>) -> Self {
        Self::new(0, data, true)
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn start(&self) -> u64 {
        self.range.start()
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end byte of the buffer.
    pub fn end_byte(&self) -> u64 {
        self.range.start() + self.len()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Bytes from absolute file `offset` to the end of this chunk.
    ///
    /// Returns `None` when `offset` lies outside the buffer.
    pub fn data_at(&self, offset: u64) -> Option<&[u8]> {
        if offset < self.start() || offset >= self.end_byte() {
            return None;
        }
        let at = (offset - self.start()) as usize;
        Some(&self.data[at..])
    }

    /// Zero-copy view of the bytes covering `sub`, clamped to this chunk.
    pub fn slice(&self, sub: &Range) -> Bytes {
        let from = sub.start().max(self.start()).min(self.end_byte());
        let to = if sub.goes_to_eof() {
            self.end_byte()
        } else {
            sub.end_byte().min(self.end_byte()).max(from)
        };
        self.data
            .slice((from - self.start()) as usize..(to - self.start()) as usize)
    }
}

impl RangedChunk for DenseData {
    fn range(&self) -> &Range {
        &self.range
    }

    fn restrict(&self, sub: Range) -> Self {
        let data = self.slice(&sub);
        let start = sub.start().max(self.start());
        Self::new(start, data, sub.goes_to_eof() && self.range.goes_to_eof())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_covers_buffer() {
        let d = DenseData::new(10, &b"abcdef"[..], false);
        assert_eq!(*d.range(), Range::with_length(10, 6, false));
        assert_eq!(d.end_byte(), 16);
    }

    #[test]
    fn test_data_at_offsets() {
        let d = DenseData::new(10, &b"abcdef"[..], false);
        assert_eq!(d.data_at(10), Some(&b"abcdef"[..]));
        assert_eq!(d.data_at(13), Some(&b"def"[..]));
        assert_eq!(d.data_at(16), None);
        assert_eq!(d.data_at(9), None);
    }

    #[test]
    fn test_restrict_shares_buffer() {
        let d = DenseData::new(4, Bytes::from_static(b"0123456789"), true);
        let tail = d.restrict(Range::with_bounds(8, 14, true));
        assert_eq!(tail.start(), 8);
        assert_eq!(tail.bytes().as_ref(), b"456789");
        assert!(tail.range().goes_to_eof());

        let mid = d.restrict(Range::with_bounds(6, 9, false));
        assert_eq!(mid.bytes().as_ref(), b"234");
        assert!(!mid.range().goes_to_eof());
    }
}
