//! Byte-range algebra.
//!
//! A [`Range`] describes an interval of a file, optionally open-ended ("to
//! end of file"). Lists of ranges, or of chunks that carry a range, describe
//! partial knowledge of a file's bytes. The list helpers in this module keep
//! such lists sorted by start byte and free of overlaps, and answer whether a
//! query interval is covered without a gap.
//!
//! # Example
//!
//! ```ignore
//! use assetlayer::range::{Range, RangeList};
//!
//! let mut known = RangeList::new();
//! known.add(Range::with_bounds(6, 16, false));
//! known.add(Range::with_bounds(2, 8, false));
//! known.add(Range::with_bounds(8, 14, false));
//!
//! assert!(known.contains(&Range::with_bounds(2, 14, false)));
//! ```

mod serialize;

pub use serialize::{format_range_list, parse_range_list, RangeParseError};

use std::cmp::Ordering;
use std::fmt;

/// A byte interval `[start, start + length)`, optionally open-ended.
///
/// When `goes_to_eof` is set the interval extends to the end of the file and
/// `length` may be provisional (zero if the file size is not yet known).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    start: u64,
    length: u64,
    goes_to_eof: bool,
}

impl Range {
    /// Creates a range from a start byte and a length.
    pub const fn with_length(start: u64, length: u64, goes_to_eof: bool) -> Self {
        Self {
            start,
            length,
            goes_to_eof,
        }
    }

    /// Creates a range from start and (exclusive) end byte.
    ///
    /// An `end` before `start` yields an empty range.
    pub fn with_bounds(start: u64, end: u64, goes_to_eof: bool) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
            goes_to_eof,
        }
    }

    /// The entire file.
    pub const fn whole_file() -> Self {
        Self {
            start: 0,
            length: 0,
            goes_to_eof: true,
        }
    }

    /// Everything from `start` to the end of the file.
    pub const fn from_start(start: u64) -> Self {
        Self {
            start,
            length: 0,
            goes_to_eof: true,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn goes_to_eof(&self) -> bool {
        self.goes_to_eof
    }

    /// Exclusive end byte of the known part of the range.
    pub fn end_byte(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Whether this range starts at byte zero.
    pub fn starts_at_zero(&self) -> bool {
        self.start == 0
    }

    /// Whether this range denotes the entire file.
    pub fn is_whole_file(&self) -> bool {
        self.start == 0 && self.goes_to_eof
    }

    /// Whether this range covers no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.length == 0 && !self.goes_to_eof
    }

    /// Sets the known length, e.g. once the file size is learned.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains(&self, other: &Range) -> bool {
        if other.start < self.start {
            return false;
        }
        if self.goes_to_eof {
            return true;
        }
        !other.goes_to_eof && other.end_byte() <= self.end_byte()
    }

    /// Whether this range shares at least one byte with `other`.
    pub fn overlaps(&self, other: &Range) -> bool {
        let self_before_other_ends = other.goes_to_eof || self.start < other.end_byte();
        let other_before_self_ends = self.goes_to_eof || other.start < self.end_byte();
        self_before_other_ends && other_before_self_ends
    }

    /// Whether the union of a start-ordered list covers this range with no gap.
    ///
    /// An open-ended entry reached without a gap satisfies any query,
    /// including open-ended ones. An empty query is always covered.
    pub fn is_contained_by<'a, I>(&self, list: I) -> bool
    where
        I: IntoIterator<Item = &'a Range>,
    {
        if self.is_empty() {
            return true;
        }
        let mut cursor = self.start;
        for entry in list {
            if !entry.goes_to_eof && entry.end_byte() <= cursor {
                continue;
            }
            if entry.start > cursor {
                return false;
            }
            if entry.goes_to_eof {
                return true;
            }
            cursor = entry.end_byte();
            if !self.goes_to_eof && cursor >= self.end_byte() {
                return true;
            }
        }
        false
    }
}

/// Ranges order by length, then by start byte.
impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.length
            .cmp(&other.length)
            .then(self.start.cmp(&other.start))
            .then(self.goes_to_eof.cmp(&other.goes_to_eof))
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.goes_to_eof {
            write!(f, "[{}..eof)", self.start)
        } else {
            write!(f, "[{}..{})", self.start, self.end_byte())
        }
    }
}

// =============================================================================
// Chunk lists
// =============================================================================

/// Something that covers a [`Range`] and can be narrowed to a sub-range.
///
/// Implemented by [`Range`] itself and by [`crate::data::DenseData`], so that
/// range lists and sparse data share one insertion algorithm.
pub trait RangedChunk: Sized {
    fn range(&self) -> &Range;

    /// Returns the part of this chunk covering `sub`, which lies within
    /// `self.range()`.
    fn restrict(&self, sub: Range) -> Self;
}

impl RangedChunk for Range {
    fn range(&self) -> &Range {
        self
    }

    fn restrict(&self, sub: Range) -> Self {
        sub
    }
}

/// Inserts `chunk` into a start-ordered, non-overlapping list.
///
/// - A whole-file chunk clears the list and becomes its only entry.
/// - An empty chunk, or one already covered by a single entry (including an
///   open-ended entry or a larger same-start entry), is rejected.
/// - Entries covered by the new chunk are dropped.
/// - A chunk partially overlapping its neighbours is narrowed to the bytes
///   they do not already cover; if nothing remains it is rejected.
///
/// Returns `true` if the list changed.
pub fn add_to_list<C: RangedChunk>(chunk: C, list: &mut Vec<C>) -> bool {
    let new = *chunk.range();
    if new.is_empty() {
        return false;
    }
    if new.is_whole_file() {
        list.clear();
        list.push(chunk);
        return true;
    }
    if list.iter().any(|c| c.range().contains(&new)) {
        return false;
    }
    list.retain(|c| !new.contains(c.range()));

    // At most one neighbour overlaps on each side once subsets are gone.
    let mut start = new.start;
    let mut end = if new.goes_to_eof { None } else { Some(new.end_byte()) };
    for existing in list.iter().map(RangedChunk::range) {
        if !existing.overlaps(&new) {
            continue;
        }
        if existing.start < new.start {
            start = start.max(existing.end_byte());
        } else {
            end = Some(end.map_or(existing.start, |e| e.min(existing.start)));
        }
    }

    let trimmed = match end {
        Some(end) if start >= end => return false,
        Some(end) if start == new.start && end == new.end_byte() && !new.goes_to_eof => chunk,
        Some(end) => chunk.restrict(Range::with_bounds(start, end, false)),
        None if start == new.start => chunk,
        None => chunk.restrict(Range::with_bounds(start, new.end_byte(), true)),
    };

    let at = list.partition_point(|c| c.range().start < trimmed.range().start);
    list.insert(at, trimmed);
    true
}

/// Whether a start-ordered chunk list covers `query`.
pub fn list_contains<C: RangedChunk>(list: &[C], query: &Range) -> bool {
    query.is_contained_by(list.iter().map(RangedChunk::range))
}

// =============================================================================
// RangeList
// =============================================================================

/// A start-ordered, non-overlapping set of ranges.
///
/// Used where only coverage matters (the disk cache's `.ranges` sidecar
/// files, in-flight transfer bookkeeping).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList {
    ranges: Vec<Range>,
}

impl RangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a range; returns `true` if coverage changed.
    pub fn add(&mut self, range: Range) -> bool {
        add_to_list(range, &mut self.ranges)
    }

    pub fn contains(&self, query: &Range) -> bool {
        list_contains(&self.ranges, query)
    }

    /// Whether the list covers the whole file.
    pub fn contains_whole_file(&self) -> bool {
        self.contains(&Range::whole_file())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Marks every open-ended entry as ending at `file_size`.
    ///
    /// Ranges files do not record the length of open-ended entries.
    pub fn resolve_eof(&mut self, file_size: u64) {
        for r in self.ranges.iter_mut().filter(|r| r.goes_to_eof) {
            r.length = file_size.saturating_sub(r.start);
        }
    }

    /// Whether the list covers `[0, file_size)` and the file ends there.
    pub fn covers_file_of_size(&self, file_size: u64) -> bool {
        self.contains(&Range::with_length(0, file_size, false))
            && self.ranges.last().is_some_and(|r| {
                r.goes_to_eof || (r.end_byte() == file_size && file_size > 0)
            })
    }
}

impl FromIterator<Range> for RangeList {
    fn from_iter<T: IntoIterator<Item = Range>>(iter: T) -> Self {
        let mut list = Self::new();
        for range in iter {
            list.add(range);
        }
        list
    }
}

impl<'a> IntoIterator for &'a RangeList {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_bounded() {
        let outer = Range::with_bounds(2, 10, false);
        assert!(outer.contains(&Range::with_bounds(2, 10, false)));
        assert!(outer.contains(&Range::with_bounds(4, 6, false)));
        assert!(!outer.contains(&Range::with_bounds(1, 6, false)));
        assert!(!outer.contains(&Range::with_bounds(4, 11, false)));
        assert!(!outer.contains(&Range::from_start(4)));
    }

    #[test]
    fn test_contains_open_ended() {
        let tail = Range::from_start(5);
        assert!(tail.contains(&Range::with_length(5, 1_000_000, false)));
        assert!(tail.contains(&Range::from_start(10)));
        assert!(!tail.contains(&Range::from_start(4)));
        assert!(Range::whole_file().contains(&tail));
    }

    #[test]
    fn test_ordering_is_length_then_start() {
        let short_late = Range::with_length(100, 2, false);
        let long_early = Range::with_length(0, 10, false);
        let short_early = Range::with_length(0, 2, false);
        let mut ranges = vec![long_early, short_late, short_early];
        ranges.sort();
        assert_eq!(ranges, vec![short_early, short_late, long_early]);
    }

    #[test]
    fn test_overlapping_inserts_cover_union() {
        let mut list = RangeList::new();
        assert!(list.add(Range::with_bounds(6, 16, false)));
        assert!(list.add(Range::with_bounds(2, 8, false)));
        assert!(!list.add(Range::with_bounds(8, 14, false)));

        assert!(list.contains(&Range::with_bounds(2, 14, false)));
        assert!(list.contains(&Range::with_bounds(2, 16, false)));
        assert!(!list.contains(&Range::with_bounds(1, 14, false)));
        assert!(!list.contains(&Range::with_bounds(2, 17, false)));
    }

    #[test]
    fn test_entries_never_overlap() {
        let list: RangeList = [
            Range::with_bounds(6, 16, false),
            Range::with_bounds(2, 8, false),
            Range::with_bounds(14, 20, false),
        ]
        .into_iter()
        .collect();

        let ranges: Vec<_> = list.iter().copied().collect();
        for pair in ranges.windows(2) {
            assert!(pair[0].end_byte() <= pair[1].start());
        }
    }

    #[test]
    fn test_whole_file_replaces_everything() {
        let mut list = RangeList::new();
        list.add(Range::with_bounds(0, 4, false));
        list.add(Range::with_bounds(10, 20, false));
        assert!(list.add(Range::whole_file()));
        assert_eq!(list.len(), 1);
        assert!(list.contains_whole_file());
        assert!(!list.add(Range::with_bounds(3, 9, false)));
    }

    #[test]
    fn test_same_start_keeps_larger() {
        let mut list = RangeList::new();
        list.add(Range::with_length(4, 10, false));
        assert!(!list.add(Range::with_length(4, 5, false)));
        assert_eq!(list.iter().next().unwrap().length(), 10);

        assert!(list.add(Range::with_length(4, 20, false)));
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().length(), 20);
    }

    #[test]
    fn test_empty_range_is_noop() {
        let mut list = RangeList::new();
        assert!(!list.add(Range::with_length(5, 0, false)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_open_ended_subsumes_later_inserts() {
        let mut list = RangeList::new();
        list.add(Range::from_start(10));
        assert!(!list.add(Range::with_bounds(12, 30, false)));
        assert!(list.contains(&Range::with_length(50, 1_000, false)));
        assert!(list.contains(&Range::from_start(11)));
        assert!(!list.contains(&Range::from_start(9)));
    }

    #[test]
    fn test_open_ended_narrowed_by_left_neighbour() {
        let mut list = RangeList::new();
        list.add(Range::with_bounds(0, 8, false));
        assert!(list.add(Range::from_start(4)));
        let ranges: Vec<_> = list.iter().copied().collect();
        assert_eq!(ranges[1].start(), 8);
        assert!(ranges[1].goes_to_eof());
        assert!(list.contains_whole_file());
    }

    #[test]
    fn test_is_contained_by_detects_gap() {
        let list = [Range::with_bounds(0, 4, false), Range::with_bounds(5, 9, false)];
        assert!(!Range::with_bounds(2, 7, false).is_contained_by(&list));
        assert!(Range::with_bounds(5, 9, false).is_contained_by(&list));
    }

    #[test]
    fn test_resolve_eof_and_file_coverage() {
        let mut list = RangeList::new();
        list.add(Range::with_bounds(0, 10, false));
        list.add(Range::from_start(10));
        list.resolve_eof(25);
        assert_eq!(list.iter().last().unwrap().end_byte(), 25);
        assert!(list.covers_file_of_size(25));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_range() -> impl Strategy<Value = Range> {
            (0u64..64, 0u64..24, prop::bool::weighted(0.1))
                .prop_map(|(start, len, eof)| Range::with_length(start, len, eof))
        }

        /// Brute-force coverage check over a bounded byte universe.
        fn covered(inserted: &[Range], query: &Range) -> bool {
            let limit = 200u64;
            let end = if query.goes_to_eof() { limit } else { query.end_byte() };
            (query.start()..end).all(|byte| {
                inserted.iter().any(|r| {
                    byte >= r.start() && (r.goes_to_eof() || byte < r.end_byte())
                })
            })
        }

        proptest! {
            #[test]
            fn prop_contains_matches_union(
                inserts in prop::collection::vec(arb_range(), 0..12),
                query in arb_range(),
            ) {
                let list: RangeList = inserts.iter().copied().collect();
                prop_assert_eq!(list.contains(&query), covered(&inserts, &query));
            }

            #[test]
            fn prop_insertion_is_idempotent(
                inserts in prop::collection::vec(arb_range(), 1..12),
            ) {
                let mut list: RangeList = inserts.iter().copied().collect();
                let before = list.clone();
                for r in &inserts {
                    list.add(*r);
                }
                prop_assert_eq!(list, before);
            }
        }
    }
}
