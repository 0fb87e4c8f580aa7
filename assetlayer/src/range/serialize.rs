//! Text format for range lists persisted next to partial downloads.
//!
//! The format is a sequence of whitespace-separated `start length;` tuples.
//! A negative length marks an open-ended entry; its real length is recovered
//! from the size of the data file when the list is loaded.
//!
//! ```text
//! 0 1024; 4096 512; 8192 -1;
//! ```

use thiserror::Error;

use super::{Range, RangeList};

/// Errors produced when parsing a ranges file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("tuple {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("tuple {index}: invalid {field} '{value}'")]
    InvalidNumber {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("tuple {index}: unexpected trailing token '{token}'")]
    TrailingToken { index: usize, token: String },
}

/// Renders a range list in the ranges-file format.
pub fn format_range_list(list: &RangeList) -> String {
    let mut out = String::new();
    for range in list {
        if range.goes_to_eof() {
            out.push_str(&format!("{} -1; ", range.start()));
        } else {
            out.push_str(&format!("{} {}; ", range.start(), range.length()));
        }
    }
    out.truncate(out.trim_end().len());
    out
}

/// Parses the ranges-file format.
///
/// Open-ended entries come back with a provisional length of zero; call
/// [`RangeList::resolve_eof`] once the data file size is known.
pub fn parse_range_list(text: &str) -> Result<RangeList, RangeParseError> {
    let mut list = RangeList::new();
    let tuples = text.split(';').map(str::trim).filter(|t| !t.is_empty());

    for (index, tuple) in tuples.enumerate() {
        let mut fields = tuple.split_whitespace();
        let start_str = fields.next().ok_or(RangeParseError::MissingField {
            index,
            field: "start",
        })?;
        let length_str = fields.next().ok_or(RangeParseError::MissingField {
            index,
            field: "length",
        })?;
        if let Some(token) = fields.next() {
            return Err(RangeParseError::TrailingToken {
                index,
                token: token.to_string(),
            });
        }

        let start: u64 = start_str.parse().map_err(|_| RangeParseError::InvalidNumber {
            index,
            field: "start",
            value: start_str.to_string(),
        })?;
        let length: i64 = length_str.parse().map_err(|_| RangeParseError::InvalidNumber {
            index,
            field: "length",
            value: length_str.to_string(),
        })?;

        let range = if length < 0 {
            Range::from_start(start)
        } else {
            Range::with_length(start, length.unsigned_abs(), false)
        };
        list.add(range);
    }

    Ok(list)
}
