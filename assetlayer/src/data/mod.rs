//! File data held by the caches.
//!
//! [`DenseData`] is one contiguous buffer with the range it covers;
//! [`SparseData`] is the ordered set of such buffers known for one file.

mod dense;
mod sparse;

pub use dense::DenseData;
pub use sparse::{DataAt, GapError, SparseData};
