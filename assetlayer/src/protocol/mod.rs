//! Protocol handler implementations.
//!
//! - [`FileProtocolHandler`] - `file://`, every capability
//! - [`HttpDownloadHandler`] - `http://` and `https://` downloads

mod file;
mod http;

pub use file::{FileProtocolHandler, NAMES_FILE};
pub use http::{HttpDownloadHandler, DEFAULT_TIMEOUT_SECS};
