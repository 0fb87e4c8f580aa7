//! Download and upload orchestration.
//!
//! The [`TransferManager`] sits between callers and the cache chain:
//!
//! ```text
//! caller ──download──► TransferManager ──► CacheChain (memory → disk → network)
//!    ▲                      │
//!    └──── TransferEvent ◄──┘ via EventManager
//! ```
//!
//! Requests are deduplicated (a download whose range lies inside one already
//! in flight joins it; uploads share one run per target URI) and every
//! admitted request is answered exactly once, including during shutdown.
//!
//! # Example
//!
//! ```ignore
//! let manager = TransferManager::builder(chain)
//!     .services(services)
//!     .build()?;
//!
//! let data = manager.fetch(id, Range::whole_file()).await?;
//! manager.cleanup().await;
//! ```

mod event;
mod manager;
mod pending;
mod status;
mod upload;

pub use event::{TransferEvent, TransferKind, DOWNLOAD_EVENT, UPLOAD_EVENT};
pub use manager::{TransferError, TransferManager, TransferManagerBuilder, TransferServices};
pub use status::TransferStatus;
pub use upload::{UploadRequest, UploadState};
