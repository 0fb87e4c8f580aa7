//! AssetLayer - content-addressed transfer and caching engine
//!
//! Files are identified by the SHA-256 [`Fingerprint`](fingerprint::Fingerprint)
//! of their contents and fetched through a chain of cache layers:
//!
//! ```text
//! TransferManager ──► Memory ──miss──► Disk ──miss──► Network ──► services
//!        ▲              ▲                ▲                │
//!        │              └── populate ────┴────────────────┘
//!        └── TransferEvent (EventManager)
//! ```
//!
//! - [`range`] / [`data`]: byte ranges and sparse file contents
//! - [`cache`]: eviction policies, cache maps and the layer chain
//! - [`service`] / [`protocol`]: URI resolution and protocol handlers
//! - [`transfer`]: deduplicating download/upload orchestration
//! - [`task`]: work queues and the event bus
//! - [`app`] / [`config`] / [`logging`]: bootstrap, configuration file and
//!   tracing set-up

use std::future::Future;
use std::pin::Pin;

pub mod app;
pub mod cache;
pub mod config;
pub mod data;
pub mod fingerprint;
pub mod logging;
pub mod protocol;
pub mod range;
pub mod service;
pub mod task;
pub mod telemetry;
pub mod transfer;

/// Boxed future used by the dyn-compatible async traits of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
