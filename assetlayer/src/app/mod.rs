//! Application bootstrap and lifecycle management.
//!
//! `AssetLayerApp` wires the engine together in a fixed order and owns
//! everything it starts:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AssetLayerApp                         │
//! │                                                              │
//! │  1. CachedServiceLookup ◄── [services] contexts              │
//! │     └── ProtocolHandlers (file, http, https)                 │
//! │                                                              │
//! │  2. CacheChain: Memory ──► Disk ──► Network                  │
//! │                                                              │
//! │  3. EventManager ──► WorkerPool (event dispatch threads)     │
//! │                                                              │
//! │  4. TransferManager                                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shutdown runs in reverse: the transfer manager drains first, and the
//! event workers stop only once every listener has been called.
//!
//! # Example
//!
//! ```ignore
//! use assetlayer::app::{AssetLayerApp, AppConfig};
//!
//! let app = AssetLayerApp::start(AppConfig::new(cache_dir)).await?;
//! let transfer = app.transfer();
//! // ...
//! app.shutdown().await;
//! ```

mod bootstrap;
mod config;
mod error;

pub use bootstrap::{AssetLayerApp, ProtocolHandlers};
pub use config::{AppConfig, DiskCacheAppConfig, MemoryCacheAppConfig};
pub use error::AppError;
