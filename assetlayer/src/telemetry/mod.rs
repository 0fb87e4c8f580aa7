//! Transfer telemetry.
//!
//! Lock-free counters recorded by the transfer manager, read as snapshots.
//!
//! ```text
//! TransferManager ─────► TransferMetrics ─────► TransferSnapshot ─────► CLI
//!                        (atomic counters)      (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let metrics = Arc::new(TransferMetrics::new());
//! metrics.download_requested();
//! metrics.download_succeeded(0, 4096);
//!
//! let snapshot = metrics.snapshot();
//! println!("memory hits: {}", snapshot.hits_at(0));
//! ```

mod metrics;
mod snapshot;

pub use metrics::{TransferMetrics, TRACKED_LAYERS};
pub use snapshot::TransferSnapshot;
