//! Point-in-time view of the transfer counters.

use std::fmt;

use super::metrics::TRACKED_LAYERS;

/// Copy of [`TransferMetrics`](super::TransferMetrics) at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub downloads_requested: u64,
    pub downloads_joined: u64,
    pub chain_walks: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    /// Successful walks by answering layer index.
    pub layer_hits: [u64; TRACKED_LAYERS],
    pub bytes_delivered: u64,
    pub uploads_requested: u64,
    pub uploads_joined: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub rejected: u64,
}

impl TransferSnapshot {
    /// Share of downloads served without starting a new chain walk.
    pub fn join_ratio(&self) -> f64 {
        if self.downloads_requested == 0 {
            return 0.0;
        }
        self.downloads_joined as f64 / self.downloads_requested as f64
    }

    /// Successful walks answered by layer `index`.
    pub fn hits_at(&self, index: usize) -> u64 {
        self.layer_hits
            .get(index.min(TRACKED_LAYERS - 1))
            .copied()
            .unwrap_or(0)
    }
}

impl fmt::Display for TransferSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "downloads: {} requested, {} joined, {} walks, {} ok, {} failed",
            self.downloads_requested,
            self.downloads_joined,
            self.chain_walks,
            self.downloads_succeeded,
            self.downloads_failed
        )?;
        writeln!(f, "layer hits: {:?}", self.layer_hits)?;
        write!(
            f,
            "uploads: {} requested, {} joined, {} ok, {} failed; {} rejected",
            self.uploads_requested,
            self.uploads_joined,
            self.uploads_succeeded,
            self.uploads_failed,
            self.rejected
        )
    }
}
