//! Lock-free transfer counters.

use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::TransferSnapshot;

/// Number of chain layers tracked individually; deeper layers share the last slot.
pub const TRACKED_LAYERS: usize = 4;

/// Counters updated by the transfer manager.
///
/// All updates are relaxed atomic increments, so recording never blocks a
/// transfer. Read them through [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct TransferMetrics {
    downloads_requested: AtomicU64,
    downloads_joined: AtomicU64,
    chain_walks: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    layer_hits: [AtomicU64; TRACKED_LAYERS],
    bytes_delivered: AtomicU64,
    uploads_requested: AtomicU64,
    uploads_joined: AtomicU64,
    uploads_succeeded: AtomicU64,
    uploads_failed: AtomicU64,
    rejected: AtomicU64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_requested(&self) {
        self.downloads_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// A download joined one already in flight.
    pub fn download_joined(&self) {
        self.downloads_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chain_walk_started(&self) {
        self.chain_walks.fetch_add(1, Ordering::Relaxed);
    }

    /// A chain walk was answered by layer `index` with `bytes` bytes.
    pub fn download_succeeded(&self, index: usize, bytes: u64) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
        self.layer_hits[index.min(TRACKED_LAYERS - 1)].fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_requested(&self) {
        self.uploads_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_joined(&self) {
        self.uploads_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_finished(&self, success: bool) {
        let counter = if success {
            &self.uploads_succeeded
        } else {
            &self.uploads_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A request was refused at admission (shutdown, missing capability).
    pub fn request_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> TransferSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TransferSnapshot {
            downloads_requested: load(&self.downloads_requested),
            downloads_joined: load(&self.downloads_joined),
            chain_walks: load(&self.chain_walks),
            downloads_succeeded: load(&self.downloads_succeeded),
            downloads_failed: load(&self.downloads_failed),
            layer_hits: std::array::from_fn(|i| load(&self.layer_hits[i])),
            bytes_delivered: load(&self.bytes_delivered),
            uploads_requested: load(&self.uploads_requested),
            uploads_joined: load(&self.uploads_joined),
            uploads_succeeded: load(&self.uploads_succeeded),
            uploads_failed: load(&self.uploads_failed),
            rejected: load(&self.rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = TransferMetrics::new();
        metrics.download_requested();
        metrics.download_requested();
        metrics.download_joined();
        metrics.chain_walk_started();
        metrics.download_succeeded(1, 30);
        metrics.download_succeeded(9, 10);
        metrics.upload_requested();
        metrics.upload_finished(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.downloads_requested, 2);
        assert_eq!(snap.downloads_joined, 1);
        assert_eq!(snap.layer_hits, [0, 1, 0, 1]);
        assert_eq!(snap.bytes_delivered, 40);
        assert_eq!(snap.uploads_failed, 1);
    }
}
