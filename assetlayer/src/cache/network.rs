//! Network cache layer.
//!
//! The terminal layer of a chain. It holds nothing itself: a lookup resolves
//! the file's URI to service candidates and downloads the range from the
//! first candidate that answers. `store` and `purge` are no-ops.
//!
//! Concurrent lookups are coalesced per fingerprint. A lookup whose range is
//! contained by a fetch already in flight waits for that fetch instead of
//! starting its own, so N callers racing on a cold cache cost one download.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::layer::{CacheLayer, LayerStats};
use crate::data::{DenseData, SparseData};
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::Range;
use crate::service::{Downloaded, DownloadServices, ServiceOutcome};
use crate::BoxFuture;

type FetchResult = Option<SparseData>;

struct InFlight {
    range: Range,
    sender: broadcast::Sender<FetchResult>,
}

type InFlightTable = HashMap<Fingerprint, Vec<InFlight>>;

/// Removes an in-flight record when its fetch ends, even if the fetching
/// future is dropped part way.
struct FetchGuard<'a> {
    table: &'a Mutex<InFlightTable>,
    fingerprint: Fingerprint,
    sender: broadcast::Sender<FetchResult>,
}

impl FetchGuard<'_> {
    fn complete(self, result: &FetchResult) {
        self.remove();
        // No receivers is fine: nobody joined.
        let _ = self.sender.send(result.clone());
    }

    fn remove(&self) {
        let mut table = self.table.lock();
        if let Some(pending) = table.get_mut(&self.fingerprint) {
            pending.retain(|f| !f.sender.same_channel(&self.sender));
            if pending.is_empty() {
                table.remove(&self.fingerprint);
            }
        }
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.remove();
    }
}

enum Role<'a> {
    Leader(FetchGuard<'a>),
    Follower(broadcast::Receiver<FetchResult>),
}

/// Downloads ranges from remote services.
pub struct NetworkCacheLayer {
    services: DownloadServices,
    inflight: Mutex<InFlightTable>,
    verify_whole_files: bool,
    fetches: AtomicU64,
    bytes_fetched: AtomicU64,
}

impl NetworkCacheLayer {
    pub fn new(services: DownloadServices) -> Self {
        Self {
            services,
            inflight: Mutex::new(HashMap::new()),
            verify_whole_files: true,
            fetches: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
        }
    }

    /// Whether whole-file downloads are checked against their fingerprint.
    ///
    /// A mismatching candidate is treated as failed and the next one tried.
    pub fn verify_whole_files(mut self, verify: bool) -> Self {
        self.verify_whole_files = verify;
        self
    }

    pub fn services(&self) -> &DownloadServices {
        &self.services
    }

    /// Number of downloads started (joins excluded).
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of fingerprints with a download outstanding.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    fn join_or_lead(&self, fingerprint: &Fingerprint, range: &Range) -> Role<'_> {
        let mut table = self.inflight.lock();
        let pending = table.entry(*fingerprint).or_default();
        if let Some(existing) = pending.iter().find(|f| f.range.contains(range)) {
            debug!(fingerprint = %fingerprint, range = %range, joined = %existing.range, "joining download in flight");
            return Role::Follower(existing.sender.subscribe());
        }
        let (sender, _) = broadcast::channel(1);
        pending.push(InFlight {
            range: *range,
            sender: sender.clone(),
        });
        Role::Leader(FetchGuard {
            table: &self.inflight,
            fingerprint: *fingerprint,
            sender,
        })
    }

    async fn fetch(&self, id: &RemoteFileId, range: &Range) -> FetchResult {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut cursor = self.services.resolve(&id.uri);
        let mut reason = ServiceOutcome::Success;

        while let Some((candidate, handler)) = cursor.next(reason) {
            match handler.download(&candidate.uri, &candidate.params, range).await {
                Ok(downloaded) => match self.accept(id, range, downloaded) {
                    Some(data) => {
                        info!(fingerprint = %id.fingerprint, uri = %candidate.uri, bytes = data.space_used(), "downloaded");
                        cursor.finish(ServiceOutcome::Success);
                        return Some(data);
                    }
                    None => reason = ServiceOutcome::GeneralError,
                },
                Err(e) => {
                    debug!(uri = %candidate.uri, error = %e, "download candidate failed");
                    reason = e.outcome();
                }
            }
        }

        warn!(fingerprint = %id.fingerprint, uri = %id.uri, tried = cursor.tried(), ?reason, "download failed");
        cursor.finish(reason);
        None
    }

    /// Turns a download into cacheable data, or rejects it.
    fn accept(&self, id: &RemoteFileId, range: &Range, downloaded: Downloaded) -> FetchResult {
        let Downloaded { data, total_size } = downloaded;
        let received = data.len() as u64;
        let end = range.start().saturating_add(received);

        let short_read = !range.goes_to_eof() && received < range.length();
        let eof = range.goes_to_eof() || short_read || total_size.is_some_and(|total| end >= total);
        if received == 0 && !eof {
            debug!(fingerprint = %id.fingerprint, "empty download");
            return None;
        }

        if self.verify_whole_files && range.starts_at_zero() && eof {
            let actual = Fingerprint::compute(&data);
            if actual != id.fingerprint {
                warn!(expected = %id.fingerprint, actual = %actual, "downloaded content does not match fingerprint");
                return None;
            }
        }

        self.bytes_fetched.fetch_add(received, Ordering::Relaxed);
        Some(SparseData::from_dense(DenseData::new(range.start(), data, eof)))
    }
}

impl CacheLayer for NetworkCacheLayer {
    fn name(&self) -> &'static str {
        "network"
    }

    fn lookup<'a>(&'a self, id: &'a RemoteFileId, range: &'a Range) -> BoxFuture<'a, Option<SparseData>> {
        Box::pin(async move {
            match self.join_or_lead(&id.fingerprint, range) {
                Role::Leader(guard) => {
                    let result = self.fetch(id, range).await;
                    guard.complete(&result);
                    result
                }
                Role::Follower(mut receiver) => match receiver.recv().await {
                    Ok(Some(data)) => Some(data.subset(range)),
                    Ok(None) => None,
                    Err(e) => {
                        debug!(fingerprint = %id.fingerprint, error = %e, "download abandoned");
                        None
                    }
                },
            }
        })
    }

    fn store<'a>(&'a self, _fingerprint: &'a Fingerprint, _data: &'a SparseData) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn purge<'a>(&'a self, _fingerprint: &'a Fingerprint) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn holds(&self, _fingerprint: &Fingerprint) -> bool {
        false
    }

    fn stats(&self) -> LayerStats {
        LayerStats {
            entries: self.in_flight(),
            bytes: self.bytes_fetched.load(Ordering::Relaxed),
            capacity: 0,
        }
    }
}
