//! Events fired by the transfer manager.

use parking_lot::Mutex;
use tracing::trace;
use url::Url;

use super::pending::PendingGuard;
use super::status::TransferStatus;
use crate::data::SparseData;
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::Range;
use crate::task::{Event, EventHistory, IdPair};

/// Primary id of download completions; the secondary id is the hex fingerprint.
pub const DOWNLOAD_EVENT: &str = "download";
/// Primary id of upload completions; the secondary id is the target URI.
pub const UPLOAD_EVENT: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Download,
    Upload,
}

/// Completion of one download or upload.
///
/// A fired event holds the manager's pending-operation guard until it has
/// been dispatched, so shutdown cannot finish before listeners have run.
pub struct TransferEvent {
    id: IdPair,
    kind: TransferKind,
    status: TransferStatus,
    remote: Option<RemoteFileId>,
    name: Option<Url>,
    range: Range,
    data: Option<SparseData>,
    pending: Mutex<Option<PendingGuard>>,
}

impl TransferEvent {
    /// Event id for downloads of `fingerprint`.
    pub fn download_id(fingerprint: &Fingerprint) -> IdPair {
        IdPair::new(DOWNLOAD_EVENT, fingerprint.to_hex())
    }

    /// Event id for uploads to `target`.
    pub fn upload_id(target: &Url) -> IdPair {
        IdPair::new(UPLOAD_EVENT, target.as_str())
    }

    pub(crate) fn download(
        remote: RemoteFileId,
        range: Range,
        status: TransferStatus,
        data: Option<SparseData>,
        pending: Option<PendingGuard>,
    ) -> Self {
        Self {
            id: Self::download_id(&remote.fingerprint),
            kind: TransferKind::Download,
            status,
            remote: Some(remote),
            name: None,
            range,
            data,
            pending: Mutex::new(pending),
        }
    }

    /// A download that failed before its name resolved to content.
    pub(crate) fn name_failure(name: Url, range: Range, status: TransferStatus) -> Self {
        Self {
            id: IdPair::new(DOWNLOAD_EVENT, name.as_str()),
            kind: TransferKind::Download,
            status,
            remote: None,
            name: Some(name),
            range,
            data: None,
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn upload(
        remote: RemoteFileId,
        name: Option<Url>,
        status: TransferStatus,
        pending: Option<PendingGuard>,
    ) -> Self {
        Self {
            id: Self::upload_id(&remote.uri),
            kind: TransferKind::Upload,
            status,
            remote: Some(remote),
            name,
            range: Range::whole_file(),
            data: None,
            pending: Mutex::new(pending),
        }
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The content this event is about, unless a name never resolved.
    pub fn remote(&self) -> Option<&RemoteFileId> {
        self.remote.as_ref()
    }

    /// The name the request was made by, if any.
    pub fn name(&self) -> Option<&Url> {
        self.name.as_ref()
    }

    /// The range the transfer was run for.
    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Everything the transfer produced.
    pub fn data(&self) -> Option<&SparseData> {
        self.data.as_ref()
    }

    /// The part of the produced data a request for `range` asked for.
    pub fn data_for(&self, range: &Range) -> Option<SparseData> {
        self.data.as_ref().map(|d| d.subset(range))
    }

    /// Whether this event answers a request for `range`.
    ///
    /// Successful downloads answer any range their data covers as well as
    /// the range they ran for; failures answer the ranges that were waiting
    /// on this transfer.
    pub fn satisfies(&self, range: &Range) -> bool {
        match (&self.data, self.status) {
            (Some(data), TransferStatus::Success) => {
                data.contains(range) || self.range.contains(range)
            }
            _ => self.range.contains(range),
        }
    }
}

impl Event for TransferEvent {
    fn id(&self) -> &IdPair {
        &self.id
    }

    fn on_dispatched(&self, history: EventHistory) {
        trace!(event = %self.id, ?history, status = %self.status, "transfer event dispatched");
        self.pending.lock().take();
    }
}

impl std::fmt::Debug for TransferEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEvent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("range", &self.range)
            .field("bytes", &self.data.as_ref().map(SparseData::space_used))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DenseData;

    fn remote() -> RemoteFileId {
        RemoteFileId::local(Fingerprint::compute(b"content")).unwrap()
    }

    #[test]
    fn test_ids() {
        let id = remote();
        let event = TransferEvent::download(id.clone(), Range::whole_file(), TransferStatus::Success, None, None);
        assert_eq!(event.id().primary, DOWNLOAD_EVENT);
        assert_eq!(event.id().secondary, id.fingerprint.to_hex());

        let upload = TransferEvent::upload(id.clone(), None, TransferStatus::Success, None);
        assert_eq!(upload.id().secondary, id.uri.as_str());
    }

    #[test]
    fn test_success_satisfies_covered_ranges() {
        let data = SparseData::from_dense(DenseData::new(0, b"0123456789".to_vec(), false));
        let event = TransferEvent::download(
            remote(),
            Range::with_length(0, 10, false),
            TransferStatus::Success,
            Some(data),
            None,
        );
        assert!(event.satisfies(&Range::with_length(2, 4, false)));
        assert!(!event.satisfies(&Range::with_length(8, 4, false)));
        assert_eq!(
            event
                .data_for(&Range::with_length(2, 4, false))
                .and_then(|d| d.flatten())
                .unwrap()
                .as_ref(),
            b"2345"
        );
    }

    #[test]
    fn test_failure_satisfies_waiting_ranges() {
        let event = TransferEvent::download(
            remote(),
            Range::with_length(0, 100, false),
            TransferStatus::DownloadFailed,
            None,
            None,
        );
        assert!(event.satisfies(&Range::with_length(10, 10, false)));
        assert!(!event.satisfies(&Range::with_length(90, 20, false)));
    }

    #[test]
    fn test_dispatch_releases_pending_guard() {
        let ops = super::super::pending::PendingOps::new();
        let event = TransferEvent::download(
            remote(),
            Range::whole_file(),
            TransferStatus::Success,
            None,
            Some(ops.begin()),
        );
        assert_eq!(ops.count(), 1);
        event.on_dispatched(EventHistory::Handled);
        assert_eq!(ops.count(), 0);
    }
}
