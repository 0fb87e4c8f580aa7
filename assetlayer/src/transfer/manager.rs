//! Transfer orchestration.
//!
//! The manager turns download and upload requests into cache chain walks
//! and service calls, deduplicating concurrent work and reporting every
//! outcome as a [`TransferEvent`].
//!
//! # Download flow
//!
//! ```text
//! download(id, range) ──► admission ──shutdown──► listener(ShutdownInProgress)
//!                            │
//!                            ├─ range inside a walk in flight ──► subscribe only
//!                            │
//!                            └─ otherwise ──► subscribe, record range, spawn walk
//!                                                        │
//!          fire(TransferEvent) ◄── remove record ◄── chain.get_data()
//! ```
//!
//! Subscription and the in-flight check happen under the same lock that the
//! completing walk takes to remove its record, so a caller that joins a walk
//! always sees that walk's event.
//!
//! # Shutdown
//!
//! [`cleanup`](TransferManager::cleanup) rejects new requests, cancels the
//! walks in flight (their listeners receive `ShutdownInProgress`) and returns
//! once every admitted request has been delivered. When events dispatch
//! through a work queue, the queue must keep being drained until `cleanup`
//! returns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::event::TransferEvent;
use super::pending::{PendingGuard, PendingOps};
use super::status::TransferStatus;
use super::upload::{UploadRequest, UploadState};
use crate::cache::{CacheChain, LayerStats};
use crate::data::{DenseData, SparseData};
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::Range;
use crate::service::{
    DownloadServices, NameLookupServices, NameUploadServices, ServiceCandidate, ServiceError,
    ServiceManager, ServiceOutcome, UploadServices,
};
use crate::task::{EventManager, EventOrder, EventResponse, SubscriptionId};
use crate::telemetry::TransferMetrics;
use crate::BoxFuture;

/// Errors constructing a [`TransferManager`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer manager requires a tokio runtime")]
    NoRuntime,
}

/// Remote capabilities available to the manager.
///
/// A missing capability makes the requests needing it end with
/// [`TransferStatus::UnimplementedCapability`].
#[derive(Clone, Default)]
pub struct TransferServices {
    /// Used for existence checks before uploading.
    pub downloads: Option<DownloadServices>,
    pub uploads: Option<UploadServices>,
    pub name_lookups: Option<NameLookupServices>,
    pub name_uploads: Option<NameUploadServices>,
}

type Listener = Box<dyn FnOnce(&TransferEvent) + Send>;

/// A request's listener, called at most once.
struct Delivery {
    listener: Mutex<Option<Listener>>,
}

impl Delivery {
    fn new<F>(listener: F) -> Arc<Self>
    where
        F: FnOnce(&TransferEvent) + Send + 'static,
    {
        Arc::new(Self {
            listener: Mutex::new(Some(Box::new(listener))),
        })
    }

    fn deliver(&self, event: &TransferEvent) -> bool {
        let listener = self.listener.lock().take();
        match listener {
            Some(listener) => {
                listener(event);
                true
            }
            None => false,
        }
    }
}

/// Work admitted and not yet finished.
#[derive(Default)]
struct Admission {
    /// Ranges being walked, per fingerprint.
    downloads: HashMap<Fingerprint, Vec<Range>>,
    /// Upload target URIs.
    uploads: HashSet<String>,
}

struct Inner {
    chain: CacheChain,
    events: EventManager<TransferEvent>,
    services: TransferServices,
    admission: Mutex<Admission>,
    shutdown: CancellationToken,
    pending: PendingOps,
    metrics: Arc<TransferMetrics>,
    runtime: Handle,
}

/// Deduplicating download/upload orchestrator.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<Inner>,
}

/// Builder for [`TransferManager`].
pub struct TransferManagerBuilder {
    chain: CacheChain,
    events: Option<EventManager<TransferEvent>>,
    services: TransferServices,
    metrics: Option<Arc<TransferMetrics>>,
    runtime: Option<Handle>,
}

impl TransferManagerBuilder {
    /// Event bus to fire completions on. Defaults to an inline bus.
    pub fn events(mut self, events: EventManager<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn services(mut self, services: TransferServices) -> Self {
        self.services = services;
        self
    }

    pub fn metrics(mut self, metrics: Arc<TransferMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runtime to spawn transfers on. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<TransferManager, TransferError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| TransferError::NoRuntime)?,
        };
        Ok(TransferManager {
            inner: Arc::new(Inner {
                chain: self.chain,
                events: self.events.unwrap_or_default(),
                services: self.services,
                admission: Mutex::new(Admission::default()),
                shutdown: CancellationToken::new(),
                pending: PendingOps::new(),
                metrics: self.metrics.unwrap_or_default(),
                runtime,
            }),
        })
    }
}

impl TransferManager {
    pub fn builder(chain: CacheChain) -> TransferManagerBuilder {
        TransferManagerBuilder {
            chain,
            events: None,
            services: TransferServices::default(),
            metrics: None,
            runtime: None,
        }
    }

    pub fn chain(&self) -> &CacheChain {
        &self.inner.chain
    }

    pub fn events(&self) -> &EventManager<TransferEvent> {
        &self.inner.events
    }

    pub fn metrics(&self) -> &Arc<TransferMetrics> {
        &self.inner.metrics
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Requests admitted and not yet delivered.
    pub fn pending_operations(&self) -> usize {
        self.inner.pending.count()
    }

    /// Chain walks in flight across all fingerprints.
    pub fn downloads_in_flight(&self) -> usize {
        self.inner.admission.lock().downloads.values().map(Vec::len).sum()
    }

    /// Per-layer cache stats, nearest first.
    pub fn cache_stats(&self) -> Vec<(&'static str, LayerStats)> {
        self.inner.chain.stats()
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Requests `range` of `id`; `listener` receives the completion once.
    ///
    /// Returns the listener's subscription, or `None` when the request was
    /// rejected and the listener has already been called.
    ///
    /// # Arguments
    ///
    /// * `id` - Content to fetch
    /// * `range` - Bytes wanted
    /// * `listener` - Called with the completion event
    pub fn download<F>(&self, id: RemoteFileId, range: Range, listener: F) -> Option<SubscriptionId>
    where
        F: FnOnce(&TransferEvent) + Send + 'static,
    {
        self.inner.metrics.download_requested();
        self.start_download(id, range, Delivery::new(listener))
    }

    /// Resolves `name` to content, then downloads `range` of it.
    ///
    /// Returns `false` when the request was rejected immediately.
    pub fn download_by_name<F>(&self, name: Url, range: Range, listener: F) -> bool
    where
        F: FnOnce(&TransferEvent) + Send + 'static,
    {
        self.inner.metrics.download_requested();
        let delivery = Delivery::new(listener);

        let Some(services) = self.inner.services.name_lookups.clone() else {
            self.inner.metrics.request_rejected();
            let event = TransferEvent::name_failure(name, range, TransferStatus::UnimplementedCapability);
            delivery.deliver(&event);
            return false;
        };
        let Some(guard) = self.admit() else {
            self.inner.metrics.request_rejected();
            let event = TransferEvent::name_failure(name, range, TransferStatus::ShutdownInProgress);
            delivery.deliver(&event);
            return false;
        };

        let manager = self.clone();
        self.inner.runtime.spawn(async move {
            let resolved = tokio::select! {
                biased;
                _ = manager.inner.shutdown.cancelled() => Err(TransferStatus::ShutdownInProgress),
                resolved = resolve_name(&services, &name) => resolved,
            };
            match resolved {
                Ok(id) => {
                    debug!(name = %name, destination = %id, "name resolved");
                    manager.start_download(id, range, delivery);
                }
                Err(status) => {
                    info!(name = %name, %status, "name lookup failed");
                    delivery.deliver(&TransferEvent::name_failure(name, range, status));
                }
            }
            // Released only after the download was admitted or reported.
            drop(guard);
        });
        true
    }

    /// Downloads `range` of `id` and waits for the result.
    pub async fn fetch(&self, id: RemoteFileId, range: Range) -> Result<SparseData, TransferStatus> {
        let (tx, rx) = oneshot::channel();
        self.download(id, range, move |event| {
            let _ = tx.send(download_outcome(event, &range));
        });
        rx.await.unwrap_or(Err(TransferStatus::ShutdownInProgress))
    }

    /// Resolves `name` and downloads `range` of it, waiting for the result.
    pub async fn fetch_by_name(&self, name: Url, range: Range) -> Result<(RemoteFileId, SparseData), TransferStatus> {
        let (tx, rx) = oneshot::channel();
        self.download_by_name(name, range, move |event| {
            let outcome = download_outcome(event, &range).and_then(|data| {
                event
                    .remote()
                    .cloned()
                    .map(|id| (id, data))
                    .ok_or(TransferStatus::NameLookupFailed)
            });
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(Err(TransferStatus::ShutdownInProgress))
    }

    /// Admits a new operation unless shutting down.
    fn admit(&self) -> Option<PendingGuard> {
        let _admission = self.inner.admission.lock();
        if self.inner.shutdown.is_cancelled() {
            return None;
        }
        Some(self.inner.pending.begin())
    }

    fn start_download(&self, id: RemoteFileId, range: Range, delivery: Arc<Delivery>) -> Option<SubscriptionId> {
        let inner = &self.inner;
        let mut admission = inner.admission.lock();
        if inner.shutdown.is_cancelled() {
            drop(admission);
            inner.metrics.request_rejected();
            debug!(fingerprint = %id.fingerprint, "download rejected during shutdown");
            let event = TransferEvent::download(id, range, TransferStatus::ShutdownInProgress, None, None);
            delivery.deliver(&event);
            return None;
        }

        let subscription = self.subscribe_download(&id.fingerprint, range, delivery);
        let walks = admission.downloads.entry(id.fingerprint).or_default();
        if let Some(covering) = walks.iter().find(|walk| walk.contains(&range)) {
            debug!(fingerprint = %id.fingerprint, range = %range, covering = %covering, "joining download in flight");
            inner.metrics.download_joined();
            return Some(subscription);
        }
        walks.push(range);
        let guard = inner.pending.begin();
        drop(admission);

        trace!(fingerprint = %id.fingerprint, range = %range, "starting chain walk");
        inner.metrics.chain_walk_started();
        let manager = self.clone();
        inner.runtime.spawn(async move { manager.walk(id, range, guard).await });
        Some(subscription)
    }

    fn subscribe_download(&self, fingerprint: &Fingerprint, range: Range, delivery: Arc<Delivery>) -> SubscriptionId {
        self.inner.events.subscribe(
            TransferEvent::download_id(fingerprint),
            EventOrder::Middle,
            move |event| {
                let Some(event) = event else {
                    return EventResponse::Nop;
                };
                if !event.satisfies(&range) {
                    return EventResponse::Nop;
                }
                delivery.deliver(event);
                EventResponse::Delete
            },
        )
    }

    async fn walk(&self, id: RemoteFileId, range: Range, guard: PendingGuard) {
        let inner = &self.inner;
        let outcome = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => Err(TransferStatus::ShutdownInProgress),
            hit = inner.chain.get_data(&id, &range) => hit.ok_or(TransferStatus::DownloadFailed),
        };
        self.finish_walk(&id.fingerprint, &range);

        let (status, data) = match outcome {
            Ok(hit) => {
                inner.metrics.download_succeeded(hit.layer, hit.data.space_used());
                (TransferStatus::Success, Some(hit.data))
            }
            Err(status) => {
                inner.metrics.download_failed();
                (status, None)
            }
        };
        if status.is_success() {
            debug!(fingerprint = %id.fingerprint, range = %range, "download complete");
        } else {
            info!(fingerprint = %id.fingerprint, range = %range, %status, "download did not complete");
        }
        inner
            .events
            .fire(TransferEvent::download(id, range, status, data, Some(guard)));
    }

    fn finish_walk(&self, fingerprint: &Fingerprint, range: &Range) {
        let mut admission = self.inner.admission.lock();
        let now_idle = match admission.downloads.get_mut(fingerprint) {
            Some(walks) => {
                if let Some(index) = walks.iter().position(|walk| walk == range) {
                    walks.swap_remove(index);
                }
                walks.is_empty()
            }
            None => false,
        };
        if now_idle {
            admission.downloads.remove(fingerprint);
        }
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Publishes content; `listener` receives the completion once.
    ///
    /// Concurrent uploads to the same target URI share one upload. Returns
    /// the listener's subscription, or `None` when the request was rejected
    /// and the listener has already been called.
    pub fn upload<F>(&self, request: UploadRequest, listener: F) -> Option<SubscriptionId>
    where
        F: FnOnce(&TransferEvent) + Send + 'static,
    {
        let inner = &self.inner;
        inner.metrics.upload_requested();
        let delivery = Delivery::new(listener);

        let mut admission = inner.admission.lock();
        if inner.shutdown.is_cancelled() {
            drop(admission);
            inner.metrics.request_rejected();
            let event = TransferEvent::upload(request.target, request.name, TransferStatus::ShutdownInProgress, None);
            delivery.deliver(&event);
            return None;
        }

        let subscription = inner.events.subscribe(
            TransferEvent::upload_id(&request.target.uri),
            EventOrder::Middle,
            move |event| match event {
                Some(event) => {
                    delivery.deliver(event);
                    EventResponse::Delete
                }
                None => EventResponse::Nop,
            },
        );
        if !admission.uploads.insert(request.target.uri.to_string()) {
            debug!(destination = %request.target.uri, "joining upload in flight");
            inner.metrics.upload_joined();
            return Some(subscription);
        }
        let guard = inner.pending.begin();
        drop(admission);

        let manager = self.clone();
        inner.runtime.spawn(async move { manager.run_upload(request, guard).await });
        Some(subscription)
    }

    /// Publishes content and waits for the outcome.
    pub async fn publish(&self, request: UploadRequest) -> TransferStatus {
        let (tx, rx) = oneshot::channel();
        self.upload(request, move |event| {
            let _ = tx.send(event.status());
        });
        rx.await.unwrap_or(TransferStatus::ShutdownInProgress)
    }

    /// Deletes content from the upload services and every local layer.
    ///
    /// Counts as pending work until it returns, so `cleanup` waits for it.
    pub async fn remove(&self, target: &RemoteFileId) -> TransferStatus {
        let Some(_guard) = self.admit() else {
            self.inner.metrics.request_rejected();
            return TransferStatus::ShutdownInProgress;
        };
        self.purge(&target.fingerprint).await;
        let Some(services) = &self.inner.services.uploads else {
            return TransferStatus::UnimplementedCapability;
        };
        let removed = try_candidates(services, &target.uri, "remove", |handler, candidate| {
            Box::pin(async move { handler.remove(&candidate.uri, &candidate.params).await })
        })
        .await;
        match removed {
            Ok(()) => TransferStatus::Success,
            Err(reason) => TransferStatus::from_exhausted(reason, TransferStatus::UploadFailed),
        }
    }

    async fn run_upload(&self, request: UploadRequest, guard: PendingGuard) {
        let inner = &self.inner;
        let mut state = UploadState::initial(&request);
        if state.is_done() {
            warn!(destination = %request.target, "upload data does not match its fingerprint");
        }

        let status = loop {
            let next = match state {
                UploadState::Done(status) => break status,
                current => tokio::select! {
                    biased;
                    _ = inner.shutdown.cancelled() => UploadState::Done(TransferStatus::ShutdownInProgress),
                    next = self.upload_step(current, &request) => next,
                },
            };
            trace!(destination = %request.target.uri, from = ?state, to = ?next, "upload transition");
            state = next;
        };

        inner
            .admission
            .lock()
            .uploads
            .remove(request.target.uri.as_str());
        inner.metrics.upload_finished(status.is_success());
        info!(destination = %request.target.uri, %status, "upload finished");
        inner.events.fire(TransferEvent::upload(
            request.target,
            request.name,
            status,
            Some(guard),
        ));
    }

    async fn upload_step(&self, state: UploadState, request: &UploadRequest) -> UploadState {
        match state {
            UploadState::CheckExistence => {
                if self.exists_remotely(&request.target).await {
                    debug!(destination = %request.target.uri, "content already present, skipping upload");
                    UploadState::UploadName
                } else {
                    UploadState::UploadData
                }
            }
            UploadState::UploadData => match self.upload_data(request).await {
                Ok(()) => UploadState::UploadName,
                Err(status) => UploadState::Done(status),
            },
            UploadState::UploadName => match &request.name {
                None => UploadState::Done(TransferStatus::Success),
                Some(name) => match self.upload_name(name, &request.target).await {
                    Ok(()) => UploadState::Done(TransferStatus::Success),
                    Err(status) => UploadState::Done(status),
                },
            },
            done @ UploadState::Done(_) => done,
        }
    }

    async fn exists_remotely(&self, target: &RemoteFileId) -> bool {
        let Some(services) = &self.inner.services.downloads else {
            return false;
        };
        try_candidates(services, &target.uri, "exists", |handler, candidate| {
            Box::pin(async move {
                match handler.exists(&candidate.uri, &candidate.params).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(ServiceError::NotFound(candidate.uri.to_string())),
                    Err(e) => Err(e),
                }
            })
        })
        .await
        .is_ok()
    }

    async fn upload_data(&self, request: &UploadRequest) -> Result<(), TransferStatus> {
        let Some(services) = &self.inner.services.uploads else {
            return Err(TransferStatus::UnimplementedCapability);
        };
        let data = request.data.clone();
        try_candidates(services, &request.target.uri, "upload", move |handler, candidate| {
            let data: Bytes = data.clone();
            Box::pin(async move { handler.upload(&candidate.uri, &candidate.params, data).await })
        })
        .await
        .map_err(|reason| TransferStatus::from_exhausted(reason, TransferStatus::UploadFailed))?;

        // Published content is served locally from now on.
        let local = SparseData::from_dense(DenseData::whole_file(request.data.clone()));
        self.inner
            .chain
            .add_to_cache(&request.target.fingerprint, &local)
            .await;
        Ok(())
    }

    async fn upload_name(&self, name: &Url, target: &RemoteFileId) -> Result<(), TransferStatus> {
        let Some(services) = &self.inner.services.name_uploads else {
            return Err(TransferStatus::UnimplementedCapability);
        };
        let target = target.clone();
        try_candidates(services, name, "name upload", move |handler, candidate| {
            let target = target.clone();
            Box::pin(async move {
                handler
                    .upload_name(&candidate.uri, &candidate.params, &target)
                    .await
            })
        })
        .await
        .map_err(|reason| TransferStatus::from_exhausted(reason, TransferStatus::NameUploadFailed))
    }

    // =========================================================================
    // Cache maintenance and shutdown
    // =========================================================================

    /// Removes `fingerprint` from every cache layer.
    pub async fn purge(&self, fingerprint: &Fingerprint) -> usize {
        self.inner.chain.purge_from_cache(0, fingerprint).await
    }

    /// Stops accepting work and waits until every admitted request has been
    /// delivered.
    ///
    /// Walks and uploads still running end with `ShutdownInProgress`.
    /// Calling it again returns once the manager is idle.
    pub async fn cleanup(&self) {
        {
            let _admission = self.inner.admission.lock();
            self.inner.shutdown.cancel();
        }
        info!(pending = self.inner.pending.count(), "transfer manager shutting down");
        self.inner.pending.wait_idle().await;
        info!("transfer manager drained");
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("chain", &self.inner.chain)
            .field("pending", &self.inner.pending.count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

fn download_outcome(event: &TransferEvent, range: &Range) -> Result<SparseData, TransferStatus> {
    match event.status() {
        TransferStatus::Success => event.data_for(range).ok_or(TransferStatus::DownloadFailed),
        status => Err(status),
    }
}

async fn resolve_name(services: &NameLookupServices, name: &Url) -> Result<RemoteFileId, TransferStatus> {
    try_candidates(services, name, "name lookup", |handler, candidate| {
        Box::pin(async move { handler.lookup_name(&candidate.uri, &candidate.params).await })
    })
    .await
    .map_err(|reason| TransferStatus::from_exhausted(reason, TransferStatus::NameLookupFailed))
}

/// Calls `call` on each candidate for `uri` until one succeeds.
///
/// Returns the last failure reason when every candidate failed, or
/// [`ServiceOutcome::Unsupported`] when there was no candidate at all.
async fn try_candidates<H, T, F>(
    services: &ServiceManager<H>,
    uri: &Url,
    operation: &'static str,
    mut call: F,
) -> Result<T, ServiceOutcome>
where
    H: ?Sized + Send + Sync + 'static,
    T: Send,
    F: FnMut(Arc<H>, ServiceCandidate) -> BoxFuture<'static, Result<T, ServiceError>> + Send,
{
    let mut cursor = services.resolve(uri);
    let mut reason = ServiceOutcome::Success;
    while let Some((candidate, handler)) = cursor.next(reason) {
        let attempted = candidate.uri.clone();
        match call(handler, candidate).await {
            Ok(value) => {
                cursor.finish(ServiceOutcome::Success);
                return Ok(value);
            }
            Err(e) => {
                debug!(operation, uri = %attempted, error = %e, "service candidate failed");
                reason = e.outcome();
            }
        }
    }
    if cursor.tried() == 0 {
        reason = ServiceOutcome::Unsupported;
    }
    cursor.finish(reason);
    Err(reason)
}
