//! In-memory service used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assetlayer::app::ProtocolHandlers;
use assetlayer::fingerprint::RemoteFileId;
use assetlayer::range::Range;
use assetlayer::service::{
    CachedServiceLookup, DownloadHandler, Downloaded, NameLookupHandler, NameUploadHandler,
    NullServiceLookup, ServiceEntry, ServiceError, ServiceLookup, ServiceManager, ServiceParams,
    UploadHandler,
};
use assetlayer::transfer::TransferServices;
use assetlayer::BoxFuture;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

pub const PAGE: &[u8] = b"<HTML>\r\n<HEAD>\r\n</HEAD></HTML>";

/// Files and names held in memory under `mem://<host>/...`.
///
/// The host `denied` refuses every call.
#[derive(Default)]
pub struct MemStore {
    files: Mutex<HashMap<String, Bytes>>,
    names: Mutex<HashMap<String, RemoteFileId>>,
    delay: Mutex<Duration>,
    pub downloads: AtomicUsize,
    pub uploads: AtomicUsize,
    pub name_uploads: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let store = Self::new();
        *store.delay.lock() = delay;
        store
    }

    pub fn put(&self, uri: &str, data: &[u8]) {
        self.files
            .lock()
            .insert(uri.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn get(&self, uri: &str) -> Option<Bytes> {
        self.files.lock().get(uri).cloned()
    }

    pub fn name(&self, name: &str, target: RemoteFileId) {
        self.names.lock().insert(name.to_string(), target);
    }

    pub fn resolved(&self, name: &str) -> Option<RemoteFileId> {
        self.names.lock().get(name).cloned()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    async fn pause(&self, uri: &Url) -> Result<(), ServiceError> {
        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;
        if uri.host_str() == Some("denied") {
            return Err(ServiceError::Forbidden(uri.to_string()));
        }
        Ok(())
    }
}

impl DownloadHandler for MemStore {
    fn download<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
        range: &'a Range,
    ) -> BoxFuture<'a, Result<Downloaded, ServiceError>> {
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.pause(uri).await?;
            let file = self
                .get(uri.as_str())
                .ok_or_else(|| ServiceError::NotFound(uri.to_string()))?;
            let len = file.len() as u64;
            let start = range.start().min(len);
            let end = if range.goes_to_eof() {
                len
            } else {
                range.end_byte().min(len)
            };
            Ok(Downloaded {
                data: file.slice(start as usize..end as usize),
                total_size: Some(len),
            })
        })
    }

    fn exists<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            self.pause(uri).await?;
            Ok(self.get(uri.as_str()).is_some())
        })
    }
}

impl UploadHandler for MemStore {
    fn upload<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            self.pause(uri).await?;
            self.files.lock().insert(uri.to_string(), data);
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.pause(uri).await?;
            match self.files.lock().remove(uri.as_str()) {
                Some(_) => Ok(()),
                None => Err(ServiceError::NotFound(uri.to_string())),
            }
        })
    }
}

impl NameLookupHandler for MemStore {
    fn lookup_name<'a>(
        &'a self,
        name: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<RemoteFileId, ServiceError>> {
        Box::pin(async move {
            self.pause(name).await?;
            self.resolved(name.as_str())
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))
        })
    }
}

impl NameUploadHandler for MemStore {
    fn upload_name<'a>(
        &'a self,
        name: &'a Url,
        _params: &'a ServiceParams,
        target: &'a RemoteFileId,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.name_uploads.fetch_add(1, Ordering::SeqCst);
            self.pause(name).await?;
            self.name(name.as_str(), target.clone());
            Ok(())
        })
    }
}

/// Registries with `store` serving the `mem` scheme for every capability.
pub fn mem_handlers(store: &Arc<MemStore>) -> ProtocolHandlers {
    let handlers = ProtocolHandlers::empty();
    handlers.downloads.register("mem", store.clone());
    handlers.uploads.register("mem", store.clone());
    handlers.name_lookups.register("mem", store.clone());
    handlers.name_uploads.register("mem", store.clone());
    handlers
}

/// Service lookup sending `mhash:///` to `bases`.
pub fn lookup_for(bases: &[&str]) -> Arc<dyn ServiceLookup> {
    let lookup = CachedServiceLookup::new(Some(Arc::new(NullServiceLookup)));
    lookup.add_to_cache(&hash_context(), service_list(bases));
    Arc::new(lookup)
}

pub fn service_list(bases: &[&str]) -> Vec<ServiceEntry> {
    bases
        .iter()
        .map(|b| ServiceEntry::new(Url::parse(b).unwrap()))
        .collect()
}

/// Transfer services over `handlers`, resolving through `lookup`.
pub fn transfer_services(handlers: &ProtocolHandlers, lookup: Arc<dyn ServiceLookup>) -> TransferServices {
    TransferServices {
        downloads: Some(ServiceManager::new(lookup.clone(), handlers.downloads.clone())),
        uploads: Some(ServiceManager::new(lookup.clone(), handlers.uploads.clone())),
        name_lookups: Some(ServiceManager::new(lookup.clone(), handlers.name_lookups.clone())),
        name_uploads: Some(ServiceManager::new(lookup, handlers.name_uploads.clone())),
    }
}

pub fn hash_context() -> Url {
    Url::parse("mhash:///").unwrap()
}
