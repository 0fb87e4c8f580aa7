//! Application bootstrap implementation.
//!
//! `AssetLayerApp` assembles the cache chain, the protocol handlers and the
//! transfer manager in the right order, and tears them down so that every
//! outstanding request is answered before the event workers stop.

use std::sync::Arc;

use tracing::{info, warn};

use super::config::AppConfig;
use super::error::AppError;
use crate::cache::{CacheChain, CacheLayer, DiskCacheLayer, LayerStats, MemoryCacheLayer, NetworkCacheLayer};
use crate::fingerprint::Fingerprint;
use crate::protocol::{FileProtocolHandler, HttpDownloadHandler};
use crate::service::{
    CachedServiceLookup, DownloadHandler, NameLookupHandler, NameUploadHandler, NullServiceLookup,
    ProtocolRegistry, ServiceError, ServiceLookup, ServiceManager, UploadHandler,
};
use crate::task::{EventManager, WorkQueue, WorkerPool};
use crate::telemetry::TransferMetrics;
use crate::transfer::{TransferManager, TransferServices};

/// Protocol handler registries, one per capability.
#[derive(Clone)]
pub struct ProtocolHandlers {
    pub downloads: Arc<ProtocolRegistry<dyn DownloadHandler>>,
    pub uploads: Arc<ProtocolRegistry<dyn UploadHandler>>,
    pub name_lookups: Arc<ProtocolRegistry<dyn NameLookupHandler>>,
    pub name_uploads: Arc<ProtocolRegistry<dyn NameUploadHandler>>,
}

impl ProtocolHandlers {
    /// Registries with no handlers.
    pub fn empty() -> Self {
        Self {
            downloads: Arc::new(ProtocolRegistry::new()),
            uploads: Arc::new(ProtocolRegistry::new()),
            name_lookups: Arc::new(ProtocolRegistry::new()),
            name_uploads: Arc::new(ProtocolRegistry::new()),
        }
    }

    /// `file` for every capability, `http`/`https` for downloads.
    pub fn with_defaults(http_timeout_secs: u64) -> Result<Self, ServiceError> {
        let handlers = Self::empty();
        let file = Arc::new(FileProtocolHandler::new());
        handlers.downloads.register("file", file.clone());
        handlers.uploads.register("file", file.clone());
        handlers.name_lookups.register("file", file.clone());
        handlers.name_uploads.register("file", file);

        let http = Arc::new(HttpDownloadHandler::with_timeout(http_timeout_secs)?);
        handlers.downloads.register("http", http.clone());
        handlers.downloads.register("https", http);
        Ok(handlers)
    }
}

/// A running transfer engine with its caches.
///
/// # Example
///
/// ```ignore
/// use assetlayer::app::{AssetLayerApp, AppConfig};
///
/// let config = AppConfig::from_config_file(&ConfigFile::load()?)?;
/// let app = AssetLayerApp::start(config).await?;
///
/// let data = app.transfer().fetch(id, Range::whole_file()).await;
///
/// app.shutdown().await;
/// ```
pub struct AssetLayerApp {
    transfer: TransferManager,
    lookup: Arc<CachedServiceLookup>,
    memory: Arc<MemoryCacheLayer>,
    disk: Option<Arc<DiskCacheLayer>>,
    network: Arc<NetworkCacheLayer>,
    handlers: ProtocolHandlers,
    workers: Option<WorkerPool>,
    config: AppConfig,
}

impl AssetLayerApp {
    /// Starts the application with the default protocol handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler, the disk cache or the event workers
    /// cannot be created.
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        let handlers = ProtocolHandlers::with_defaults(config.http_timeout_secs)?;
        Self::start_with_handlers(config, handlers).await
    }

    /// Starts the application with caller-supplied protocol handlers.
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration
    /// * `handlers` - Registries consulted for every service call
    pub async fn start_with_handlers(config: AppConfig, handlers: ProtocolHandlers) -> Result<Self, AppError> {
        info!("Starting AssetLayerApp");

        // 1. Service resolution
        let lookup = Arc::new(CachedServiceLookup::new(Some(Arc::new(NullServiceLookup))));
        for (context, services) in &config.services {
            info!(context = %context, services = services.len(), "registering services");
            lookup.add_to_cache(context, services.clone());
        }
        let shared_lookup: Arc<dyn ServiceLookup> = lookup.clone();
        let downloads = ServiceManager::new(Arc::clone(&shared_lookup), Arc::clone(&handlers.downloads));
        let services = TransferServices {
            downloads: Some(downloads.clone()),
            uploads: Some(ServiceManager::new(Arc::clone(&shared_lookup), Arc::clone(&handlers.uploads))),
            name_lookups: Some(ServiceManager::new(Arc::clone(&shared_lookup), Arc::clone(&handlers.name_lookups))),
            name_uploads: Some(ServiceManager::new(shared_lookup, Arc::clone(&handlers.name_uploads))),
        };

        // 2. Cache layers, nearest first
        let memory = Arc::new(MemoryCacheLayer::new(
            config.memory_cache.max_size_bytes,
            config.memory_cache.max_fraction,
        ));
        info!(max_size_bytes = config.memory_cache.max_size_bytes, "Memory cache layer ready");

        let disk = match &config.disk_cache {
            Some(disk_config) => {
                let disk_config = disk_config.clone();
                let layer = tokio::task::spawn_blocking(move || {
                    DiskCacheLayer::open(&disk_config.directory, disk_config.max_size_bytes, disk_config.max_fraction)
                })
                .await
                .map_err(|e| AppError::Runtime(e.to_string()))??;
                info!(
                    directory = %layer.directory().display(),
                    entries = layer.stats().entries,
                    "Disk cache layer ready"
                );
                Some(Arc::new(layer))
            }
            None => None,
        };

        let network = Arc::new(NetworkCacheLayer::new(downloads).verify_whole_files(config.verify_downloads));

        let mut layers: Vec<Arc<dyn CacheLayer>> = vec![memory.clone()];
        if let Some(disk) = &disk {
            layers.push(disk.clone());
        }
        layers.push(network.clone());
        let chain = CacheChain::new(layers);

        // 3. Event dispatch
        let (events, workers) = if config.workers > 0 {
            let queue = Arc::new(WorkQueue::new());
            let pool = WorkerPool::start(Arc::clone(&queue), config.workers, "assetlayer-events")
                .map_err(AppError::Workers)?;
            (EventManager::with_queue(queue), Some(pool))
        } else {
            (EventManager::new(), None)
        };

        // 4. Transfer manager
        let transfer = TransferManager::builder(chain)
            .events(events)
            .services(services)
            .metrics(Arc::new(TransferMetrics::new()))
            .build()?;

        info!(chain = ?transfer.chain(), workers = config.workers, "AssetLayerApp started");

        Ok(Self {
            transfer,
            lookup,
            memory,
            disk,
            network,
            handlers,
            workers,
            config,
        })
    }

    pub fn transfer(&self) -> &TransferManager {
        &self.transfer
    }

    /// The configured service contexts; more can be added at run time.
    pub fn lookup(&self) -> &Arc<CachedServiceLookup> {
        &self.lookup
    }

    pub fn handlers(&self) -> &ProtocolHandlers {
        &self.handlers
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCacheLayer> {
        &self.memory
    }

    pub fn disk_cache(&self) -> Option<&Arc<DiskCacheLayer>> {
        self.disk.as_ref()
    }

    pub fn network(&self) -> &Arc<NetworkCacheLayer> {
        &self.network
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Per-layer cache stats, nearest first.
    pub fn cache_stats(&self) -> Vec<(&'static str, LayerStats)> {
        self.transfer.cache_stats()
    }

    /// Removes `fingerprint` from every cache layer.
    pub async fn purge(&self, fingerprint: &Fingerprint) -> usize {
        self.transfer.purge(fingerprint).await
    }

    /// Deletes everything in the disk layer. Returns the number of entries removed.
    pub async fn clear_disk_cache(&self) -> usize {
        match &self.disk {
            Some(disk) => disk.clear().await,
            None => 0,
        }
    }

    /// Gracefully shuts down the application.
    ///
    /// Waits for every admitted request to be answered, then stops the event
    /// workers.
    pub async fn shutdown(mut self) {
        info!("Shutting down AssetLayerApp");
        self.transfer.cleanup().await;

        if let Some(pool) = self.workers.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
                warn!(error = %e, "event worker shutdown failed");
            }
        }
        info!(metrics = %self.transfer.metrics().snapshot(), "AssetLayerApp shutdown complete");
    }
}
