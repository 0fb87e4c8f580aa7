//! Application configuration for AssetLayerApp.
//!
//! `AppConfig` gathers everything needed to assemble the cache chain and the
//! transfer manager. It is usually built from the user's [`ConfigFile`].

use std::path::PathBuf;

use url::Url;

use crate::config::{ConfigError, ConfigFile, DEFAULT_MAX_FRACTION};
use crate::protocol::DEFAULT_TIMEOUT_SECS;
use crate::service::ListOfServices;

/// Memory layer settings.
#[derive(Clone, Debug)]
pub struct MemoryCacheAppConfig {
    pub max_size_bytes: u64,
    pub max_fraction: f64,
}

impl Default for MemoryCacheAppConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: crate::config::DEFAULT_MEMORY_SIZE,
            max_fraction: DEFAULT_MAX_FRACTION,
        }
    }
}

/// Disk layer settings.
#[derive(Clone, Debug)]
pub struct DiskCacheAppConfig {
    pub directory: PathBuf,
    pub max_size_bytes: u64,
    pub max_fraction: f64,
}

impl DiskCacheAppConfig {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            max_size_bytes: crate::config::DEFAULT_DISK_SIZE,
            max_fraction: DEFAULT_MAX_FRACTION,
        }
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }
}

/// Top-level configuration passed to `AssetLayerApp::start()`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub memory_cache: MemoryCacheAppConfig,

    /// `None` runs without a disk layer.
    pub disk_cache: Option<DiskCacheAppConfig>,

    /// Event dispatch threads; 0 dispatches on the completing task.
    pub workers: usize,

    /// Service lists per context URI.
    pub services: Vec<(Url, ListOfServices)>,

    /// Timeout for HTTP requests, in seconds.
    pub http_timeout_secs: u64,

    /// Check whole-file downloads against their fingerprint.
    pub verify_downloads: bool,
}

impl AppConfig {
    /// Creates a config with default cache sizes and no services.
    ///
    /// # Arguments
    ///
    /// * `cache_dir` - Directory for the disk layer
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            memory_cache: MemoryCacheAppConfig::default(),
            disk_cache: Some(DiskCacheAppConfig::new(cache_dir)),
            workers: crate::config::DEFAULT_WORKERS,
            services: Vec::new(),
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            verify_downloads: true,
        }
    }

    /// Creates application config from the configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Result<Self, ConfigError> {
        Ok(Self {
            memory_cache: MemoryCacheAppConfig {
                max_size_bytes: config.cache.memory_size,
                max_fraction: config.cache.max_fraction,
            },
            disk_cache: Some(DiskCacheAppConfig {
                directory: config.cache.directory.clone(),
                max_size_bytes: config.cache.disk_size,
                max_fraction: config.cache.max_fraction,
            }),
            workers: config.transfer.workers,
            services: config.service_contexts()?,
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            verify_downloads: true,
        })
    }

    pub fn with_memory_cache_size(mut self, size_bytes: u64) -> Self {
        self.memory_cache.max_size_bytes = size_bytes;
        self
    }

    pub fn with_disk_cache_size(mut self, size_bytes: u64) -> Self {
        if let Some(disk) = self.disk_cache.as_mut() {
            disk.max_size_bytes = size_bytes;
        }
        self
    }

    /// Runs with memory and network layers only.
    pub fn without_disk_cache(mut self) -> Self {
        self.disk_cache = None;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Adds a service list for `context`.
    pub fn with_services(mut self, context: Url, services: ListOfServices) -> Self {
        self.services.push((context, services));
        self
    }
}
