//! The `config.ini` file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::{debug, info};
use url::Url;

use super::size::{format_size_exact, parse_size};
use super::ConfigError;
use crate::service::{ListOfServices, ServiceEntry};

pub const DEFAULT_MEMORY_SIZE: u64 = 512 * 1024 * 1024;
pub const DEFAULT_DISK_SIZE: u64 = 4 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_FRACTION: f64 = 0.25;
pub const DEFAULT_WORKERS: usize = 2;

const CACHE_SECTION: &str = "cache";
const TRANSFER_SECTION: &str = "transfer";
const SERVICES_SECTION: &str = "services";

/// Path of the configuration file, `<config dir>/assetlayer/config.ini`.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.ini")
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("assetlayer")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("assetlayer")
}

/// `[cache]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub memory_size: u64,
    pub disk_size: u64,
    pub directory: PathBuf,
    /// Largest share of a layer's budget one file may take.
    pub max_fraction: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            disk_size: DEFAULT_DISK_SIZE,
            directory: default_cache_dir(),
            max_fraction: DEFAULT_MAX_FRACTION,
        }
    }
}

/// `[transfer]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Event dispatch threads; 0 dispatches on the completing task.
    pub workers: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Parsed `config.ini`.
///
/// ```ini
/// [cache]
/// memory_size = 512MB
/// disk_size = 4GB
/// directory = /var/cache/assetlayer
/// max_fraction = 0.25
///
/// [transfer]
/// workers = 2
///
/// [services]
/// mhash = https://mirror-a.example/files/, file:///srv/assets/
/// ```
///
/// Every key of `[services]` names a context `<key>:///`; requests under
/// that context are tried against the listed bases in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub transfer: TransferSettings,
    /// Service bases per context key.
    pub services: BTreeMap<String, Vec<Url>>,
}

impl ConfigFile {
    /// Loads the default configuration file.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some(CACHE_SECTION)) {
            if let Some(v) = section.get("memory_size") {
                config.cache.memory_size = parse_size(v)?;
            }
            if let Some(v) = section.get("disk_size") {
                config.cache.disk_size = parse_size(v)?;
            }
            if let Some(v) = section.get("directory") {
                config.cache.directory = expand_home(v);
            }
            if let Some(v) = section.get("max_fraction") {
                config.cache.max_fraction = parse_fraction("cache.max_fraction", v)?;
            }
        }

        if let Some(section) = ini.section(Some(TRANSFER_SECTION)) {
            if let Some(v) = section.get("workers") {
                config.transfer.workers = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "transfer.workers".to_string(),
                    value: v.to_string(),
                    reason: "expected a whole number".to_string(),
                })?;
            }
        }

        if let Some(section) = ini.section(Some(SERVICES_SECTION)) {
            for (key, value) in section.iter() {
                config.services.insert(key.to_string(), parse_service_bases(key, value)?);
            }
        }

        Ok(config)
    }

    /// Saves to the default configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.to_ini().write_to_file(path)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some(CACHE_SECTION))
            .set("memory_size", format_size_exact(self.cache.memory_size))
            .set("disk_size", format_size_exact(self.cache.disk_size))
            .set("directory", self.cache.directory.to_string_lossy())
            .set("max_fraction", self.cache.max_fraction.to_string());
        ini.with_section(Some(TRANSFER_SECTION))
            .set("workers", self.transfer.workers.to_string());
        for (key, bases) in &self.services {
            ini.with_section(Some(SERVICES_SECTION))
                .set(key.as_str(), join_bases(bases));
        }
        ini
    }

    /// Service lists per context URI, ready for a service lookup.
    pub fn service_contexts(&self) -> Result<Vec<(Url, ListOfServices)>, ConfigError> {
        self.services
            .iter()
            .map(|(key, bases)| {
                let context = context_for(key)?;
                let list = bases.iter().cloned().map(ServiceEntry::new).collect();
                Ok((context, list))
            })
            .collect()
    }
}

/// The context URI `<key>:///` a services key stands for.
pub fn context_for(key: &str) -> Result<Url, ConfigError> {
    Url::parse(&format!("{key}:///")).map_err(|e| ConfigError::InvalidValue {
        key: format!("services.{key}"),
        value: key.to_string(),
        reason: format!("not usable as a URI scheme: {e}"),
    })
}

/// Parses a comma-separated list of service base URLs.
///
/// Bases are directories, so a missing trailing slash is added.
pub(crate) fn parse_service_bases(key: &str, value: &str) -> Result<Vec<Url>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let with_slash = if s.ends_with('/') {
                s.to_string()
            } else {
                format!("{s}/")
            };
            Url::parse(&with_slash).map_err(|e| ConfigError::InvalidValue {
                key: format!("services.{key}"),
                value: s.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

pub(crate) fn join_bases(bases: &[Url]) -> String {
    bases
        .iter()
        .map(Url::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn parse_fraction(key: &str, value: &str) -> Result<f64, ConfigError> {
    let fraction: f64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a number".to_string(),
    })?;
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than 0 and at most 1".to_string(),
        });
    }
    Ok(fraction)
}

pub(crate) fn expand_home(value: &str) -> PathBuf {
    let value = value.trim();
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
