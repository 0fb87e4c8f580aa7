//! Settable configuration keys in `section.key` form.

use std::fmt;
use std::str::FromStr;

use super::file::{expand_home, join_bases, parse_fraction, parse_service_bases, ConfigFile};
use super::size::{format_size, parse_size};
use super::ConfigError;

/// A configuration key addressable from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    CacheMemorySize,
    CacheDiskSize,
    CacheDirectory,
    CacheMaxFraction,
    TransferWorkers,
    /// `services.<context>`: service bases for one context.
    Service(String),
}

impl ConfigKey {
    /// The fixed keys, in display order.
    pub fn all() -> Vec<ConfigKey> {
        vec![
            ConfigKey::CacheMemorySize,
            ConfigKey::CacheDiskSize,
            ConfigKey::CacheDirectory,
            ConfigKey::CacheMaxFraction,
            ConfigKey::TransferWorkers,
        ]
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::CacheMemorySize
            | ConfigKey::CacheDiskSize
            | ConfigKey::CacheDirectory
            | ConfigKey::CacheMaxFraction => "cache",
            ConfigKey::TransferWorkers => "transfer",
            ConfigKey::Service(_) => "services",
        }
    }

    pub fn key_name(&self) -> &str {
        match self {
            ConfigKey::CacheMemorySize => "memory_size",
            ConfigKey::CacheDiskSize => "disk_size",
            ConfigKey::CacheDirectory => "directory",
            ConfigKey::CacheMaxFraction => "max_fraction",
            ConfigKey::TransferWorkers => "workers",
            ConfigKey::Service(context) => context,
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as displayed to users; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::CacheMemorySize => format_size(config.cache.memory_size),
            ConfigKey::CacheDiskSize => format_size(config.cache.disk_size),
            ConfigKey::CacheDirectory => config.cache.directory.display().to_string(),
            ConfigKey::CacheMaxFraction => config.cache.max_fraction.to_string(),
            ConfigKey::TransferWorkers => config.transfer.workers.to_string(),
            ConfigKey::Service(context) => config
                .services
                .get(context)
                .map(|bases| join_bases(bases))
                .unwrap_or_default(),
        }
    }

    /// Validates `value` and stores it in `config`.
    ///
    /// Setting a service key to an empty value removes the context.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        match self {
            ConfigKey::CacheMemorySize => config.cache.memory_size = parse_size(value)?,
            ConfigKey::CacheDiskSize => config.cache.disk_size = parse_size(value)?,
            ConfigKey::CacheDirectory => config.cache.directory = expand_home(value),
            ConfigKey::CacheMaxFraction => {
                config.cache.max_fraction = parse_fraction(&self.name(), value)?
            }
            ConfigKey::TransferWorkers => {
                config.transfer.workers =
                    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                        key: self.name(),
                        value: value.to_string(),
                        reason: "expected a whole number".to_string(),
                    })?
            }
            ConfigKey::Service(context) => {
                let bases = parse_service_bases(context, value)?;
                if bases.is_empty() {
                    config.services.remove(context);
                } else {
                    config.services.insert(context.clone(), bases);
                }
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownKey(s.to_string());
        let (section, key) = s.trim().split_once('.').ok_or_else(unknown)?;
        let section = section.to_ascii_lowercase();
        if section == "services" {
            if key.is_empty() {
                return Err(unknown());
            }
            return Ok(ConfigKey::Service(key.to_string()));
        }
        ConfigKey::all()
            .into_iter()
            .find(|k| k.section() == section && k.key_name().eq_ignore_ascii_case(key))
            .ok_or_else(unknown)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}
