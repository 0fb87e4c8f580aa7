//! Configuration file handling.
//!
//! Settings live in an INI file at `<config dir>/assetlayer/config.ini`
//! (see [`ConfigFile`] for the layout). Individual settings are addressed
//! as `section.key` through [`ConfigKey`], which backs the CLI's
//! `config get|set|list` commands.

use std::path::PathBuf;

use thiserror::Error;

mod file;
mod keys;
mod size;

pub use file::{
    config_file_path, context_for, CacheSettings, ConfigFile, TransferSettings,
    DEFAULT_DISK_SIZE, DEFAULT_MAX_FRACTION, DEFAULT_MEMORY_SIZE, DEFAULT_WORKERS,
};
pub use keys::ConfigKey;
pub use size::{format_size, parse_size};

/// Errors loading, saving or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid size '{0}' (expected e.g. 512MB or 2GB)")]
    InvalidSize(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}
