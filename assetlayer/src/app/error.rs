//! Application error types.

use thiserror::Error;

use crate::cache::DiskCacheError;
use crate::config::ConfigError;
use crate::service::ServiceError;
use crate::transfer::TransferError;

/// Errors that can occur during application start-up.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open disk cache: {0}")]
    DiskCacheStart(#[from] DiskCacheError),

    #[error("failed to create protocol handler: {0}")]
    Handler(#[from] ServiceError),

    #[error("failed to create transfer manager: {0}")]
    Transfer(#[from] TransferError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start event workers: {0}")]
    Workers(std::io::Error),

    #[error("start-up task failed: {0}")]
    Runtime(String),
}
