//! CLI error type.

use assetlayer::app::AppError;
use assetlayer::config::ConfigError;
use assetlayer::logging::LoggingError;
use assetlayer::transfer::TransferStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transfer failed: {0}")]
    Transfer(TransferStatus),

    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::Transfer(_) => 3,
            _ => 1,
        }
    }
}
