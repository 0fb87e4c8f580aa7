//! Capability interfaces for remote services.
//!
//! Each trait is one narrow capability a protocol implementation may offer.
//! A single type often implements several (a local filesystem backend can
//! download, upload and resolve names), and callers hold them through
//! separate [`ProtocolRegistry`](super::ProtocolRegistry) instances so a
//! scheme that cannot upload simply has no upload handler.

use bytes::Bytes;
use thiserror::Error;

use super::lookup::{ServiceOutcome, ServiceParams};
use crate::fingerprint::RemoteFileId;
use crate::range::Range;
use crate::BoxFuture;

/// Failure of one service call.
///
/// These never reach the application directly: the transfer manager retries
/// the next candidate and only reports a status once every candidate failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("operation not supported by {0}")]
    Unsupported(String),

    #[error("{0}")]
    General(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Forbidden(String),
}

impl ServiceError {
    /// The reason reported back to the service lookup.
    pub fn outcome(&self) -> ServiceOutcome {
        match self {
            ServiceError::Unsupported(_) => ServiceOutcome::Unsupported,
            ServiceError::General(_) => ServiceOutcome::GeneralError,
            ServiceError::Network(_) => ServiceOutcome::NetworkError,
            ServiceError::NotFound(_) => ServiceOutcome::NotFound,
            ServiceError::Forbidden(_) => ServiceOutcome::Forbidden,
        }
    }
}

/// Bytes returned by a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// Data starting at the requested range's start byte.
    pub data: Bytes,
    /// Size of the whole file, when the service reports it.
    pub total_size: Option<u64>,
}

pub trait DownloadHandler: Send + Sync {
    /// Fetches `range` of the file at `uri`.
    ///
    /// A service may return fewer bytes than requested when the file ends
    /// before the range does.
    fn download<'a>(
        &'a self,
        uri: &'a url::Url,
        params: &'a ServiceParams,
        range: &'a Range,
    ) -> BoxFuture<'a, Result<Downloaded, ServiceError>>;

    /// Whether the file at `uri` exists.
    fn exists<'a>(
        &'a self,
        uri: &'a url::Url,
        params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<bool, ServiceError>>;

    /// Whether the handler delivers bytes strictly in order.
    fn in_order_stream(&self) -> bool {
        true
    }
}

pub trait UploadHandler: Send + Sync {
    /// Stores `data` at `uri`, replacing any existing file.
    fn upload<'a>(
        &'a self,
        uri: &'a url::Url,
        params: &'a ServiceParams,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Deletes the file at `uri`.
    fn remove<'a>(
        &'a self,
        uri: &'a url::Url,
        params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// Resolves a human-readable name to content.
pub trait NameLookupHandler: Send + Sync {
    fn lookup_name<'a>(
        &'a self,
        name: &'a url::Url,
        params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<RemoteFileId, ServiceError>>;
}

/// Registers a name for already uploaded content.
pub trait NameUploadHandler: Send + Sync {
    fn upload_name<'a>(
        &'a self,
        name: &'a url::Url,
        params: &'a ServiceParams,
        target: &'a RemoteFileId,
    ) -> BoxFuture<'a, Result<(), ServiceError>>;
}
