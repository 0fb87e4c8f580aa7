//! Terminal transfer outcomes.

use std::fmt;

use crate::service::ServiceOutcome;

/// How a download or upload ended.
///
/// Every request ends in exactly one status, delivered inside a
/// [`TransferEvent`](super::TransferEvent). Individual service failures are
/// retried and never show up here; only exhaustion of every candidate does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Success,
    NameLookupFailed,
    DownloadFailed,
    UploadFailed,
    NameUploadFailed,
    /// The last candidate refused access.
    AuthFailed,
    /// The manager was shutting down when the request arrived or ran.
    ShutdownInProgress,
    /// No handler is registered for a required capability.
    UnimplementedCapability,
}

impl TransferStatus {
    pub fn is_success(self) -> bool {
        self == TransferStatus::Success
    }

    /// Status for a walk that ran out of candidates.
    ///
    /// `fallback` is used unless the last failure was an authorization
    /// refusal or an unsupported scheme.
    pub fn from_exhausted(last: ServiceOutcome, fallback: TransferStatus) -> TransferStatus {
        match last {
            ServiceOutcome::Forbidden => TransferStatus::AuthFailed,
            ServiceOutcome::Unsupported => TransferStatus::UnimplementedCapability,
            _ => fallback,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::NameLookupFailed => "name lookup failed",
            TransferStatus::DownloadFailed => "download failed",
            TransferStatus::UploadFailed => "upload failed",
            TransferStatus::NameUploadFailed => "name upload failed",
            TransferStatus::AuthFailed => "authorization failed",
            TransferStatus::ShutdownInProgress => "shutdown in progress",
            TransferStatus::UnimplementedCapability => "unimplemented capability",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
