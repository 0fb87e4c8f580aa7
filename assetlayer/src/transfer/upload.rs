//! Upload requests and their state machine.
//!
//! ```text
//!  CheckExistence ──exists──────────────┐
//!       │ missing / force               ▼
//!       └──────────► UploadData ──ok──► UploadName ──ok──► Done(Success)
//!                        │ all failed        │ all failed
//!                        ▼                   ▼
//!                 Done(UploadFailed)  Done(NameUploadFailed)
//! ```
//!
//! Every transition is raced against shutdown, which ends the machine in
//! `Done(ShutdownInProgress)`.

use bytes::Bytes;
use url::Url;

use super::status::TransferStatus;
use crate::fingerprint::{Fingerprint, RemoteFileId};

/// Content to publish, optionally under a name.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Where the content goes. Its fingerprint must match `data`.
    pub target: RemoteFileId,
    pub data: Bytes,
    /// Name to register for the content once uploaded.
    pub name: Option<Url>,
    /// Upload even if a service already has the content.
    pub force: bool,
}

impl UploadRequest {
    pub fn new(target: RemoteFileId, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
            name: None,
            force: false,
        }
    }

    /// Builds a request for `data` under `context`, fingerprinting it.
    pub fn for_content(context: &Url, data: impl Into<Bytes>) -> Result<Self, url::ParseError> {
        let data = data.into();
        let target = RemoteFileId::from_context(context, Fingerprint::compute(&data))?;
        Ok(Self::new(target, data))
    }

    pub fn with_name(mut self, name: Url) -> Self {
        self.name = Some(name);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Whether `data` hashes to the target fingerprint.
    pub fn is_consistent(&self) -> bool {
        Fingerprint::compute(&self.data) == self.target.fingerprint
    }
}

/// Position of an upload in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    CheckExistence,
    UploadData,
    UploadName,
    Done(TransferStatus),
}

impl UploadState {
    /// Where a request starts.
    pub fn initial(request: &UploadRequest) -> Self {
        if !request.is_consistent() {
            return UploadState::Done(TransferStatus::UploadFailed);
        }
        if request.force {
            UploadState::UploadData
        } else {
            UploadState::CheckExistence
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, UploadState::Done(_))
    }
}
