//! Remote service capabilities and candidate resolution.
//!
//! The transfer engine never talks to a protocol directly. It asks a
//! [`ServiceManager`] for the candidates serving a URI and calls the handler
//! registered for each candidate's scheme, in order, until one succeeds:
//!
//! ```ignore
//! let mut cursor = downloads.resolve(&id.uri);
//! let mut reason = ServiceOutcome::Success;
//! while let Some((candidate, handler)) = cursor.next(reason) {
//!     match handler.download(&candidate.uri, &candidate.params, &range).await {
//!         Ok(data) => { cursor.finish(ServiceOutcome::Success); return Some(data); }
//!         Err(e) => reason = e.outcome(),
//!     }
//! }
//! cursor.finish(reason);
//! ```

mod handlers;
mod lookup;
mod manager;
mod registry;

pub use handlers::{
    DownloadHandler, Downloaded, NameLookupHandler, NameUploadHandler, ServiceError,
    UploadHandler,
};
pub use lookup::{
    split_context, CachedServiceLookup, ListOfServices, NullServiceLookup, ServiceCandidate,
    ServiceEntry, ServiceIterator, ServiceLookup, ServiceOutcome, ServiceParams,
    REQUEST_URI_PARAM,
};
pub use manager::{ServiceCursor, ServiceManager};
pub use registry::ProtocolRegistry;

/// Download services, keyed by scheme.
pub type DownloadServices = ServiceManager<dyn DownloadHandler>;
/// Upload services, keyed by scheme.
pub type UploadServices = ServiceManager<dyn UploadHandler>;
/// Name resolution services, keyed by scheme.
pub type NameLookupServices = ServiceManager<dyn NameLookupHandler>;
/// Name registration services, keyed by scheme.
pub type NameUploadServices = ServiceManager<dyn NameUploadHandler>;
