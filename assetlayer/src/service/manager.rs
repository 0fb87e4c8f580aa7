//! Candidate resolution combined with handler dispatch.

use std::sync::Arc;

use tracing::{debug, trace};
use url::Url;

use super::lookup::{ServiceCandidate, ServiceIterator, ServiceLookup, ServiceOutcome};
use super::registry::ProtocolRegistry;

/// Resolves request URIs to candidates that have a registered handler.
pub struct ServiceManager<H: ?Sized> {
    lookup: Arc<dyn ServiceLookup>,
    registry: Arc<ProtocolRegistry<H>>,
}

impl<H: ?Sized> Clone for ServiceManager<H> {
    fn clone(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<H: ?Sized> ServiceManager<H> {
    pub fn new(lookup: Arc<dyn ServiceLookup>, registry: Arc<ProtocolRegistry<H>>) -> Self {
        Self { lookup, registry }
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry<H>> {
        &self.registry
    }

    pub fn lookup(&self) -> &Arc<dyn ServiceLookup> {
        &self.lookup
    }

    /// Starts walking the candidates for `uri`.
    pub fn resolve(&self, uri: &Url) -> ServiceCursor<H> {
        let services = self.lookup.lookup_service(uri);
        if services.is_none() {
            debug!(request = %uri, "no services for request");
        }
        ServiceCursor {
            services,
            registry: Arc::clone(&self.registry),
            tried: 0,
        }
    }
}

/// An in-progress walk over the candidates for one request.
///
/// Candidates whose scheme has no registered handler are skipped and
/// reported to the lookup as [`ServiceOutcome::Unsupported`].
pub struct ServiceCursor<H: ?Sized> {
    services: Option<ServiceIterator>,
    registry: Arc<ProtocolRegistry<H>>,
    tried: usize,
}

impl<H: ?Sized> ServiceCursor<H> {
    /// The next usable candidate and its handler.
    ///
    /// `reason` reports how the previous candidate fared.
    pub fn next(&mut self, reason: ServiceOutcome) -> Option<(ServiceCandidate, Arc<H>)> {
        let services = self.services.as_mut()?;
        let mut reason = reason;
        while let Some(candidate) = services.try_next(reason) {
            match self.registry.get(candidate.uri.scheme()) {
                Some(handler) => {
                    self.tried += 1;
                    return Some((candidate, handler));
                }
                None => {
                    trace!(uri = %candidate.uri, "no handler for scheme");
                    reason = ServiceOutcome::Unsupported;
                }
            }
        }
        None
    }

    /// Number of candidates handed out so far.
    pub fn tried(&self) -> usize {
        self.tried
    }

    /// Whether the lookup produced any list at all.
    pub fn has_services(&self) -> bool {
        self.services.is_some()
    }

    /// Ends the walk, reporting `outcome` for the last candidate.
    pub fn finish(mut self, outcome: ServiceOutcome) {
        if let Some(services) = self.services.take() {
            services.finished(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::lookup::{CachedServiceLookup, ServiceEntry};

    trait Probe: Send + Sync {}
    struct Handler;
    impl Probe for Handler {}

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cursor_skips_unsupported_schemes() {
        let lookup = CachedServiceLookup::new(None);
        lookup.add_to_cache(
            &url("mhash:///"),
            vec![
                ServiceEntry::new(url("ftp://old/files/")),
                ServiceEntry::new(url("http://new/files/")),
            ],
        );
        let registry: Arc<ProtocolRegistry<dyn Probe>> = Arc::new(ProtocolRegistry::new());
        registry.register("http", Arc::new(Handler));

        let manager = ServiceManager::new(Arc::new(lookup), registry);
        let mut cursor = manager.resolve(&url("mhash:///abc"));
        let (candidate, _) = cursor.next(ServiceOutcome::Success).unwrap();
        assert_eq!(candidate.uri.as_str(), "http://new/files/abc");
        assert_eq!(candidate.index, 1);
        assert!(cursor.next(ServiceOutcome::NotFound).is_none());
        assert_eq!(cursor.tried(), 1);
        cursor.finish(ServiceOutcome::NotFound);
    }

    #[test]
    fn test_cursor_without_services() {
        let registry: Arc<ProtocolRegistry<dyn Probe>> = Arc::new(ProtocolRegistry::new());
        let manager = ServiceManager::new(Arc::new(CachedServiceLookup::new(None)), registry);
        let mut cursor = manager.resolve(&url("mhash:///abc"));
        assert!(!cursor.has_services());
        assert!(cursor.next(ServiceOutcome::Success).is_none());
    }
}
