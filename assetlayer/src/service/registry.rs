//! Scheme-keyed handler registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// Maps URI schemes to handlers of one capability.
///
/// Registration and lookup may happen concurrently from any thread.
pub struct ProtocolRegistry<H: ?Sized> {
    handlers: DashMap<String, Arc<H>>,
}

impl<H: ?Sized> ProtocolRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Registers `handler` for `scheme`, returning the handler it replaced.
    pub fn register(&self, scheme: &str, handler: Arc<H>) -> Option<Arc<H>> {
        debug!(scheme, "registering protocol handler");
        self.handlers.insert(scheme.to_ascii_lowercase(), handler)
    }

    pub fn unregister(&self, scheme: &str) -> Option<Arc<H>> {
        self.handlers
            .remove(&scheme.to_ascii_lowercase())
            .map(|(_, handler)| handler)
    }

    /// The handler for `scheme`, if any.
    pub fn get(&self, scheme: &str) -> Option<Arc<H>> {
        self.handlers
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.handlers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        schemes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> Default for ProtocolRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct A;
    impl Named for A {
        fn name(&self) -> &'static str {
            "a"
        }
    }

    struct B;
    impl Named for B {
        fn name(&self) -> &'static str {
            "b"
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry: ProtocolRegistry<dyn Named> = ProtocolRegistry::new();
        assert!(registry.register("http", Arc::new(A)).is_none());
        assert_eq!(registry.get("HTTP").unwrap().name(), "a");
        assert!(registry.get("ftp").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let registry: ProtocolRegistry<dyn Named> = ProtocolRegistry::new();
        registry.register("file", Arc::new(A));
        let old = registry.register("file", Arc::new(B)).unwrap();
        assert_eq!(old.name(), "a");
        assert_eq!(registry.get("file").unwrap().name(), "b");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_schemes_sorted() {
        let registry: ProtocolRegistry<dyn Named> = ProtocolRegistry::new();
        registry.register("https", Arc::new(A));
        registry.register("file", Arc::new(A));
        assert_eq!(registry.schemes(), vec!["file", "https"]);
        assert!(registry.unregister("file").is_some());
        assert!(!registry.supports("file"));
    }
}
