//! Service candidate resolution.
//!
//! A request URI is split into a *context* (everything up to the last path
//! segment) and a *merge path* (the rest). A [`ServiceLookup`] maps the
//! context to an ordered list of service base URIs; each candidate URI is the
//! base with the merge path joined on:
//!
//! ```text
//!   mhash:///9f86d0…            context  mhash:///
//!                               merge    9f86d0…
//!   [services] mhash = http://a.example/files/, http://b.example/files/
//!   ──► http://a.example/files/9f86d0…
//!   ──► http://b.example/files/9f86d0…
//! ```
//!
//! When no list is configured for a context, [`CachedServiceLookup`] retries
//! with the parent context, moving one path segment into the merge path, and
//! finally defers to the next lookup in its chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

/// Parameter naming where the original request URI is passed to a service.
///
/// When a service entry carries this key, candidates use the service URI as
/// is and the request URI travels in the parameter instead of the path.
pub const REQUEST_URI_PARAM: &str = "requesturi";

/// How a service call ended, reported back to the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOutcome {
    Success,
    Unsupported,
    GeneralError,
    NetworkError,
    NotFound,
    Forbidden,
}

/// String parameters attached to a configured service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceParams(BTreeMap<String, String>);

impl ServiceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ServiceParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One configured service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub base: Url,
    pub params: ServiceParams,
}

impl ServiceEntry {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            params: ServiceParams::new(),
        }
    }

    pub fn with_params(base: Url, params: ServiceParams) -> Self {
        Self { base, params }
    }
}

pub type ListOfServices = Vec<ServiceEntry>;

/// A resolved candidate ready to hand to a protocol handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCandidate {
    pub uri: Url,
    pub params: ServiceParams,
    /// Position of the entry in its service list.
    pub index: usize,
}

type FinishHook = Box<dyn FnOnce(Option<usize>, ServiceOutcome) + Send>;

/// Walks an ordered service list for one request.
pub struct ServiceIterator {
    services: Arc<ListOfServices>,
    request: Url,
    merge: String,
    next_index: usize,
    on_finished: Option<FinishHook>,
}

impl ServiceIterator {
    /// # Arguments
    ///
    /// * `services` - Candidate list, tried in order
    /// * `request` - The URI being resolved
    /// * `merge` - Path joined onto each service base
    pub fn new(services: Arc<ListOfServices>, request: Url, merge: impl Into<String>) -> Self {
        Self {
            services,
            request,
            merge: merge.into(),
            next_index: 0,
            on_finished: None,
        }
    }

    /// Installs a hook run by [`finished`](Self::finished) with the index of
    /// the last candidate handed out.
    pub fn on_finished(
        mut self,
        hook: impl FnOnce(Option<usize>, ServiceOutcome) + Send + 'static,
    ) -> Self {
        self.on_finished = Some(Box::new(hook));
        self
    }

    pub fn request_uri(&self) -> &Url {
        &self.request
    }

    pub fn merge_path(&self) -> &str {
        &self.merge
    }

    /// Total number of entries, including ones already tried.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Returns the next candidate.
    ///
    /// `reason` reports how the previous candidate fared; it is ignored on the
    /// first call. Entries whose URI cannot be relocated are skipped.
    pub fn try_next(&mut self, reason: ServiceOutcome) -> Option<ServiceCandidate> {
        if self.next_index > 0 {
            trace!(request = %self.request, previous = self.next_index - 1, ?reason, "advancing service list");
        }
        while let Some(entry) = self.services.get(self.next_index) {
            let index = self.next_index;
            self.next_index += 1;
            match relocate(entry, &self.request, &self.merge) {
                Ok((uri, params)) => return Some(ServiceCandidate { uri, params, index }),
                Err(e) => {
                    warn!(base = %entry.base, merge = %self.merge, error = %e, "skipping unusable service")
                }
            }
        }
        None
    }

    /// Ends the walk and reports how the last candidate fared.
    pub fn finished(mut self, reason: ServiceOutcome) {
        let last = self.next_index.checked_sub(1);
        if let Some(hook) = self.on_finished.take() {
            hook(last, reason);
        }
    }
}

impl std::fmt::Debug for ServiceIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceIterator")
            .field("request", &self.request.as_str())
            .field("merge", &self.merge)
            .field("next_index", &self.next_index)
            .field("len", &self.services.len())
            .finish()
    }
}

fn relocate(
    entry: &ServiceEntry,
    request: &Url,
    merge: &str,
) -> Result<(Url, ServiceParams), url::ParseError> {
    let mut params = entry.params.clone();
    if params.contains(REQUEST_URI_PARAM) {
        params.set(REQUEST_URI_PARAM, request.as_str());
        return Ok((entry.base.clone(), params));
    }
    if merge.is_empty() {
        return Ok((entry.base.clone(), params));
    }
    Ok((entry.base.join(merge)?, params))
}

/// Splits `uri` into its context and the final path segment.
///
/// `http://h/a/b/` splits into `http://h/a/` and `b/`; `mhash:///f00` into
/// `mhash:///` and `f00`. Returns `None` at the root.
pub fn split_context(uri: &Url) -> Option<(Url, String)> {
    let path = uri.path();
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let (parent, last) = trimmed.rsplit_once('/')?;
    if last.is_empty() {
        return None;
    }
    let tail = path[parent.len() + 1..].to_string();
    let mut context = uri.clone();
    context.set_path(&format!("{parent}/"));
    context.set_query(None);
    context.set_fragment(None);
    Some((context, tail))
}

/// Resolves request URIs to ordered service candidates.
pub trait ServiceLookup: Send + Sync {
    /// Candidates for `uri`, or `None` when nothing can serve it.
    fn lookup_service(&self, uri: &Url) -> Option<ServiceIterator>;
}

/// Answers every request with the request URI itself.
///
/// Terminates lookup chains so that URIs with a directly usable scheme
/// (`http://`, `file://`) need no configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullServiceLookup;

impl ServiceLookup for NullServiceLookup {
    fn lookup_service(&self, uri: &Url) -> Option<ServiceIterator> {
        let services = Arc::new(vec![ServiceEntry::new(uri.clone())]);
        Some(ServiceIterator::new(services, uri.clone(), ""))
    }
}

type ServiceTable = HashMap<String, Arc<ListOfServices>>;

/// Lookup backed by configured per-context service lists.
///
/// A candidate that succeeds after earlier ones failed is moved to the front
/// of its list, so later requests try it first.
pub struct CachedServiceLookup {
    services: Arc<RwLock<ServiceTable>>,
    next: Option<Arc<dyn ServiceLookup>>,
}

impl CachedServiceLookup {
    /// Creates an empty lookup that defers unmatched requests to `next`.
    pub fn new(next: Option<Arc<dyn ServiceLookup>>) -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
            next,
        }
    }

    /// Sets the service list for `context`.
    pub fn add_to_cache(&self, context: &Url, services: ListOfServices) {
        debug!(context = %context, count = services.len(), "registering services");
        self.services
            .write()
            .insert(context.as_str().to_string(), Arc::new(services));
    }

    /// Removes the list for `context`. Returns whether one was present.
    pub fn remove(&self, context: &Url) -> bool {
        self.services.write().remove(context.as_str()).is_some()
    }

    /// The configured list for `context`, in current preference order.
    pub fn services_for(&self, context: &Url) -> Option<ListOfServices> {
        self.services
            .read()
            .get(context.as_str())
            .map(|list| list.as_ref().clone())
    }

    pub fn contexts(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.services.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn iterator_for(&self, key: String, list: Arc<ListOfServices>, uri: &Url, merge: String) -> ServiceIterator {
        let table = Arc::clone(&self.services);
        let tried = Arc::clone(&list);
        ServiceIterator::new(list, uri.clone(), merge).on_finished(move |index, outcome| {
            let Some(index) = index else { return };
            if outcome != ServiceOutcome::Success || index == 0 {
                return;
            }
            promote(&table, &key, &tried, index);
        })
    }
}

fn promote(table: &RwLock<ServiceTable>, key: &str, tried: &ListOfServices, index: usize) {
    let Some(winner) = tried.get(index) else { return };
    let mut table = table.write();
    let Some(current) = table.get_mut(key) else { return };
    let Some(position) = current.iter().position(|e| e == winner) else {
        return;
    };
    if position == 0 {
        return;
    }
    let mut reordered = current.as_ref().clone();
    let entry = reordered.remove(position);
    reordered.insert(0, entry);
    *current = Arc::new(reordered);
    debug!(context = key, service = %winner.base, "preferring service");
}

impl ServiceLookup for CachedServiceLookup {
    fn lookup_service(&self, uri: &Url) -> Option<ServiceIterator> {
        let mut split = split_context(uri);
        while let Some((context, merge)) = split {
            let key = context.as_str().to_string();
            let found = self.services.read().get(&key).cloned();
            if let Some(list) = found {
                trace!(request = %uri, context = %key, "service context matched");
                return Some(self.iterator_for(key, list, uri, merge));
            }
            split = split_context(&context).map(|(parent, segment)| (parent, segment + &merge));
        }
        self.next.as_ref()?.lookup_service(uri)
    }
}

impl std::fmt::Debug for CachedServiceLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedServiceLookup")
            .field("contexts", &self.contexts())
            .field("has_next", &self.next.is_some())
            .finish()
    }
}
