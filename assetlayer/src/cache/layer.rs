//! Cache layer interface and chain composition.
//!
//! Layers are composed into a [`CacheChain`] ordered from the caller outward:
//!
//! ```text
//!   index 0          1            2
//!   ┌────────┐   ┌────────┐   ┌─────────┐
//!   │ memory │──►│  disk  │──►│ network │    miss: delegate to index + 1
//!   └────────┘◄──└────────┘◄──└─────────┘    hit:  populate index - 1 .. 0
//!        purge ───────────────────────►      purge: every index ≥ start
//! ```
//!
//! A layer only knows how to look up, store and purge its own entries; the
//! chain owns the ordering, so no layer holds a pointer to its neighbours.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::data::SparseData;
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::Range;
use crate::BoxFuture;

/// Entry and byte counts for one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub entries: usize,
    pub bytes: u64,
    pub capacity: u64,
}

impl fmt::Display for LayerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} / {} bytes",
            self.entries, self.bytes, self.capacity
        )
    }
}

/// One node of a cache chain.
///
/// # Contract
///
/// - `lookup` answers only from this layer. `None` means "not here" and is
///   never an error; the chain then tries the next layer.
/// - `store` caches data produced by a layer further out. Refusing to cache
///   (entry too large for the budget) is silent.
/// - `purge` forgets the fingerprint locally; absent entries are a no-op.
pub trait CacheLayer: Send + Sync {
    /// Short name for logs and stats.
    fn name(&self) -> &'static str;

    /// Returns data covering `range` if this layer has all of it.
    ///
    /// Local layers key by `id.fingerprint`; remote layers also use `id.uri`
    /// to locate the file.
    fn lookup<'a>(&'a self, id: &'a RemoteFileId, range: &'a Range) -> BoxFuture<'a, Option<SparseData>>;

    /// Caches `data` for `fingerprint`.
    fn store<'a>(&'a self, fingerprint: &'a Fingerprint, data: &'a SparseData) -> BoxFuture<'a, ()>;

    /// Removes `fingerprint`. Returns whether anything was removed.
    fn purge<'a>(&'a self, fingerprint: &'a Fingerprint) -> BoxFuture<'a, bool>;

    /// Whether this layer currently holds any bytes of `fingerprint`.
    fn holds(&self, fingerprint: &Fingerprint) -> bool;

    fn stats(&self) -> LayerStats;
}

/// Where a chain walk found its data.
#[derive(Debug, Clone)]
pub struct ChainHit {
    pub data: SparseData,
    /// Index of the layer that answered.
    pub layer: usize,
}

/// An ordered sequence of cache layers.
#[derive(Clone, Default)]
pub struct CacheChain {
    layers: Vec<Arc<dyn CacheLayer>>,
}

impl CacheChain {
    /// Creates a chain from layers ordered nearest-first.
    pub fn new(layers: Vec<Arc<dyn CacheLayer>>) -> Self {
        Self { layers }
    }

    /// Appends a layer at the far end.
    pub fn push(&mut self, layer: Arc<dyn CacheLayer>) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Arc<dyn CacheLayer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Walks the whole chain for `range`.
    pub async fn get_data(&self, id: &RemoteFileId, range: &Range) -> Option<ChainHit> {
        self.get_data_from(0, id, range).await
    }

    /// Walks the chain from layer `start`.
    ///
    /// The first layer holding the range answers; its data is then offered
    /// to every layer nearer the caller. Returns `None` when no layer has it.
    pub async fn get_data_from(
        &self,
        start: usize,
        id: &RemoteFileId,
        range: &Range,
    ) -> Option<ChainHit> {
        let fingerprint = &id.fingerprint;
        for (index, layer) in self.layers.iter().enumerate().skip(start) {
            if let Some(data) = layer.lookup(id, range).await {
                debug!(
                    fingerprint = %fingerprint,
                    range = %range,
                    layer = layer.name(),
                    "cache chain hit"
                );
                if index > 0 {
                    self.populate_cache(index - 1, fingerprint, &data).await;
                }
                return Some(ChainHit { data, layer: index });
            }
            trace!(fingerprint = %fingerprint, layer = layer.name(), "cache miss");
        }
        debug!(fingerprint = %fingerprint, range = %range, "no layer holds range");
        None
    }

    /// Stores `data` at layer `index` and every layer nearer the caller.
    pub async fn populate_cache(&self, index: usize, fingerprint: &Fingerprint, data: &SparseData) {
        let upto = index.min(self.layers.len().saturating_sub(1));
        if self.layers.is_empty() {
            return;
        }
        for layer in self.layers[..=upto].iter().rev() {
            layer.store(fingerprint, data).await;
        }
    }

    /// Removes `fingerprint` from layer `start` and every layer after it.
    ///
    /// Returns how many layers held it.
    pub async fn purge_from_cache(&self, start: usize, fingerprint: &Fingerprint) -> usize {
        let mut removed = 0;
        for layer in self.layers.iter().skip(start) {
            if layer.purge(fingerprint).await {
                removed += 1;
            }
        }
        debug!(fingerprint = %fingerprint, layers = removed, "purged");
        removed
    }

    /// Injects data at the far end so it propagates through every layer.
    pub async fn add_to_cache(&self, fingerprint: &Fingerprint, data: &SparseData) {
        if let Some(last) = self.layers.len().checked_sub(1) {
            self.populate_cache(last, fingerprint, data).await;
        }
    }

    /// Per-layer stats, nearest first.
    pub fn stats(&self) -> Vec<(&'static str, LayerStats)> {
        self.layers.iter().map(|l| (l.name(), l.stats())).collect()
    }
}

impl fmt::Debug for CacheChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|l| l.name()))
            .finish()
    }
}
