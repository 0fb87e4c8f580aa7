//! In-memory cache layer.
//!
//! Holds one [`SparseData`] per fingerprint in a [`CacheMap`]. Entry size is
//! the number of bytes held. Lookups take the shared lock, so concurrent hits
//! never block each other.

use tracing::{debug, trace};

use super::layer::{CacheLayer, LayerStats};
use super::lru::LruPolicy;
use super::map::CacheMap;
use crate::data::SparseData;
use crate::fingerprint::{Fingerprint, RemoteFileId};
use crate::range::Range;
use crate::BoxFuture;

/// Fast, bounded, process-local layer.
pub struct MemoryCacheLayer {
    map: CacheMap<SparseData>,
}

impl MemoryCacheLayer {
    /// Creates a layer with an LRU budget of `max_bytes`.
    ///
    /// # Arguments
    ///
    /// * `max_bytes` - Total bytes retained across all entries
    /// * `max_fraction` - Largest share of the budget a single file may use
    pub fn new(max_bytes: u64, max_fraction: f64) -> Self {
        let map = CacheMap::new(
            Box::new(LruPolicy::new(max_bytes, max_fraction)),
            |id, data: SparseData, size| {
                trace!(fingerprint = %id, size, chunks = data.chunk_count(), "memory entry dropped");
            },
        );
        Self { map }
    }

    /// Returns a copy of everything held for `fingerprint`.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<SparseData> {
        self.map.read().get(fingerprint).cloned()
    }

    /// Whether the layer holds all of `range`.
    pub fn contains(&self, fingerprint: &Fingerprint, range: &Range) -> bool {
        self.map
            .read()
            .get(fingerprint)
            .is_some_and(|d| d.contains(range))
    }

    fn store_sync(&self, fingerprint: &Fingerprint, data: &SparseData) {
        let mut writer = self.map.write();
        let existing = writer.get(fingerprint).cloned();
        let old_size = existing.as_ref().map_or(0, SparseData::space_used);

        let mut merged = existing.clone().unwrap_or_default();
        if !merged.merge(data) {
            writer.use_entry(fingerprint);
            return;
        }
        let new_size = merged.space_used();
        if !self.map.policy().cachable(new_size) {
            // The old entry, if any, stays as it was.
            debug!(fingerprint = %fingerprint, new_size, "memory layer declined oversized entry");
            return;
        }

        if existing.is_some() {
            // Keep the entry itself from being the first eviction victim.
            writer.use_entry(fingerprint);
            let delta = new_size.saturating_sub(old_size);
            if !self.map.alloc(delta, &mut writer) {
                debug!(fingerprint = %fingerprint, new_size, "memory layer declined growth");
                return;
            }
            if let Some(slot) = writer.get_mut(fingerprint) {
                *slot = merged;
                writer.update(fingerprint, new_size);
                return;
            }
            // Evicted to make room for itself; fall through to a fresh insert.
        }

        if !self.map.alloc(new_size, &mut writer) {
            debug!(fingerprint = %fingerprint, new_size, "memory layer declined entry");
            return;
        }
        writer.insert_with(*fingerprint, new_size, || merged);
    }
}

impl CacheLayer for MemoryCacheLayer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn lookup<'a>(&'a self, id: &'a RemoteFileId, range: &'a Range) -> BoxFuture<'a, Option<SparseData>> {
        let fingerprint = &id.fingerprint;
        let reader = self.map.read();
        let hit = match reader.get(fingerprint) {
            Some(data) if data.contains(range) => {
                reader.use_entry(fingerprint);
                Some(data.subset(range))
            }
            _ => None,
        };
        drop(reader);
        Box::pin(async move { hit })
    }

    fn store<'a>(&'a self, fingerprint: &'a Fingerprint, data: &'a SparseData) -> BoxFuture<'a, ()> {
        self.store_sync(fingerprint, data);
        Box::pin(async {})
    }

    fn purge<'a>(&'a self, fingerprint: &'a Fingerprint) -> BoxFuture<'a, bool> {
        let removed = self.map.write().erase(fingerprint);
        Box::pin(async move { removed })
    }

    fn holds(&self, fingerprint: &Fingerprint) -> bool {
        self.map.read().contains(fingerprint)
    }

    fn stats(&self) -> LayerStats {
        LayerStats {
            entries: self.map.len(),
            bytes: self.map.used_bytes(),
            capacity: self.map.policy().total_size(),
        }
    }
}
