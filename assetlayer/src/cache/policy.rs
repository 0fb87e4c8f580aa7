//! Eviction strategy interface.

use crate::fingerprint::Fingerprint;

/// Opaque per-entry bookkeeping handed out by a [`CachePolicy`].
///
/// Stored in the cache map slot next to the entry and passed back on every
/// policy call for that entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyData(pub(crate) usize);

/// Strategy deciding which entries to discard under a size budget.
///
/// One policy instance belongs to one [`CacheMap`](super::CacheMap). The map
/// calls it under its own lock, but `use_entry` runs under the shared read
/// lock, so implementations synchronise their internal state themselves.
///
/// The policy tracks `free_space = total_size - Σ(live entry sizes)`. Entry
/// sizes are charged on `create`, adjusted on `use_and_update` and credited
/// on `destroy`.
pub trait CachePolicy: Send + Sync {
    /// Whether an entry of `size` bytes may be cached at all.
    fn cachable(&self, size: u64) -> bool;

    /// Registers a new entry and charges its size.
    fn create(&self, id: &Fingerprint, size: u64) -> PolicyData;

    /// Marks an entry as recently used.
    fn use_entry(&self, id: &Fingerprint, data: PolicyData, size: u64);

    /// Marks an entry as used and re-charges the size difference.
    fn use_and_update(&self, id: &Fingerprint, data: PolicyData, old_size: u64, new_size: u64);

    /// Forgets an entry and credits its size.
    fn destroy(&self, id: &Fingerprint, data: PolicyData, size: u64);

    /// Next entry to evict so that `required` bytes fit.
    ///
    /// Returns `None` once enough space is free or nothing is left to evict.
    fn next_item(&self, required: u64) -> Option<Fingerprint>;

    /// Bytes not yet charged to any entry. Negative only transiently.
    fn free_space(&self) -> i64;

    /// Configured budget in bytes.
    fn total_size(&self) -> u64;
}
