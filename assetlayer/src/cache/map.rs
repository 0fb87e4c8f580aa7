//! Fingerprint-keyed slot table shared by every cache layer.
//!
//! A [`CacheMap`] pairs a lockable map of entries with a [`CachePolicy`]
//! that gates insertion and picks eviction victims.
//!
//! ```text
//!   CacheMap<T>
//!   ├── RwLock<BTreeMap<Fingerprint, Slot<T>>>   Slot = (entry, policy data, size)
//!   ├── Box<dyn CachePolicy>                     free-space accounting, LRU order
//!   └── destroy hook                             layer-specific cleanup on erase
//! ```
//!
//! # Locking
//!
//! - [`CacheMap::read`] returns a [`CacheReader`] holding the shared lock.
//!   Many readers run at once and may mark entries as used.
//! - [`CacheMap::write`] returns a [`CacheWriter`] holding the exclusive
//!   lock. All mutation, and therefore all eviction, goes through it.
//!
//! Only one writer can exist at a time; taking a second while holding the
//! first deadlocks. [`CacheMap::alloc`] therefore takes the caller's writer
//! instead of acquiring its own, so allocate-then-insert is one critical
//! section.
//!
//! # Example
//!
//! ```ignore
//! let map = CacheMap::new(Box::new(LruPolicy::new(1 << 20, 0.5)), |_, _, _| {});
//! let mut writer = map.write();
//! if map.alloc(data.len() as u64, &mut writer) {
//!     writer.insert_with(fingerprint, data.len() as u64, || data);
//! }
//! ```

use std::collections::BTreeMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use super::policy::{CachePolicy, PolicyData};
use crate::fingerprint::Fingerprint;

type DestroyHook<T> = Box<dyn Fn(&Fingerprint, T, u64) + Send + Sync>;

struct Slot<T> {
    entry: T,
    policy: PolicyData,
    size: u64,
}

/// Lockable slot table with pluggable eviction.
pub struct CacheMap<T> {
    entries: RwLock<BTreeMap<Fingerprint, Slot<T>>>,
    policy: Box<dyn CachePolicy>,
    on_destroy: DestroyHook<T>,
}

impl<T> CacheMap<T> {
    /// Creates an empty map.
    ///
    /// # Arguments
    ///
    /// * `policy` - Eviction strategy owning the size budget
    /// * `on_destroy` - Called with each erased entry after the policy has
    ///   released it
    pub fn new<F>(policy: Box<dyn CachePolicy>, on_destroy: F) -> Self
    where
        F: Fn(&Fingerprint, T, u64) + Send + Sync + 'static,
    {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            policy,
            on_destroy: Box::new(on_destroy),
        }
    }

    pub fn policy(&self) -> &dyn CachePolicy {
        self.policy.as_ref()
    }

    /// Acquires the shared lock.
    pub fn read(&self) -> CacheReader<'_, T> {
        CacheReader {
            map: self,
            entries: self.entries.read(),
        }
    }

    /// Acquires the exclusive lock.
    pub fn write(&self) -> CacheWriter<'_, T> {
        CacheWriter {
            map: self,
            entries: self.entries.write(),
        }
    }

    /// Makes room for `required` bytes, evicting through `writer`.
    ///
    /// Returns `false` if the policy refuses an entry of this size or cannot
    /// free enough space. Refusal is a normal outcome: the data is simply not
    /// cached.
    pub fn alloc(&self, required: u64, writer: &mut CacheWriter<'_, T>) -> bool {
        if !self.policy.cachable(required) {
            debug!(required, "entry not cachable");
            return false;
        }
        while let Some(victim) = self.policy.next_item(required) {
            if !writer.erase(&victim) {
                warn!(fingerprint = %victim, "eviction victim missing from cache map");
                return false;
            }
            debug!(fingerprint = %victim, required, "evicted");
        }
        self.policy.free_space() >= required as i64
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sum of live entry sizes.
    pub fn used_bytes(&self) -> u64 {
        self.entries.read().values().map(|s| s.size).sum()
    }

    fn destroy_slot(&self, id: &Fingerprint, slot: Slot<T>) {
        self.policy.destroy(id, slot.policy, slot.size);
        (self.on_destroy)(id, slot.entry, slot.size);
    }
}

impl<T> Drop for CacheMap<T> {
    fn drop(&mut self) {
        let entries = std::mem::take(self.entries.get_mut());
        for (id, slot) in entries {
            self.destroy_slot(&id, slot);
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Shared-lock view of a [`CacheMap`].
pub struct CacheReader<'a, T> {
    map: &'a CacheMap<T>,
    entries: RwLockReadGuard<'a, BTreeMap<Fingerprint, Slot<T>>>,
}

impl<T> CacheReader<'_, T> {
    pub fn get(&self, id: &Fingerprint) -> Option<&T> {
        self.entries.get(id).map(|s| &s.entry)
    }

    pub fn contains(&self, id: &Fingerprint) -> bool {
        self.entries.contains_key(id)
    }

    pub fn size_of(&self, id: &Fingerprint) -> Option<u64> {
        self.entries.get(id).map(|s| s.size)
    }

    /// Marks an entry as recently used. Returns `false` if absent.
    pub fn use_entry(&self, id: &Fingerprint) -> bool {
        match self.entries.get(id) {
            Some(slot) => {
                self.map.policy.use_entry(id, slot.policy, slot.size);
                true
            }
            None => false,
        }
    }

    /// Iterates entries in fingerprint order.
    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &T, u64)> {
        self.entries.iter().map(|(id, s)| (id, &s.entry, s.size))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Exclusive-lock view of a [`CacheMap`].
pub struct CacheWriter<'a, T> {
    map: &'a CacheMap<T>,
    entries: RwLockWriteGuard<'a, BTreeMap<Fingerprint, Slot<T>>>,
}

impl<T> CacheWriter<'_, T> {
    pub fn get(&self, id: &Fingerprint) -> Option<&T> {
        self.entries.get(id).map(|s| &s.entry)
    }

    /// Mutable access to an entry. Call [`update`](Self::update) afterwards
    /// if its size changed.
    pub fn get_mut(&mut self, id: &Fingerprint) -> Option<&mut T> {
        self.entries.get_mut(id).map(|s| &mut s.entry)
    }

    pub fn contains(&self, id: &Fingerprint) -> bool {
        self.entries.contains_key(id)
    }

    pub fn size_of(&self, id: &Fingerprint) -> Option<u64> {
        self.entries.get(id).map(|s| s.size)
    }

    /// Inserts an entry unless one exists.
    ///
    /// `size` is charged to the policy only when a new slot is created.
    /// Returns `true` if the slot was created; an existing entry is left
    /// untouched and must be updated by the caller.
    pub fn insert_with<F>(&mut self, id: Fingerprint, size: u64, make: F) -> bool
    where
        F: FnOnce() -> T,
    {
        if self.entries.contains_key(&id) {
            return false;
        }
        let policy = self.map.policy.create(&id, size);
        self.entries.insert(
            id,
            Slot {
                entry: make(),
                policy,
                size,
            },
        );
        true
    }

    /// Marks an entry as recently used. Returns `false` if absent.
    pub fn use_entry(&self, id: &Fingerprint) -> bool {
        match self.entries.get(id) {
            Some(slot) => {
                self.map.policy.use_entry(id, slot.policy, slot.size);
                true
            }
            None => false,
        }
    }

    /// Records a new size for an entry and marks it used.
    pub fn update(&mut self, id: &Fingerprint, new_size: u64) -> bool {
        match self.entries.get_mut(id) {
            Some(slot) => {
                let old_size = std::mem::replace(&mut slot.size, new_size);
                self.map
                    .policy
                    .use_and_update(id, slot.policy, old_size, new_size);
                true
            }
            None => false,
        }
    }

    /// Erases an entry, running the policy and layer destroy hooks.
    ///
    /// Returns `false` if the entry was absent.
    pub fn erase(&mut self, id: &Fingerprint) -> bool {
        match self.entries.remove(id) {
            Some(slot) => {
                self.map.destroy_slot(id, slot);
                true
            }
            None => false,
        }
    }

    /// Erases every entry.
    pub fn erase_all(&mut self) {
        let entries = std::mem::take(&mut *self.entries);
        for (id, slot) in entries {
            self.map.destroy_slot(&id, slot);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruPolicy;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    type Destroyed = Arc<Mutex<Vec<(Fingerprint, u64)>>>;

    fn map_with_budget(total: u64) -> (CacheMap<String>, Destroyed) {
        let destroyed: Destroyed = Arc::default();
        let d = Arc::clone(&destroyed);
        let map = CacheMap::new(Box::new(LruPolicy::new(total, 1.0)), move |id, _entry, size| {
            d.lock().push((*id, size));
        });
        (map, destroyed)
    }

    fn put(map: &CacheMap<String>, id: Fingerprint, size: u64) -> bool {
        let mut writer = map.write();
        if !map.alloc(size, &mut writer) {
            return false;
        }
        writer.insert_with(id, size, || format!("entry-{size}"))
    }

    #[test]
    fn test_insert_and_read() {
        let (map, _) = map_with_budget(100);
        assert!(put(&map, fp(1), 10));
        let reader = map.read();
        assert_eq!(reader.get(&fp(1)).map(String::as_str), Some("entry-10"));
        assert_eq!(reader.size_of(&fp(1)), Some(10));
        assert!(reader.use_entry(&fp(1)));
        assert!(!reader.use_entry(&fp(2)));
    }

    #[test]
    fn test_insert_existing_returns_false() {
        let (map, _) = map_with_budget(100);
        put(&map, fp(1), 10);
        let mut writer = map.write();
        assert!(!writer.insert_with(fp(1), 50, || "other".to_string()));
        assert_eq!(writer.size_of(&fp(1)), Some(10));
    }

    #[test]
    fn test_alloc_evicts_lru_victims() {
        let (map, destroyed) = map_with_budget(100);
        put(&map, fp(1), 40);
        put(&map, fp(2), 40);
        map.read().use_entry(&fp(1));

        assert!(put(&map, fp(3), 40));
        assert_eq!(*destroyed.lock(), vec![(fp(2), 40)]);
        assert!(map.read().contains(&fp(1)));
        assert_eq!(map.used_bytes(), 80);
    }

    #[test]
    fn test_alloc_refuses_oversized_entry_without_evicting() {
        let (map, destroyed) = map_with_budget(100);
        put(&map, fp(1), 40);
        assert!(!put(&map, fp(2), 100));
        assert!(destroyed.lock().is_empty());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_update_recharges_policy() {
        let (map, _) = map_with_budget(100);
        put(&map, fp(1), 10);
        {
            let mut writer = map.write();
            writer.get_mut(&fp(1)).unwrap().push_str("-grown");
            assert!(writer.update(&fp(1), 60));
        }
        assert_eq!(map.policy().free_space(), 40);
        assert_eq!(map.used_bytes(), 60);
    }

    #[test]
    fn test_erase_runs_hooks_once() {
        let (map, destroyed) = map_with_budget(100);
        put(&map, fp(1), 10);
        let mut writer = map.write();
        assert!(writer.erase(&fp(1)));
        assert!(!writer.erase(&fp(1)));
        drop(writer);
        assert_eq!(destroyed.lock().len(), 1);
        assert_eq!(map.policy().free_space(), 100);
    }

    #[test]
    fn test_drop_erases_everything() {
        let (map, destroyed) = map_with_budget(100);
        put(&map, fp(1), 10);
        put(&map, fp(2), 20);
        drop(map);
        assert_eq!(destroyed.lock().len(), 2);
    }

    #[test]
    fn test_concurrent_inserts_stay_within_budget() {
        let (map, _) = map_with_budget(1_000);
        let map = Arc::new(map);
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for i in 0..50u8 {
                        put(&map, fp(t.wrapping_mul(50).wrapping_add(i)), 37 + u64::from(i % 5) * 11);
                        map.read().use_entry(&fp(i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(map.used_bytes() <= 1_000);
        assert_eq!(
            map.policy().free_space(),
            1_000 - map.used_bytes() as i64
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Put(u8, u64),
            Use(u8),
            Grow(u8, u64),
            Erase(u8),
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..16, 1u64..300).prop_map(|(k, s)| Op::Put(k, s)),
                (0u8..16).prop_map(Op::Use),
                (0u8..16, 1u64..300).prop_map(|(k, s)| Op::Grow(k, s)),
                (0u8..16).prop_map(Op::Erase),
            ]
        }

        proptest! {
            #[test]
            fn prop_budget_never_exceeded(ops in prop::collection::vec(arb_op(), 1..80)) {
                let (map, _) = map_with_budget(1_000);
                for op in ops {
                    match op {
                        Op::Put(k, size) => {
                            put(&map, fp(k), size);
                        }
                        Op::Use(k) => {
                            map.read().use_entry(&fp(k));
                        }
                        Op::Grow(k, extra) => {
                            let mut writer = map.write();
                            if let Some(old) = writer.size_of(&fp(k)) {
                                writer.use_entry(&fp(k));
                                if map.alloc(extra, &mut writer) {
                                    // The entry itself may have been the victim.
                                    writer.update(&fp(k), old + extra);
                                }
                            }
                        }
                        Op::Erase(k) => {
                            map.write().erase(&fp(k));
                        }
                    }
                    prop_assert!(map.used_bytes() <= 1_000);
                    prop_assert_eq!(map.policy().free_space(), 1_000 - map.used_bytes() as i64);
                }
            }
        }
    }
}
