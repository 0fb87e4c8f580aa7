//! Least-recently-used eviction policy.
//!
//! Entries live in a slab-backed doubly linked list ordered from most to
//! least recently used. [`PolicyData`] is the entry's slab index, so `use`
//! splices it to the front in O(1) without a lookup.

use parking_lot::Mutex;
use tracing::trace;

use super::policy::{CachePolicy, PolicyData};
use crate::fingerprint::Fingerprint;

#[derive(Debug)]
struct Node {
    id: Fingerprint,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct LruState {
    nodes: Vec<Option<Node>>,
    free_slots: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    free_space: i64,
    live: usize,
}

impl LruState {
    fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = match self.node_mut(index) {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(index) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(index);
            }
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn touch(&mut self, index: usize) {
        if self.head != Some(index) {
            self.unlink(index);
            self.push_front(index);
        }
    }
}

/// LRU policy with a byte budget.
///
/// An entry is cachable only if it is smaller than `total_size * max_fraction`.
#[derive(Debug)]
pub struct LruPolicy {
    total_size: u64,
    max_fraction: f64,
    state: Mutex<LruState>,
}

impl LruPolicy {
    /// Creates a policy with a budget of `total_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `total_size` - Byte budget shared by all entries
    /// * `max_fraction` - Largest share of the budget one entry may take,
    ///   clamped to `(0, 1]`
    pub fn new(total_size: u64, max_fraction: f64) -> Self {
        let max_fraction = if max_fraction.is_finite() && max_fraction > 0.0 {
            max_fraction.min(1.0)
        } else {
            1.0
        };
        Self {
            total_size,
            max_fraction,
            state: Mutex::new(LruState {
                free_space: i64::try_from(total_size).unwrap_or(i64::MAX),
                ..LruState::default()
            }),
        }
    }

    pub fn max_fraction(&self) -> f64 {
        self.max_fraction
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.state.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry ids from most to least recently used.
    pub fn recency_order(&self) -> Vec<Fingerprint> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.live);
        let mut cursor = state.head;
        while let Some(index) = cursor {
            match state.nodes.get(index).and_then(Option::as_ref) {
                Some(node) => {
                    out.push(node.id);
                    cursor = node.next;
                }
                None => break,
            }
        }
        out
    }
}

impl CachePolicy for LruPolicy {
    fn cachable(&self, size: u64) -> bool {
        let Ok(signed) = i64::try_from(size) else {
            return false;
        };
        if signed > i64::MAX / 2 {
            return false;
        }
        (size as f64) < (self.total_size as f64) * self.max_fraction
    }

    fn create(&self, id: &Fingerprint, size: u64) -> PolicyData {
        let mut state = self.state.lock();
        let node = Node {
            id: *id,
            prev: None,
            next: None,
        };
        let index = match state.free_slots.pop() {
            Some(index) => {
                state.nodes[index] = Some(node);
                index
            }
            None => {
                state.nodes.push(Some(node));
                state.nodes.len() - 1
            }
        };
        state.push_front(index);
        state.free_space -= size as i64;
        state.live += 1;
        trace!(fingerprint = %id, size, free = state.free_space, "lru create");
        PolicyData(index)
    }

    fn use_entry(&self, _id: &Fingerprint, data: PolicyData, _size: u64) {
        self.state.lock().touch(data.0);
    }

    fn use_and_update(&self, _id: &Fingerprint, data: PolicyData, old_size: u64, new_size: u64) {
        let mut state = self.state.lock();
        state.touch(data.0);
        state.free_space += old_size as i64 - new_size as i64;
    }

    fn destroy(&self, id: &Fingerprint, data: PolicyData, size: u64) {
        let mut state = self.state.lock();
        if state.nodes.get(data.0).and_then(Option::as_ref).is_none() {
            return;
        }
        state.unlink(data.0);
        state.nodes[data.0] = None;
        state.free_slots.push(data.0);
        state.free_space += size as i64;
        state.live -= 1;
        trace!(fingerprint = %id, size, free = state.free_space, "lru destroy");
    }

    fn next_item(&self, required: u64) -> Option<Fingerprint> {
        let state = self.state.lock();
        if state.free_space >= required as i64 {
            return None;
        }
        let tail = state.tail?;
        state.nodes.get(tail).and_then(Option::as_ref).map(|n| n.id)
    }

    fn free_space(&self) -> i64 {
        self.state.lock().free_space
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    #[test]
    fn test_cachable_respects_fraction() {
        let policy = LruPolicy::new(1000, 0.5);
        assert!(policy.cachable(499));
        assert!(!policy.cachable(500));
        assert!(!policy.cachable(u64::MAX));
    }

    #[test]
    fn test_free_space_accounting() {
        let policy = LruPolicy::new(1000, 1.0);
        let a = policy.create(&fp(1), 300);
        let b = policy.create(&fp(2), 200);
        assert_eq!(policy.free_space(), 500);

        policy.use_and_update(&fp(1), a, 300, 100);
        assert_eq!(policy.free_space(), 700);

        policy.destroy(&fp(2), b, 200);
        assert_eq!(policy.free_space(), 900);
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_next_item_is_least_recently_used() {
        let policy = LruPolicy::new(100, 1.0);
        let a = policy.create(&fp(1), 40);
        policy.create(&fp(2), 40);
        assert_eq!(policy.next_item(10), None);

        assert_eq!(policy.next_item(30), Some(fp(1)));
        policy.use_entry(&fp(1), a, 40);
        assert_eq!(policy.next_item(30), Some(fp(2)));
        assert_eq!(policy.recency_order(), vec![fp(1), fp(2)]);
    }

    #[test]
    fn test_slots_are_reused() {
        let policy = LruPolicy::new(100, 1.0);
        let a = policy.create(&fp(1), 10);
        policy.destroy(&fp(1), a, 10);
        let b = policy.create(&fp(2), 10);
        assert_eq!(a, b);
        assert_eq!(policy.recency_order(), vec![fp(2)]);
    }

    #[test]
    fn test_double_destroy_is_ignored() {
        let policy = LruPolicy::new(100, 1.0);
        let a = policy.create(&fp(1), 10);
        policy.destroy(&fp(1), a, 10);
        policy.destroy(&fp(1), a, 10);
        assert_eq!(policy.free_space(), 100);
    }

    #[test]
    fn test_empty_policy_has_no_victim() {
        let policy = LruPolicy::new(10, 1.0);
        assert_eq!(policy.next_item(100), None);
    }
}
