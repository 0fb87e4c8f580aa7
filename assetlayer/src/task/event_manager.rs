//! Tiered publish/subscribe event bus.
//!
//! Listeners subscribe either to a primary id (every event of a kind) or to
//! an exact [`IdPair`]. Firing an event walks the tiers in order
//! Early → Middle → Late; within each tier primary-id listeners run first,
//! then listeners on the exact pair.
//!
//! ```text
//!   fire(ev) ──► Early:  primary listeners ─► pair listeners
//!                Middle: primary listeners ─► pair listeners
//!                Late:   primary listeners ─► pair listeners
//!                            │
//!                            └─ any Cancel response stops the walk
//!                               after the current tier
//! ```
//!
//! Every listener of a tier runs even if an earlier one cancels. A listener
//! answering [`EventResponse::Delete`] is removed after that call.
//!
//! Listeners are never called with the subscription table locked, so a
//! listener may subscribe, unsubscribe or fire from inside its callback.
//!
//! # Dispatch modes
//!
//! By default `fire` dispatches on the calling thread. A manager built with
//! [`EventManager::with_queue`] instead enqueues the dispatch on a
//! [`WorkQueue`], so listeners run wherever that queue is drained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::event::{
    Event, EventHistory, EventOrder, EventResponse, EventTarget, IdPair, Listener, SubscriptionId,
};
use super::WorkQueue;

// =============================================================================
// Subscription table
// =============================================================================

struct Slot<E> {
    id: SubscriptionId,
    listener: Listener<E>,
}

impl<E> Clone for Slot<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: Arc::clone(&self.listener),
        }
    }
}

struct Tiers<E> {
    lists: [Vec<Slot<E>>; 3],
}

impl<E> Default for Tiers<E> {
    fn default() -> Self {
        Self {
            lists: [Vec::new(), Vec::new(), Vec::new()],
        }
    }
}

impl<E> Tiers<E> {
    fn is_empty(&self) -> bool {
        self.lists.iter().all(Vec::is_empty)
    }

    fn remove(&mut self, order: EventOrder, id: SubscriptionId) -> Option<Slot<E>> {
        let list = &mut self.lists[order.index()];
        let pos = list.iter().position(|s| s.id == id)?;
        Some(list.remove(pos))
    }
}

struct PrimaryEntry<E> {
    tiers: Tiers<E>,
    secondary: HashMap<String, Tiers<E>>,
}

impl<E> Default for PrimaryEntry<E> {
    fn default() -> Self {
        Self {
            tiers: Tiers::default(),
            secondary: HashMap::new(),
        }
    }
}

struct Location {
    target: EventTarget,
    order: EventOrder,
}

struct Table<E> {
    primaries: HashMap<String, PrimaryEntry<E>>,
    locations: HashMap<SubscriptionId, Location>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            primaries: HashMap::new(),
            locations: HashMap::new(),
        }
    }
}

impl<E> Table<E> {
    fn insert(&mut self, target: EventTarget, order: EventOrder, slot: Slot<E>) {
        let id = slot.id;
        match &target {
            EventTarget::Primary(primary) => {
                let entry = self.primaries.entry(primary.clone()).or_default();
                entry.tiers.lists[order.index()].push(slot);
            }
            EventTarget::Pair(pair) => {
                let entry = self.primaries.entry(pair.primary.clone()).or_default();
                let tiers = entry.secondary.entry(pair.secondary.clone()).or_default();
                tiers.lists[order.index()].push(slot);
            }
        }
        self.locations.insert(id, Location { target, order });
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<Slot<E>> {
        let location = self.locations.remove(&id)?;
        match &location.target {
            EventTarget::Primary(primary) => {
                let entry = self.primaries.get_mut(primary)?;
                entry.tiers.remove(location.order, id)
            }
            EventTarget::Pair(pair) => {
                let entry = self.primaries.get_mut(&pair.primary)?;
                let tiers = entry.secondary.get_mut(&pair.secondary)?;
                let slot = tiers.remove(location.order, id);
                if tiers.is_empty() {
                    entry.secondary.remove(&pair.secondary);
                }
                slot
            }
        }
    }

    fn snapshot(&self, id: &IdPair, order: EventOrder) -> Vec<Slot<E>> {
        let Some(entry) = self.primaries.get(&id.primary) else {
            return Vec::new();
        };
        let mut batch: Vec<Slot<E>> = entry.tiers.lists[order.index()].to_vec();
        if let Some(tiers) = entry.secondary.get(&id.secondary) {
            batch.extend(tiers.lists[order.index()].iter().cloned());
        }
        batch
    }
}

// =============================================================================
// Event manager
// =============================================================================

struct Inner<E> {
    table: Mutex<Table<E>>,
    next_id: AtomicU64,
    queue: Option<Arc<WorkQueue>>,
}

/// Subscription-based event bus with tiered delivery.
///
/// Cloning yields another handle to the same bus.
pub struct EventManager<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventManager<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> Default for EventManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventManager<E> {
    /// Creates a bus that dispatches on the firing thread.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a bus that dispatches through `queue`.
    pub fn with_queue(queue: Arc<WorkQueue>) -> Self {
        Self::build(Some(queue))
    }

    fn build(queue: Option<Arc<WorkQueue>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table::default()),
                next_id: AtomicU64::new(1),
                queue,
            }),
        }
    }

    /// Allocates a fresh subscription id for [`subscribe_id`](Self::subscribe_id).
    pub fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribes `listener` and returns its id.
    pub fn subscribe<F>(
        &self,
        target: impl Into<EventTarget>,
        order: EventOrder,
        listener: F,
    ) -> SubscriptionId
    where
        F: Fn(Option<&Arc<E>>) -> EventResponse + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.subscribe_id(id, target, order, listener);
        id
    }

    /// Subscribes `listener` under a caller-chosen id.
    ///
    /// An existing subscription with the same id is replaced.
    pub fn subscribe_id<F>(
        &self,
        id: SubscriptionId,
        target: impl Into<EventTarget>,
        order: EventOrder,
        listener: F,
    ) where
        F: Fn(Option<&Arc<E>>) -> EventResponse + Send + Sync + 'static,
    {
        let target = target.into();
        let mut table = self.inner.table.lock();
        if table.remove(id).is_some() {
            debug!(subscription = %id, "superseding subscription");
        }
        trace!(subscription = %id, ?target, ?order, "subscribe");
        table.insert(
            target,
            order,
            Slot {
                id,
                listener: Arc::new(listener),
            },
        );
    }

    /// Removes a subscription.
    ///
    /// With `notify`, the listener is called once more with `None`. Removing
    /// an unknown or already-removed id is a logged no-op. Returns whether a
    /// subscription was removed.
    pub fn unsubscribe(&self, id: SubscriptionId, notify: bool) -> bool {
        let removed = self.inner.table.lock().remove(id);
        match removed {
            Some(slot) => {
                trace!(subscription = %id, "unsubscribe");
                if notify {
                    (slot.listener)(None);
                }
                true
            }
            None => {
                warn!(subscription = %id, "unsubscribe of unknown id, usually a double unsubscribe");
                false
            }
        }
    }

    /// Whether `id` is currently subscribed.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.table.lock().locations.contains_key(&id)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.table.lock().locations.len()
    }

    /// Fires `event` to its listeners.
    pub fn fire(&self, event: impl Into<Arc<E>>) {
        let event = event.into();
        match &self.inner.queue {
            Some(queue) => {
                let inner = Arc::clone(&self.inner);
                queue.enqueue_fn(move || dispatch(&inner, event));
            }
            None => dispatch(&self.inner, event),
        }
    }
}

fn dispatch<E: Event>(inner: &Inner<E>, event: Arc<E>) {
    let id = event.id().clone();
    let mut handled = false;
    let mut canceled = false;

    for order in EventOrder::ALL {
        let batch = inner.table.lock().snapshot(&id, order);
        if batch.is_empty() {
            continue;
        }

        let mut cancel = false;
        for slot in batch {
            // Skip listeners removed by an earlier callback in this pass.
            if !inner.table.lock().locations.contains_key(&slot.id) {
                continue;
            }
            let response: EventResponse = (slot.listener)(Some(&event));
            handled = true;
            if response.deletes_listener() {
                inner.table.lock().remove(slot.id);
            }
            cancel |= response.cancels_event();
        }

        if cancel {
            trace!(event = %id, ?order, "event cancelled");
            canceled = true;
            break;
        }
    }

    let history = match (handled, canceled) {
        (_, true) => EventHistory::Canceled,
        (true, false) => EventHistory::Handled,
        (false, false) => EventHistory::Unhandled,
    };
    if history == EventHistory::Unhandled {
        trace!(event = %id, "no listeners for event");
    }
    event.on_dispatched(history);
}
