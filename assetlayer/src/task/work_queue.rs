//! Deferred work execution.
//!
//! A [`WorkQueue`] holds boxed [`WorkItem`]s. It can be consumed two ways,
//! and both may be mixed on the same queue:
//!
//! - **Blocking**: worker threads park in [`WorkQueue::dequeue_blocking`]
//!   until an item or a wake sentinel arrives (see [`super::WorkerPool`]).
//! - **Polling**: an embedding thread drains with [`WorkQueue::dequeue_poll`],
//!   [`WorkQueue::dequeue_all`] or [`WorkQueue::dequeue_until`].
//!
//! Polling never consumes wake sentinels, so every blocked worker still
//! receives exactly one at shutdown.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// A unit of deferred work.
pub trait WorkItem: Send {
    /// Executes the work, consuming the item.
    fn run(self: Box<Self>);
}

impl<F> WorkItem for F
where
    F: FnOnce() + Send,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// `None` entries are wake sentinels for blocked workers.
type Slot = Option<Box<dyn WorkItem>>;

/// FIFO queue of work items shared between producers and consumers.
#[derive(Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<Slot>>,
    available: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an item for execution.
    pub fn enqueue(&self, item: Box<dyn WorkItem>) {
        self.push(Some(item));
    }

    /// Queues a closure for execution.
    pub fn enqueue_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f));
    }

    /// Queues a wake sentinel; one blocked worker returns from
    /// [`dequeue_blocking`](Self::dequeue_blocking) with `false`.
    pub fn wake(&self) {
        self.push(None);
    }

    fn push(&self, slot: Slot) {
        self.items.lock().push_back(slot);
        self.available.notify_one();
    }

    /// Number of queued entries, sentinels included.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Parks until an entry is available, then runs it.
    ///
    /// Returns `false` when the entry was a wake sentinel.
    pub fn dequeue_blocking(&self) -> bool {
        let slot = {
            let mut items = self.items.lock();
            while items.is_empty() {
                self.available.wait(&mut items);
            }
            items.pop_front()
        };
        match slot.flatten() {
            Some(item) => {
                item.run();
                true
            }
            None => false,
        }
    }

    /// Runs at most one queued item without blocking.
    ///
    /// Returns `true` if an item ran.
    pub fn dequeue_poll(&self) -> bool {
        let item = {
            let mut items = self.items.lock();
            let pos = items.iter().position(Option::is_some);
            pos.and_then(|p| items.remove(p)).flatten()
        };
        match item {
            Some(item) => {
                item.run();
                true
            }
            None => false,
        }
    }

    /// Runs every item queued at the time of the call.
    ///
    /// Items enqueued by the running work are left for a later pass.
    /// Returns the number of items run.
    pub fn dequeue_all(&self) -> usize {
        let batch = self.splice();
        let count = batch.len();
        for item in batch {
            item.run();
        }
        if count > 0 {
            trace!(count, "drained work queue");
        }
        count
    }

    /// Like [`dequeue_all`](Self::dequeue_all) but stops once `deadline`
    /// passes; unrun items go back to the front of the queue in order.
    pub fn dequeue_until(&self, deadline: Instant) -> usize {
        let mut batch = self.splice().into_iter();
        let mut count = 0;
        while Instant::now() < deadline {
            match batch.next() {
                Some(item) => {
                    item.run();
                    count += 1;
                }
                None => return count,
            }
        }

        let leftover: Vec<_> = batch.collect();
        if !leftover.is_empty() {
            let mut items = self.items.lock();
            for item in leftover.into_iter().rev() {
                items.push_front(Some(item));
            }
        }
        count
    }

    /// Removes every queued item, leaving wake sentinels in place.
    fn splice(&self) -> Vec<Box<dyn WorkItem>> {
        let mut items = self.items.lock();
        let mut sentinels = 0;
        let batch = items
            .drain(..)
            .filter_map(|slot| {
                if slot.is_none() {
                    sentinels += 1;
                }
                slot
            })
            .collect();
        items.extend(std::iter::repeat_with(|| None).take(sentinels));
        batch
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter_item(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_poll_runs_one_item() {
        let queue = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.enqueue_fn(counter_item(&counter));
        queue.enqueue_fn(counter_item(&counter));

        assert!(queue.dequeue_poll());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_poll_on_empty_queue() {
        let queue = WorkQueue::new();
        assert!(!queue.dequeue_poll());
    }

    #[test]
    fn test_poll_skips_sentinels() {
        let queue = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.wake();
        queue.enqueue_fn(counter_item(&counter));

        assert!(queue.dequeue_poll());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1, "sentinel stays queued");
        assert!(!queue.dequeue_blocking());
    }

    #[test]
    fn test_dequeue_all_does_not_visit_reentrant_items() {
        let queue = Arc::new(WorkQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let q = Arc::clone(&queue);
        let c = Arc::clone(&counter);
        queue.enqueue_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = Arc::clone(&c);
            q.enqueue_fn(move || {
                c2.fetch_add(10, Ordering::SeqCst);
            });
        });

        assert_eq!(queue.dequeue_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.dequeue_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_dequeue_until_past_deadline_requeues_in_order() {
        let queue = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            queue.enqueue_fn(move || order.lock().push(i));
        }

        let ran = queue.dequeue_until(Instant::now() - Duration::from_millis(1));
        assert_eq!(ran, 0);
        assert_eq!(queue.len(), 3);

        queue.dequeue_all();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(WorkQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let q = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            let mut ran = 0;
            while q.dequeue_blocking() {
                ran += 1;
            }
            ran
        });

        std::thread::sleep(Duration::from_millis(20));
        queue.enqueue_fn(counter_item(&counter));
        queue.enqueue_fn(counter_item(&counter));
        queue.wake();

        assert_eq!(worker.join().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
