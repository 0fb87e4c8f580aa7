//! Work items that can be cancelled before they run.
//!
//! An [`AbortableWorkItem`] carries two closures: the body and an abort
//! handler. Exactly one of them ever runs. Whichever of [`run`] and
//! [`abort`] moves the shared state out of `Pending` first wins; the loser
//! observes the claim and does nothing.
//!
//! The item is a cheap handle over shared state, so the scheduler can hold
//! one clone in a [`WorkQueue`](super::WorkQueue) while the caller keeps
//! another to abort with.
//!
//! # Example
//!
//! ```ignore
//! let item = AbortableWorkItem::new(
//!     || println!("ran"),
//!     || println!("aborted"),
//! );
//! queue.enqueue(Box::new(item.clone()));
//! item.abort_after(Duration::from_secs(5));
//! ```
//!
//! [`run`]: AbortableWorkItem::run
//! [`abort`]: AbortableWorkItem::abort

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::WorkItem;

type Thunk = Box<dyn FnOnce() + Send>;

/// Claim state of an abortable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortState {
    /// Neither path has claimed the item.
    Pending = 0,
    /// The body was claimed and has run (or is running).
    Executed = 1,
    /// The abort handler was claimed and has run (or is running).
    Aborted = 2,
}

impl AbortState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Executed,
            2 => Self::Aborted,
            _ => Self::Pending,
        }
    }
}

struct Shared {
    state: AtomicU8,
    body: Mutex<Option<Thunk>>,
    on_abort: Mutex<Option<Thunk>>,
}

impl Shared {
    fn claim(&self, to: AbortState) -> bool {
        self.state
            .compare_exchange(
                AbortState::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A work item whose body and abort handler are mutually exclusive.
#[derive(Clone)]
pub struct AbortableWorkItem {
    shared: Arc<Shared>,
}

impl AbortableWorkItem {
    /// Creates an item from its body and abort handler.
    pub fn new<B, A>(body: B, on_abort: A) -> Self
    where
        B: FnOnce() + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(AbortState::Pending as u8),
                body: Mutex::new(Some(Box::new(body))),
                on_abort: Mutex::new(Some(Box::new(on_abort))),
            }),
        }
    }

    pub fn state(&self) -> AbortState {
        AbortState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Runs the body unless the item was already claimed.
    ///
    /// Returns `true` if the body ran.
    pub fn run(&self) -> bool {
        if !self.shared.claim(AbortState::Executed) {
            return false;
        }
        // Both thunks are released after a claim so captured state drops.
        self.shared.on_abort.lock().take();
        if let Some(body) = self.shared.body.lock().take() {
            body();
        }
        true
    }

    /// Runs the abort handler unless the item was already claimed.
    ///
    /// Returns `true` if the abort handler ran.
    pub fn abort(&self) -> bool {
        if !self.shared.claim(AbortState::Aborted) {
            return false;
        }
        self.shared.body.lock().take();
        if let Some(on_abort) = self.shared.on_abort.lock().take() {
            on_abort();
        }
        true
    }

    /// Schedules an abort after `delay` on the current tokio runtime.
    ///
    /// The returned handle resolves to whether the abort won.
    pub fn abort_after(&self, delay: Duration) -> tokio::task::JoinHandle<bool> {
        let item = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let won = item.abort();
            if won {
                debug!(delay_ms = delay.as_millis() as u64, "work item timed out");
            }
            won
        })
    }
}

impl WorkItem for AbortableWorkItem {
    fn run(self: Box<Self>) {
        AbortableWorkItem::run(&self);
    }
}

impl std::fmt::Debug for AbortableWorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortableWorkItem")
            .field("state", &self.state())
            .finish()
    }
}
