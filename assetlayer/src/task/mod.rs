//! Task and event substrate.
//!
//! - [`WorkQueue`] / [`WorkItem`]: deferred execution, consumed by blocking
//!   workers ([`WorkerPool`]) or by polling from an embedding thread.
//! - [`AbortableWorkItem`]: work that can be cancelled; body and abort
//!   handler are mutually exclusive.
//! - [`EventManager`]: tiered publish/subscribe bus used to deliver transfer
//!   outcomes.

mod abortable;
mod event;
mod event_manager;
mod work_queue;
mod worker_pool;

pub use abortable::{AbortState, AbortableWorkItem};
pub use event::{
    Event, EventHistory, EventOrder, EventResponse, EventTarget, IdPair, Listener, SubscriptionId,
};
pub use event_manager::EventManager;
pub use work_queue::{WorkItem, WorkQueue};
pub use worker_pool::WorkerPool;
