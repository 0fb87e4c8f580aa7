//! Event identity, listener responses and delivery tiers.

use std::fmt;
use std::sync::Arc;

/// Two-level event identity.
///
/// The primary id names the kind of event (`"download"`, `"upload"`); the
/// secondary id narrows it to one subject, such as a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdPair {
    pub primary: String,
    pub secondary: String,
}

impl IdPair {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

impl fmt::Display for IdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.primary, self.secondary)
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    /// Every event with this primary id.
    Primary(String),
    /// Only events with this exact id pair.
    Pair(IdPair),
}

impl From<IdPair> for EventTarget {
    fn from(id: IdPair) -> Self {
        Self::Pair(id)
    }
}

impl From<&str> for EventTarget {
    fn from(primary: &str) -> Self {
        Self::Primary(primary.to_string())
    }
}

/// Delivery tier. All listeners of one tier run before any of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EventOrder {
    Early,
    #[default]
    Middle,
    Late,
}

impl EventOrder {
    pub const ALL: [EventOrder; 3] = [EventOrder::Early, EventOrder::Middle, EventOrder::Late];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A listener's verdict after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventResponse {
    /// Keep listening; let later tiers run.
    #[default]
    Nop,
    /// Remove this listener.
    Delete,
    /// Suppress later tiers.
    Cancel,
    /// Remove this listener and suppress later tiers.
    CancelAndDelete,
}

impl EventResponse {
    pub fn deletes_listener(self) -> bool {
        matches!(self, Self::Delete | Self::CancelAndDelete)
    }

    pub fn cancels_event(self) -> bool {
        matches!(self, Self::Cancel | Self::CancelAndDelete)
    }
}

/// How dispatch of an event ended, reported back to the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventHistory {
    /// No listener was registered for the event.
    Unhandled,
    /// At least one listener ran and no tier was cancelled.
    Handled,
    /// A listener cancelled the event before the last tier.
    Canceled,
}

/// An event that can be dispatched by an [`EventManager`](super::EventManager).
pub trait Event: Send + Sync + 'static {
    fn id(&self) -> &IdPair;

    /// Called once after all tiers have run.
    fn on_dispatched(&self, _history: EventHistory) {}
}

/// Handle returned by subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Listener callback. Receives `None` when notified of its own removal.
pub type Listener<E> = Arc<dyn Fn(Option<&Arc<E>>) -> EventResponse + Send + Sync>;
