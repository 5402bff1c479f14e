//! The shared fields every scheduled event (idle, timer, io) carries,
//! translated from the original's header-prefix polymorphism
//! (`event_t` embedded first in `idle_t`/`timer_t`/`io_t`) into a single
//! Rust struct each concrete kind holds as a field instead of inheriting.

/// Priority range accepted by the loop; mirrors
/// `ARS_EVENT_LOWEST_PRIORITY`/`ARS_EVENT_HIGHEST_PRIORITY`.
pub use crate::collections::pending::{HIGHEST_PRIORITY, LOWEST_PRIORITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Idle,
    Timeout,
    Period,
    Io,
    Custom,
}

/// Fields common to every schedulable event. Concrete event types
/// (`Idle`, `Timer`, `Handle`) embed this instead of inheriting from it.
#[derive(Debug, Clone)]
pub struct EventBase {
    pub id: u64,
    pub kind: EventKind,
    pub priority: i32,
    pub active: bool,
    pub pending: bool,
    /// Intrusive link used only while the event sits in a pending bucket.
    pub pending_next: Option<usize>,
}

impl EventBase {
    pub fn new(id: u64, kind: EventKind, priority: i32) -> EventBase {
        EventBase {
            id,
            kind,
            priority: priority.clamp(LOWEST_PRIORITY, HIGHEST_PRIORITY),
            active: false,
            pending: false,
            pending_next: None,
        }
    }
}
