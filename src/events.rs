//! Event bus and broadcast bookkeeping.
//!
//! Events are queued by [`EventBus::publish`] and handed to the scheduler by
//! [`EventBus::drain`] at the start of the following tick; nothing published
//! during a tick is seen by that same tick.

use crate::program::Hat;
use crate::target::{Target, TargetId};
use crate::thread::ThreadId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastTicket(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    GreenFlag,
    /// `ticket` is set when a `broadcast and wait` is waiting on it.
    Broadcast {
        name: String,
        ticket: Option<BroadcastTicket>,
    },
    KeyPressed(String),
    Clicked(TargetId),
    CloneCreated {
        parent: TargetId,
        clone: TargetId,
    },
}

impl Event {
    pub fn broadcast(name: &str) -> Self {
        Event::Broadcast {
            name: name.to_string(),
            ticket: None,
        }
    }

    /// Whether a script with `hat` on `target` should start for this event.
    /// Clone-start scripts are woken through their waiting threads rather
    /// than started here.
    pub fn triggers(&self, hat: &Hat, target: &Target) -> bool {
        match (self, hat) {
            (Event::GreenFlag, Hat::GreenFlag) => !target.is_clone(),
            (Event::Broadcast { name, .. }, Hat::BroadcastReceived(message)) => {
                name.eq_ignore_ascii_case(message)
            }
            (Event::KeyPressed(key), Hat::KeyPressed(wanted)) => {
                wanted.eq_ignore_ascii_case("any") || key.eq_ignore_ascii_case(wanted)
            }
            (Event::Clicked(id), Hat::Clicked) => *id == target.id,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    queue: Vec<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: Event) {
        self.queue.push(event);
    }

    /// Takes every queued event in publish order.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.queue)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Default)]
struct Pending {
    delivered: bool,
    receivers: BTreeSet<ThreadId>,
}

/// Tracks which threads a `broadcast and wait` is still waiting on.
///
/// A ticket completes once its broadcast has been delivered and every
/// receiver thread started for it has finished.
#[derive(Debug, Default)]
pub struct BroadcastTracker {
    next: u64,
    pending: BTreeMap<BroadcastTicket, Pending>,
}

impl BroadcastTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) -> BroadcastTicket {
        self.next += 1;
        let ticket = BroadcastTicket(self.next);
        self.pending.insert(ticket, Pending::default());
        ticket
    }

    pub fn delivered(&mut self, ticket: BroadcastTicket, receivers: &[ThreadId]) {
        if let Some(pending) = self.pending.get_mut(&ticket) {
            pending.delivered = true;
            pending.receivers.extend(receivers.iter().copied());
        }
    }

    pub fn thread_finished(&mut self, thread: ThreadId) {
        for pending in self.pending.values_mut() {
            pending.receivers.remove(&thread);
        }
    }

    /// Unknown tickets count as complete.
    pub fn is_complete(&self, ticket: BroadcastTicket) -> bool {
        self.pending
            .get(&ticket)
            .map(|p| p.delivered && p.receivers.is_empty())
            .unwrap_or(true)
    }

    pub fn release(&mut self, ticket: BroadcastTicket) {
        self.pending.remove(&ticket);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Tickets opened and not yet released.
    pub fn open_tickets(&self) -> usize {
        self.pending.len()
    }
}
