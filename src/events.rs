//! In-process pub/sub fan-out (spec §4.2, C2), generalizing the teacher's
//! single-topic `EventBus`/`ChatEvent` broadcast channel to fleet-scoped
//! events with tag/direct routing.

use crate::models::{ActivityEvent, DirectMessage, Group, MemoryEntry, PresenceEntry, Task};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum RingEvent {
    AgentJoined { fleet: String, entry: PresenceEntry },
    AgentLeft { fleet: String, agent: String },
    PresenceChanged { fleet: String, entry: PresenceEntry },
    Activity { fleet: String, event: ActivityEvent },
    MemorySet { fleet: String, entry: MemoryEntry },
    MemoryDeleted { fleet: String, key: String },
    DirectMessage { fleet: String, message: DirectMessage },
    TaskUpdated { fleet: String, task: Task },
    GroupUpdated { fleet: String, group: Group },
}

impl RingEvent {
    pub fn fleet(&self) -> &str {
        match self {
            RingEvent::AgentJoined { fleet, .. }
            | RingEvent::AgentLeft { fleet, .. }
            | RingEvent::PresenceChanged { fleet, .. }
            | RingEvent::Activity { fleet, .. }
            | RingEvent::MemorySet { fleet, .. }
            | RingEvent::MemoryDeleted { fleet, .. }
            | RingEvent::DirectMessage { fleet, .. }
            | RingEvent::TaskUpdated { fleet, .. }
            | RingEvent::GroupUpdated { fleet, .. } => fleet,
        }
    }
}

/// Scoped, fleet-keyed pub/sub. Every connected session subscribes once and
/// filters by `fleet` (and, for `Activity`/`DirectMessage`, by tag/recipient)
/// on receive, the same pattern as the teacher's `routes/stream.rs` `select!`
/// loop filtering by `room_id`.
pub struct FleetBus {
    pub sender: broadcast::Sender<RingEvent>,
}

impl Default for FleetBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        FleetBus { sender }
    }

    pub fn publish(&self, event: RingEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RingEvent> {
        self.sender.subscribe()
    }
}
