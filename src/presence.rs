//! Presence index (spec §4.3, C3): who is online in a fleet, their state,
//! and a sweeper that demotes agents who stop heartbeating. Generalizes the
//! teacher's `PresenceTracker`/`PresenceGuard` (room-scoped join/leave
//! counting) to fleet-scoped heartbeat staleness.

use crate::events::{FleetBus, RingEvent};
use crate::models::{PresenceEntry, PresenceState};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

struct PresenceInner {
    entry: PresenceEntry,
    last_heartbeat: Instant,
}

/// Maps `fleet -> agent -> PresenceInner`. Mirrors the teacher's
/// `RwLock<HashMap<room, HashMap<sender, PresenceInner>>>` shape.
#[derive(Clone)]
pub struct PresenceIndex {
    inner: Arc<RwLock<HashMap<String, HashMap<String, PresenceInner>>>>,
}

impl Default for PresenceIndex {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `agent` present in `fleet` with the given state. Returns true
    /// if this is a new presence entry (the agent just joined).
    pub fn update(&self, fleet: &str, entry: PresenceEntry) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let room = map.entry(fleet.to_string()).or_default();
        let is_new = !room.contains_key(&entry.agent);
        room.insert(
            entry.agent.clone(),
            PresenceInner {
                entry,
                last_heartbeat: Instant::now(),
            },
        );
        is_new
    }

    /// Refreshes the heartbeat clock for an already-present agent without
    /// changing its reported state.
    pub fn heartbeat(&self, fleet: &str, agent: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(fleet)
            && let Some(inner) = room.get_mut(agent)
        {
            inner.last_heartbeat = Instant::now();
        }
    }

    pub fn set_state(&self, fleet: &str, agent: &str, state: PresenceState) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(fleet)
            && let Some(inner) = room.get_mut(agent)
        {
            inner.entry.state = state;
        }
    }

    pub fn set_task(&self, fleet: &str, agent: &str, task: Option<String>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(fleet)
            && let Some(inner) = room.get_mut(agent)
        {
            inner.entry.task = task;
        }
    }

    /// Removes `agent` from `fleet`'s roster. Returns true if it was present.
    pub fn remove(&self, fleet: &str, agent: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = map.get_mut(fleet) {
            let removed = room.remove(agent).is_some();
            if room.is_empty() {
                map.remove(fleet);
            }
            return removed;
        }
        false
    }

    pub fn roster(&self, fleet: &str) -> Vec<PresenceEntry> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(fleet)
            .map(|room| room.values().map(|i| i.entry.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, fleet: &str, agent: &str) -> Option<PresenceEntry> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(fleet).and_then(|room| room.get(agent)).map(|i| i.entry.clone())
    }

    /// Drops agents whose last heartbeat is older than `stale_after`,
    /// publishing `AgentLeft` for each, and returns how many were dropped.
    fn sweep(&self, stale_after: std::time::Duration, bus: &FleetBus) -> usize {
        let mut dropped = 0;
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        map.retain(|fleet, room| {
            let stale: Vec<String> = room
                .iter()
                .filter(|(_, i)| now.duration_since(i.last_heartbeat) > stale_after)
                .map(|(agent, _)| agent.clone())
                .collect();
            for agent in stale {
                room.remove(&agent);
                dropped += 1;
                bus.publish(RingEvent::AgentLeft {
                    fleet: fleet.clone(),
                    agent,
                });
            }
            !room.is_empty()
        });
        dropped
    }
}

/// Spawns the periodic staleness sweep described in spec §4.3.
pub fn spawn_presence_sweep(
    presence: PresenceIndex,
    bus: Arc<FleetBus>,
    interval_secs: u64,
    stale_secs: u64,
) {
    tokio::spawn(async move {
        let stale_after = std::time::Duration::from_secs(stale_secs);
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
            let dropped = presence.sweep(stale_after, &bus);
            if dropped > 0 {
                log::info!("presence sweep: dropped {} stale agents", dropped);
            }
        }
    });
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
