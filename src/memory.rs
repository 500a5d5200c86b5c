//! Shared Memory Service (spec §4.4, C4): a per-fleet keyed map with
//! set/get/delete/query, TTL eviction, and glob-pattern subscriptions over
//! `/`-separated key segments. Mutation ordering follows spec §4.4: the
//! event log append happens before the in-memory broadcast, the same
//! log-then-notify order the teacher uses when a DB write precedes an
//! `events.publish` call in its route handlers.

use crate::events::{FleetBus, RingEvent};
use crate::models::{MemoryEntry, MemoryQuery, MemoryValueKind};
use globset::{Glob, GlobMatcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

struct FleetMemory {
    entries: HashMap<String, MemoryEntry>,
    /// Serializes mutations to a single key so concurrent writers can't
    /// interleave a read-modify-write (spec §4.4 concurrency rule).
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for FleetMemory {
    fn default() -> Self {
        FleetMemory {
            entries: HashMap::new(),
            key_locks: Mutex::new(HashMap::new()),
        }
    }
}

pub struct Subscription {
    pub id: String,
    pub agent: String,
    pub matcher: GlobMatcher,
}

#[derive(Clone)]
pub struct MemoryStore {
    fleets: Arc<RwLock<HashMap<String, FleetMemory>>>,
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            fleets: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[derive(Debug)]
pub enum MemoryError {
    TooLarge,
    InvalidPattern(String),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a key, bumping `version` and `updated_at`.
    /// Returns the stored entry so the caller can append it to the event
    /// log and broadcast it.
    pub fn set(
        &self,
        fleet: &str,
        key: String,
        value: serde_json::Value,
        kind: MemoryValueKind,
        tags: Vec<String>,
        author: String,
        ttl_secs: Option<i64>,
        metadata: serde_json::Value,
        max_value_bytes: usize,
    ) -> Result<MemoryEntry, MemoryError> {
        let size = value.to_string().len();
        if size > max_value_bytes {
            return Err(MemoryError::TooLarge);
        }

        let lock = self.key_lock(fleet, &key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut fleets = self.fleets.write().unwrap_or_else(|e| e.into_inner());
        let memory = fleets.entry(fleet.to_string()).or_default();
        let now = chrono::Utc::now().to_rfc3339();

        let version = memory.entries.get(&key).map(|e| e.version + 1).unwrap_or(1);
        let created_at = memory
            .entries
            .get(&key)
            .map(|e| e.created_at.clone())
            .unwrap_or_else(|| now.clone());

        let entry = MemoryEntry {
            key: key.clone(),
            value,
            kind,
            tags,
            author,
            created_at,
            updated_at: now,
            version,
            ttl_secs,
            access_count: 0,
            metadata,
        };
        memory.entries.insert(key, entry.clone());
        Ok(entry)
    }

    pub fn get(&self, fleet: &str, key: &str) -> Option<MemoryEntry> {
        let mut fleets = self.fleets.write().unwrap_or_else(|e| e.into_inner());
        let memory = fleets.get_mut(fleet)?;
        let entry = memory.entries.get_mut(key)?;
        entry.access_count += 1;
        Some(entry.clone())
    }

    pub fn delete(&self, fleet: &str, key: &str) -> bool {
        let lock = self.key_lock(fleet, key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut fleets = self.fleets.write().unwrap_or_else(|e| e.into_inner());
        fleets
            .get_mut(fleet)
            .map(|m| m.entries.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn query(&self, fleet: &str, q: &MemoryQuery) -> Vec<MemoryEntry> {
        let fleets = self.fleets.read().unwrap_or_else(|e| e.into_inner());
        let Some(memory) = fleets.get(fleet) else {
            return vec![];
        };

        let mut results: Vec<MemoryEntry> = memory
            .entries
            .values()
            .filter(|e| q.tags.is_empty() || q.tags.iter().all(|t| e.tags.contains(t)))
            .filter(|e| q.author.as_deref().is_none_or(|a| a == e.author))
            .filter(|e| {
                q.since
                    .as_deref()
                    .is_none_or(|since| e.updated_at.as_str() > since)
            })
            .filter(|e| {
                q.text.as_deref().is_none_or(|needle| {
                    e.value
                        .to_string()
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                })
            })
            .cloned()
            .collect();

        match q.sort.as_str() {
            "created_at" => results.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            "access_count" => results.sort_by(|a, b| b.access_count.cmp(&a.access_count)),
            _ => results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }

        results.into_iter().skip(q.offset).take(q.limit).collect()
    }

    /// Sweeps expired entries (`ttl_secs` elapsed since `updated_at`) across
    /// all fleets. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        let mut fleets = self.fleets.write().unwrap_or_else(|e| e.into_inner());
        let now = chrono::Utc::now();
        for memory in fleets.values_mut() {
            memory.entries.retain(|_, entry| {
                let Some(ttl) = entry.ttl_secs else {
                    return true;
                };
                let Ok(created) = chrono::DateTime::parse_from_rfc3339(&entry.created_at) else {
                    return true;
                };
                let expired = now.signed_duration_since(created) > chrono::Duration::seconds(ttl);
                if expired {
                    removed += 1;
                }
                !expired
            });
        }
        removed
    }

    fn key_lock(&self, fleet: &str, key: &str) -> Arc<Mutex<()>> {
        let fleets = self.fleets.read().unwrap_or_else(|e| e.into_inner());
        if let Some(memory) = fleets.get(fleet) {
            let mut locks = memory.key_locks.lock().unwrap_or_else(|e| e.into_inner());
            return locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        }
        drop(fleets);
        let mut fleets = self.fleets.write().unwrap_or_else(|e| e.into_inner());
        let memory = fleets.entry(fleet.to_string()).or_default();
        let mut locks = memory.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Registers a glob subscription (`*`/`**` over `/`-separated segments)
    /// for `agent` in `fleet`. Returns the subscription id.
    pub fn subscribe(&self, fleet: &str, agent: &str, pattern: &str) -> Result<String, MemoryError> {
        let glob = Glob::new(pattern).map_err(|e| MemoryError::InvalidPattern(e.to_string()))?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        subs.entry(fleet.to_string()).or_default().push(Subscription {
            id: id.clone(),
            agent: agent.to_string(),
            matcher: glob.compile_matcher(),
        });
        Ok(id)
    }

    pub fn unsubscribe(&self, fleet: &str, subscription_id: &str) {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subs.get_mut(fleet) {
            list.retain(|s| s.id != subscription_id);
        }
    }

    /// Returns the agents subscribed to a key via a matching glob pattern.
    pub fn matching_subscribers(&self, fleet: &str, key: &str) -> Vec<String> {
        let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        subs.get(fleet)
            .map(|list| {
                list.iter()
                    .filter(|s| s.matcher.is_match(key))
                    .map(|s| s.agent.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn spawn_memory_sweep(store: MemoryStore, interval_secs: u64) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
            let removed = store.sweep_expired();
            if removed > 0 {
                log::info!("memory TTL sweep: removed {} expired entries", removed);
            }
        }
    });
}

/// Publishes the event-log-then-broadcast pair for a memory mutation.
pub fn publish_memory_set(
    log: &dyn crate::event_log::EventLog,
    bus: &FleetBus,
    tenant: &str,
    fleet: &str,
    entry: MemoryEntry,
) {
    log.append(tenant, fleet, "memory.set", &serde_json::to_value(&entry).unwrap());
    bus.publish(RingEvent::MemorySet {
        fleet: fleet.to_string(),
        entry,
    });
}

pub fn publish_memory_delete(
    log: &dyn crate::event_log::EventLog,
    bus: &FleetBus,
    tenant: &str,
    fleet: &str,
    key: String,
) {
    log.append(tenant, fleet, "memory.delete", &serde_json::json!({"key": key}));
    bus.publish(RingEvent::MemoryDeleted {
        fleet: fleet.to_string(),
        key,
    });
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
