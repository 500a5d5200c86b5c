//! Idempotency cache (spec §4.7, X2): a `(agent, ref) -> response` TTL cache
//! so a retried envelope returns the original result instead of re-running
//! the operation. Generalizes `zhubby-moltis`'s `DedupeCache` (which only
//! tracked a seen/not-seen bit) to also remember the cached response.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CachedResponse {
    value: serde_json::Value,
    inserted_at: Instant,
}

pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
    ttl: Duration,
    max_entries: usize,
}

const MAX_ENTRIES: usize = 10_000;

impl IdempotencyCache {
    pub fn new(ttl_secs: u64) -> Self {
        IdempotencyCache {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
            max_entries: MAX_ENTRIES,
        }
    }

    fn key(agent: &str, r#ref: &str) -> String {
        format!("{agent}:{ref}")
    }

    /// Returns the cached response for `(agent, ref)` if one was recorded
    /// within the TTL window.
    pub fn get(&self, agent: &str, r#ref: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, self.ttl);
        entries.get(&Self::key(agent, r#ref)).map(|c| c.value.clone())
    }

    /// Records the response produced for `(agent, ref)` so a retry within
    /// the TTL window short-circuits to this value.
    pub fn put(&self, agent: &str, r#ref: &str, value: serde_json::Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, self.ttl);
        if entries.len() >= self.max_entries
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, v)| v.inserted_at)
                .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest);
        }
        entries.insert(
            Self::key(agent, r#ref),
            CachedResponse {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn gc(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, self.ttl);
    }
}

fn evict_expired(entries: &mut HashMap<String, CachedResponse>, ttl: Duration) {
    let cutoff = Instant::now() - ttl;
    entries.retain(|_, v| v.inserted_at > cutoff);
}

#[cfg(test)]
#[path = "idempotency_tests.rs"]
mod tests;
