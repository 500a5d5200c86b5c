//! Sliding-window rate limiting and quota gauges (spec §4.7, X2). The
//! sliding-window core is the teacher's `RateLimiter::check_with_info`,
//! generalized from per-IP action keys to the gateway's auth/message/
//! memory/task/API-key scopes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub retry_after_ms: u64,
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// `key` is scope-qualified, e.g. `"auth:1.2.3.4"`, `"msg:<session>"`,
    /// `"mem_write:<agent>"`, `"task_submit:<agent>"`, `"api:<key_id>"`.
    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => *t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        limit: max,
                        remaining: 0,
                        retry_after_ms: 1000,
                    }
                }
            };
            let elapsed = now.duration_since(oldest);
            let retry_after_ms = if elapsed < window {
                (window - elapsed).as_millis() as u64 + 50
            } else {
                50
            };
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_ms,
            };
        }

        entries.push(now);
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining: max - entries.len(),
            retry_after_ms: 0,
        }
    }

    /// Drops scope entries whose window has fully expired, bounding memory
    /// growth from short-lived session keys. Run periodically from a
    /// sweeper alongside presence/memory TTL sweeps.
    pub fn gc(&self, max_window_secs: u64) {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(max_window_secs);
        limits.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < window);
            !entries.is_empty()
        });
    }
}

/// Per-tenant usage gauges checked against plan quotas (spec §4.7): counts
/// rise and fall as agents connect/disconnect or write memory, independent
/// of the sliding-window request limiter above.
#[derive(Default)]
pub struct QuotaGauges {
    concurrent_agents: Mutex<HashMap<String, i64>>,
    messages_today: Mutex<HashMap<String, i64>>,
    memory_entries: Mutex<HashMap<String, i64>>,
    storage_bytes: Mutex<HashMap<String, AtomicI64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLevel {
    Ok,
    Soft,
    Hard,
}

fn level(current: i64, limit: i64, soft_fraction: f64) -> QuotaLevel {
    if limit <= 0 {
        return QuotaLevel::Ok;
    }
    if current >= limit {
        QuotaLevel::Hard
    } else if (current as f64) >= (limit as f64) * soft_fraction {
        QuotaLevel::Soft
    } else {
        QuotaLevel::Ok
    }
}

impl QuotaGauges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_connected(&self, tenant: &str) -> i64 {
        let mut map = self.concurrent_agents.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(tenant.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn agent_disconnected(&self, tenant: &str) {
        let mut map = self.concurrent_agents.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = map.get_mut(tenant) {
            *entry = (*entry - 1).max(0);
        }
    }

    pub fn concurrent_agents(&self, tenant: &str) -> i64 {
        *self
            .concurrent_agents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant)
            .unwrap_or(&0)
    }

    pub fn record_message(&self, tenant: &str) -> i64 {
        let mut map = self.messages_today.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(tenant.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn messages_today(&self, tenant: &str) -> i64 {
        *self
            .messages_today
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant)
            .unwrap_or(&0)
    }

    pub fn reset_daily_counters(&self) {
        self.messages_today.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn memory_entry_created(&self, tenant: &str) -> i64 {
        let mut map = self.memory_entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(tenant.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn memory_entry_deleted(&self, tenant: &str) {
        let mut map = self.memory_entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = map.get_mut(tenant) {
            *entry = (*entry - 1).max(0);
        }
    }

    pub fn memory_entries(&self, tenant: &str) -> i64 {
        *self
            .memory_entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant)
            .unwrap_or(&0)
    }

    pub fn add_storage_bytes(&self, tenant: &str, delta: i64) -> i64 {
        let map = self.storage_bytes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = map.get(tenant) {
            return counter.fetch_add(delta, Ordering::Relaxed) + delta;
        }
        drop(map);
        let mut map = self.storage_bytes.lock().unwrap_or_else(|e| e.into_inner());
        let counter = map
            .entry(tenant.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        counter.fetch_add(delta, Ordering::Relaxed) + delta
    }

    pub fn storage_bytes(&self, tenant: &str) -> i64 {
        self.storage_bytes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn check_level(current: i64, limit: i64, soft_fraction: f64) -> QuotaLevel {
        level(current, limit, soft_fraction)
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
