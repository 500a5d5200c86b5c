use super::*;
use std::thread::sleep;

#[test]
fn replaying_the_same_ref_returns_the_cached_response() {
    let cache = IdempotencyCache::new(300);
    assert!(cache.get("agent-1", "req-1").is_none());
    cache.put("agent-1", "req-1", serde_json::json!({"ok": true}));
    assert_eq!(cache.get("agent-1", "req-1"), Some(serde_json::json!({"ok": true})));
}

#[test]
fn distinct_agents_do_not_share_a_ref_namespace() {
    let cache = IdempotencyCache::new(300);
    cache.put("agent-1", "req-1", serde_json::json!({"v": 1}));
    assert!(cache.get("agent-2", "req-1").is_none());
}

#[test]
fn entries_expire_after_ttl() {
    let cache = IdempotencyCache::new(0);
    cache.put("agent-1", "req-1", serde_json::json!({"v": 1}));
    sleep(std::time::Duration::from_millis(5));
    assert!(cache.get("agent-1", "req-1").is_none());
}
