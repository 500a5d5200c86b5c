use super::*;

fn set(store: &MemoryStore, fleet: &str, key: &str, value: serde_json::Value) -> MemoryEntry {
    store
        .set(
            fleet,
            key.to_string(),
            value,
            MemoryValueKind::Json,
            vec![],
            "agent-1".to_string(),
            None,
            serde_json::json!({}),
            1024 * 1024,
        )
        .unwrap()
}

#[test]
fn set_then_get_round_trips_the_value() {
    let store = MemoryStore::new();
    set(&store, "fleet-a", "k", serde_json::json!({"x": 1}));
    let entry = store.get("fleet-a", "k").unwrap();
    assert_eq!(entry.value, serde_json::json!({"x": 1}));
    assert_eq!(entry.version, 1);
}

#[test]
fn overwriting_a_key_bumps_the_version() {
    let store = MemoryStore::new();
    set(&store, "fleet-a", "k", serde_json::json!(1));
    set(&store, "fleet-a", "k", serde_json::json!(2));
    let entry = store.get("fleet-a", "k").unwrap();
    assert_eq!(entry.version, 2);
}

#[test]
fn oversized_value_is_rejected() {
    let store = MemoryStore::new();
    let big = serde_json::json!("x".repeat(100));
    let result = store.set(
        "fleet-a",
        "k".to_string(),
        big,
        MemoryValueKind::Text,
        vec![],
        "agent-1".to_string(),
        None,
        serde_json::json!({}),
        10,
    );
    assert!(matches!(result, Err(MemoryError::TooLarge)));
}

#[test]
fn delete_removes_the_key() {
    let store = MemoryStore::new();
    set(&store, "fleet-a", "k", serde_json::json!(1));
    assert!(store.delete("fleet-a", "k"));
    assert!(store.get("fleet-a", "k").is_none());
}

#[test]
fn query_filters_by_tag() {
    let store = MemoryStore::new();
    store
        .set(
            "fleet-a",
            "a".to_string(),
            serde_json::json!(1),
            MemoryValueKind::Json,
            vec!["red".to_string()],
            "agent-1".to_string(),
            None,
            serde_json::json!({}),
            1024,
        )
        .unwrap();
    store
        .set(
            "fleet-a",
            "b".to_string(),
            serde_json::json!(2),
            MemoryValueKind::Json,
            vec!["blue".to_string()],
            "agent-1".to_string(),
            None,
            serde_json::json!({}),
            1024,
        )
        .unwrap();

    let q = MemoryQuery {
        tags: vec!["red".to_string()],
        ..Default::default()
    };
    let results = store.query("fleet-a", &q);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "a");
}

#[test]
fn glob_subscription_matches_nested_keys() {
    let store = MemoryStore::new();
    store.subscribe("fleet-a", "agent-1", "tasks/**").unwrap();
    let subscribers = store.matching_subscribers("fleet-a", "tasks/42/status");
    assert_eq!(subscribers, vec!["agent-1".to_string()]);
}

#[test]
fn glob_subscription_does_not_match_unrelated_keys() {
    let store = MemoryStore::new();
    store.subscribe("fleet-a", "agent-1", "tasks/*").unwrap();
    let subscribers = store.matching_subscribers("fleet-a", "inbox/1");
    assert!(subscribers.is_empty());
}

#[test]
fn sweep_expired_removes_entries_past_ttl() {
    let store = MemoryStore::new();
    store
        .set(
            "fleet-a",
            "k".to_string(),
            serde_json::json!(1),
            MemoryValueKind::Json,
            vec![],
            "agent-1".to_string(),
            Some(0),
            serde_json::json!({}),
            1024,
        )
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let removed = store.sweep_expired();
    assert_eq!(removed, 1);
    assert!(store.get("fleet-a", "k").is_none());
}
