use super::gateway_common::*;

/// Scenario S2: a subscriber with a matching glob pattern gets pushed a
/// `memory set` event when another agent writes a key matching it.
#[tokio::test]
async fn memory_subscriber_is_notified_on_matching_set() {
    let gw = spawn_gateway(|_| {}).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let (mut writer_tx, mut writer_rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect writer");
    ws_authenticate(&mut writer_tx, &mut writer_rx, &key, "writer-1").await;

    let (mut sub_tx, mut sub_rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect subscriber");
    ws_authenticate(&mut sub_tx, &mut sub_rx, &key, "watcher-1").await;

    ws_send(&mut sub_tx, &serde_json::json!({"type": "memory", "action": "subscribe", "payload": {"pattern": "config/*"}})).await;
    let sub_reply = ws_recv_until(&mut sub_rx, "memory", "subscribe").await;
    assert!(sub_reply["payload"]["subscription_id"].is_string());

    ws_send(
        &mut writer_tx,
        &serde_json::json!({
            "type": "memory",
            "action": "set",
            "payload": {"key": "config/threshold", "value": {"level": 3}, "kind": "json"}
        }),
    )
    .await;
    let set_reply = ws_recv_until(&mut writer_rx, "memory", "set").await;
    assert_eq!(set_reply["payload"]["key"], "config/threshold");

    let pushed = ws_recv_until(&mut sub_rx, "memory", "set").await;
    assert_eq!(pushed["payload"]["key"], "config/threshold");
    assert_eq!(pushed["payload"]["value"]["level"], 3);
}
