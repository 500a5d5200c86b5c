use super::gateway_common::*;

/// Scenario S3: overflowing the per-recipient DM queue evicts the oldest
/// message and notifies its original sender with a `direct dropped` push.
#[tokio::test]
async fn dm_overflow_notifies_sender_of_dropped_message() {
    let gw = spawn_gateway(|cfg| cfg.dm_queue_max = 1).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let (mut tx, mut rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect");
    ws_authenticate(&mut tx, &mut rx, &key, "sender-1").await;

    ws_send(&mut tx, &serde_json::json!({"type": "direct", "action": "send", "payload": {"to": "offline-agent", "payload": {"n": 1}}})).await;
    let first_reply = ws_recv_until(&mut rx, "direct", "send").await;
    let first_id = first_reply["payload"]["id"].as_str().unwrap().to_string();
    assert_eq!(first_reply["payload"]["state"], "queued");

    ws_send(&mut tx, &serde_json::json!({"type": "direct", "action": "send", "payload": {"to": "offline-agent", "payload": {"n": 2}}})).await;

    let dropped = ws_recv_until(&mut rx, "direct", "dropped").await;
    assert_eq!(dropped["payload"]["id"], first_id);
    assert_eq!(dropped["payload"]["state"], "dropped");

    let second_reply = ws_recv_until(&mut rx, "direct", "send").await;
    assert_eq!(second_reply["payload"]["state"], "queued");
}
