use super::gateway_common::*;

/// Scenario S4: a task submitted with no agent online parks as pending
/// instead of failing outright, then gets assigned once an agent connects
/// and announces a presence update (the wire trigger for re-evaluation).
#[tokio::test]
async fn parked_task_is_assigned_on_presence_update() {
    let gw = spawn_gateway(|_| {}).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let (mut requester_tx, mut requester_rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect requester");
    ws_authenticate(&mut requester_tx, &mut requester_rx, &key, "requester-1").await;

    ws_send(
        &mut requester_tx,
        &serde_json::json!({"type": "task", "action": "submit", "payload": {"task_type": "sweep", "payload": {}}}),
    )
    .await;
    let submit_reply = ws_recv_until(&mut requester_rx, "task", "submit").await;
    let task_id = submit_reply["payload"]["id"].as_str().unwrap().to_string();
    assert_eq!(submit_reply["payload"]["status"], "pending");
    assert!(submit_reply["payload"]["assigned_agent"].is_null());

    let (mut worker_tx, mut worker_rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect worker");
    ws_authenticate(&mut worker_tx, &mut worker_rx, &key, "worker-1").await;

    ws_send(&mut worker_tx, &serde_json::json!({"type": "presence", "action": "update", "payload": {"state": "online"}})).await;
    let _ = ws_recv_until(&mut worker_rx, "presence", "update").await;

    let assigned = ws_recv_until(&mut worker_rx, "task", "assigned").await;
    assert_eq!(assigned["payload"]["id"], task_id);
    assert_eq!(assigned["payload"]["assigned_agent"], "worker-1");
}
