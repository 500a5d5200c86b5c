use super::gateway_common::*;

/// Scenario S1: an agent replays its own prior activity posts and gets them
/// back as streamed `replay.item` frames terminated by `replay.end`.
#[tokio::test]
async fn replay_streams_posted_activity_then_ends() {
    let gw = spawn_gateway(|_| {}).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let (mut tx, mut rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect");
    let auth_reply = ws_authenticate(&mut tx, &mut rx, &key, "scout-1").await;
    assert_eq!(auth_reply["type"], "auth");

    for i in 0..3 {
        ws_send(
            &mut tx,
            &serde_json::json!({
                "type": "activity",
                "action": "post",
                "payload": {
                    "kind": "discovery",
                    "description": format!("found thing {i}"),
                    "tags": ["scan"]
                }
            }),
        )
        .await;
        let reply = ws_recv_until(&mut rx, "activity", "post").await;
        assert!(reply["payload"]["id"].is_string());
    }

    ws_send(
        &mut tx,
        &serde_json::json!({"type": "replay", "payload": {"from": 0, "kinds": ["activity"], "limit": 50}}),
    )
    .await;

    let mut items = Vec::new();
    loop {
        let frame = ws_recv(&mut rx).await;
        match (frame["type"].as_str(), frame["action"].as_str()) {
            (Some("replay"), Some("item")) => items.push(frame),
            (Some("replay"), Some("end")) => {
                assert_eq!(frame["payload"]["delivered_count"].as_u64(), Some(3));
                break;
            }
            (Some("replay"), Some("ok")) => {} // the ack reply to the replay request itself
            _ => {}
        }
    }
    assert_eq!(items.len(), 3);
    for item in &items {
        assert_eq!(item["payload"]["kind"], "activity");
    }
}
