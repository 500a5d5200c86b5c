use super::gateway_common::*;

/// Scenario S6: once a tenant's concurrent-agent quota (10 on the free
/// plan) is saturated, the next connection is rejected before it reaches
/// the final `auth ok` reply.
#[tokio::test]
async fn concurrent_agent_quota_is_enforced() {
    let gw = spawn_gateway(|_| {}).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let mut conns = Vec::new();
    for i in 0..10 {
        let (mut tx, mut rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect");
        let reply = ws_authenticate(&mut tx, &mut rx, &key, &format!("agent-{i}")).await;
        assert_eq!(reply["type"], "auth", "agent-{i} should have connected");
        conns.push((tx, rx));
    }

    let (mut tx, mut rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect 11th");
    let reply = ws_authenticate(&mut tx, &mut rx, &key, "agent-overflow").await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "quota_exceeded");
}
