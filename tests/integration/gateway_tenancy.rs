use super::gateway_common::*;

/// Scenario S5: a key scoped to one tenant's fleet can't be used to connect
/// to a different tenant's fleet, even under the matching tenant URL slug.
#[tokio::test]
async fn cross_tenant_key_reuse_is_forbidden() {
    let gw = spawn_gateway(|_| {}).await;
    let (_acme_fleet, acme_key) = setup_fleet(&gw, "acme", "ops", "free", true);
    let (globex_fleet, _globex_key) = setup_fleet(&gw, "globex", "ops", "free", true);

    let (mut tx, mut rx) = ws_connect(&gw.addr, "globex", &globex_fleet).await.expect("connect");
    let reply = ws_authenticate(&mut tx, &mut rx, &acme_key, "intruder-1").await;

    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "forbidden");
}

/// A key scoped to a fleet within the caller's own tenant still works.
#[tokio::test]
async fn same_tenant_scoped_key_connects() {
    let gw = spawn_gateway(|_| {}).await;
    let (fleet, key) = setup_fleet(&gw, "acme", "ops", "free", true);

    let (mut tx, mut rx) = ws_connect(&gw.addr, "acme", &fleet).await.expect("connect");
    let reply = ws_authenticate(&mut tx, &mut rx, &key, "agent-1").await;

    assert_eq!(reply["type"], "auth");
}
