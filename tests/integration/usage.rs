use crate::common::{bootstrap_admin_key, create_test_tenant, test_client};
use rocket::http::{Header, Status};

#[test]
fn tenant_usage_reports_plan_and_retention() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");

    let res = tc
        .get("/api/v1/tenants/acme/usage")
        .header(Header::new("X-Admin-Key", admin_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["tenant"], "acme");
    assert_eq!(body["plan"], "free");
    assert_eq!(body["retention_hours"], 24);
    assert_eq!(body["concurrent_agents"], 0);
}

#[test]
fn tenant_agents_is_empty_for_fresh_tenant() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");

    let res = tc
        .get("/api/v1/tenants/acme/agents")
        .header(Header::new("X-Admin-Key", admin_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let agents: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(agents.is_empty());
}
