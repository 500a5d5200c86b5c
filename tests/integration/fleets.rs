use crate::common::{bootstrap_admin_key, create_test_tenant, test_client};
use rocket::http::{ContentType, Header, Status};

fn setup(tc: &crate::common::TestClient, tenant: &str) -> String {
    create_test_tenant(tc, tenant);
    bootstrap_admin_key(tc, tenant)
}

#[test]
fn create_list_get_delete_fleet_roundtrip() {
    let tc = test_client();
    let admin_key = setup(&tc, "acme");

    let res = tc
        .post("/api/v1/tenants/acme/fleets")
        .header(ContentType::JSON)
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .body(r#"{"name": "ops"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let fleet: serde_json::Value = res.into_json().unwrap();
    let fleet_id = fleet["id"].as_str().unwrap().to_string();
    assert_eq!(fleet["name"], "ops");

    let res = tc
        .get("/api/v1/tenants/acme/fleets")
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let fleets: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(fleets.len(), 1);

    let res = tc
        .get(format!("/api/v1/tenants/acme/fleets/{fleet_id}"))
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = tc
        .delete(format!("/api/v1/tenants/acme/fleets/{fleet_id}"))
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = tc
        .get(format!("/api/v1/tenants/acme/fleets/{fleet_id}"))
        .header(Header::new("X-Admin-Key", admin_key))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn fleet_routes_reject_unscoped_admin_key() {
    let tc = test_client();
    setup(&tc, "acme");
    let other_admin = setup(&tc, "globex");

    let res = tc
        .post("/api/v1/tenants/acme/fleets")
        .header(ContentType::JSON)
        .header(Header::new("X-Admin-Key", other_admin))
        .body(r#"{"name": "ops"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}
