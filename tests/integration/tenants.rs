use crate::common::{bootstrap_admin_key, create_test_tenant, test_client, PLATFORM_ADMIN_KEY};
use rocket::http::{ContentType, Header, Status};

#[test]
fn create_tenant_requires_platform_admin_key() {
    let client = test_client();
    let res = client
        .post("/api/v1/tenants")
        .header(ContentType::JSON)
        .header(Header::new("Authorization", "Bearer wrong-key"))
        .body(r#"{"id": "acme"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn create_tenant_defaults_to_free_plan() {
    let client = test_client();
    let res = client
        .post("/api/v1/tenants")
        .header(ContentType::JSON)
        .header(Header::new("Authorization", format!("Bearer {PLATFORM_ADMIN_KEY}")))
        .body(r#"{"id": "acme"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["id"], "acme");
    assert_eq!(body["plan"], "free");
}

#[test]
fn get_tenant_requires_tenant_admin_key() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");

    let res = tc.get("/api/v1/tenants/acme").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = tc
        .get("/api/v1/tenants/acme")
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["id"], "acme");
}

#[test]
fn tenant_admin_key_cannot_read_another_tenant() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    create_test_tenant(&tc, "globex");
    let acme_admin = bootstrap_admin_key(&tc, "acme");

    let res = tc
        .get("/api/v1/tenants/globex")
        .header(Header::new("X-Admin-Key", acme_admin))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn update_tenant_changes_plan() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");

    let res = tc
        .patch("/api/v1/tenants/acme")
        .header(ContentType::JSON)
        .header(Header::new("X-Admin-Key", admin_key))
        .body(r#"{"plan": "pro"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["plan"], "pro");
}
