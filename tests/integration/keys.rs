use crate::common::{bootstrap_admin_key, create_test_tenant, mint_key, test_client};
use rocket::http::{Header, Status};

#[test]
fn mint_live_key() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");

    let minted = mint_key(&tc, "acme", &admin_key, "live");
    assert_eq!(minted["key_type"], "live");
    assert!(minted["secret"].as_str().unwrap().starts_with("rf_live_"));
}

#[test]
fn rotate_key_revokes_old_and_mints_new() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");
    let minted = mint_key(&tc, "acme", &admin_key, "live");
    let key_id = minted["id"].as_str().unwrap().to_string();

    let res = tc
        .post(format!("/api/v1/keys/{key_id}/rotate"))
        .header(Header::new("X-Admin-Key", admin_key.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let rotated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(rotated["key_type"], "live");
    assert_ne!(rotated["id"], minted["id"]);
}

#[test]
fn revoke_key_marks_it_unusable() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");
    let minted = mint_key(&tc, "acme", &admin_key, "live");
    let key_id = minted["id"].as_str().unwrap().to_string();

    let res = tc
        .delete(format!("/api/v1/keys/{key_id}"))
        .header(Header::new("X-Admin-Key", admin_key))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_json::<serde_json::Value>().unwrap()["revoked"], true);
}

#[test]
fn key_routes_require_admin_key_type() {
    let tc = test_client();
    create_test_tenant(&tc, "acme");
    let admin_key = bootstrap_admin_key(&tc, "acme");
    let minted = mint_key(&tc, "acme", &admin_key, "live");

    // A live key is not an admin key, so it cannot mint other keys.
    let res = tc
        .post("/api/v1/tenants/acme/keys")
        .header(rocket::http::ContentType::JSON)
        .header(Header::new("X-Admin-Key", minted["secret"].as_str().unwrap()))
        .body(r#"{"key_type": "live"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}
