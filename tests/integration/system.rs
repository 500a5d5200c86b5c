use crate::common::test_client;
use rocket::http::Status;

#[test]
fn health_reports_ok() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[test]
fn health_live_and_ready() {
    let client = test_client();
    let res = client.get("/api/v1/health/live").dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_json::<serde_json::Value>().unwrap()["status"], "live");

    let res = client.get("/api/v1/health/ready").dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_json::<serde_json::Value>().unwrap()["status"], "ready");
}
