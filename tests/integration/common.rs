use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use ringforge::db::Db;
use ringforge::gateway::auth;
use ringforge::models::MintKeyRequest;

pub const PLATFORM_ADMIN_KEY: &str = "test-platform-admin-key";

/// Wrapper around Client that auto-deletes the temp DB on drop.
pub struct TestClient {
    client: Option<Client>,
    pub db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        if let Some((stem, ext)) = self.db_path.rsplit_once('.') {
            let events_path = format!("{stem}-events.{ext}");
            let _ = std::fs::remove_file(&events_path);
            let _ = std::fs::remove_file(format!("{events_path}-wal"));
            let _ = std::fs::remove_file(format!("{events_path}-shm"));
        }
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    let db_path = format!(
        "/tmp/ringforge_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let mut config = ringforge::config::RingConfig::default();
    config.database_path = db_path.clone();
    config.platform_admin_key = PLATFORM_ADMIN_KEY.to_string();
    let rocket = ringforge::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Creates a tenant via the platform admin key bootstrap route.
pub fn create_test_tenant(client: &Client, id: &str) -> String {
    let res = client
        .post("/api/v1/tenants")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("Authorization", format!("Bearer {PLATFORM_ADMIN_KEY}")))
        .body(format!(r#"{{"id": "{id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "create_test_tenant failed: {:?}", res.into_string());
    id.to_string()
}

/// Mints a tenant's first admin key by opening the same SQLite file the
/// running test client manages and writing the key row directly — there is
/// no HTTP route that can mint a tenant's very first admin key, since every
/// control-plane route but `POST /tenants` requires one already.
pub fn bootstrap_admin_key(tc: &TestClient, tenant: &str) -> String {
    let db = Db::new(&tc.db_path);
    let minted = auth::mint_key(
        &db,
        tenant,
        &MintKeyRequest {
            key_type: "admin".to_string(),
            fleet: None,
            expires_in_days: None,
        },
    )
    .expect("mint admin key");
    minted.secret
}

pub fn mint_key(client: &Client, tenant: &str, admin_key: &str, key_type: &str) -> serde_json::Value {
    let res = client
        .post(format!("/api/v1/tenants/{tenant}/keys"))
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("X-Admin-Key", admin_key.to_string()))
        .body(format!(r#"{{"key_type": "{key_type}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "mint_key failed: {:?}", res.into_string());
    res.into_json().unwrap()
}
