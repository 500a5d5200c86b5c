use super::*;
use crate::db::Db;

fn test_db() -> Arc<Db> {
    let path = std::env::temp_dir().join(format!("ringforge-audit-test-{}.db", uuid::Uuid::new_v4()));
    Arc::new(Db::new(path.to_str().unwrap()))
}

#[test]
fn record_persists_a_row_queryable_by_tenant() {
    let db = test_db();
    db.create_tenant(&crate::models::CreateTenant {
        id: "acme".into(),
        plan: "free".into(),
        email: None,
    })
    .unwrap();
    let sink = SqliteAuditSink::new(db.clone());
    sink.record("acme", "key:abc123", "key.revoked", serde_json::json!({"key_id": "abc123"}));

    let conn = db.conn.lock().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM audit_records WHERE tenant = ?1 AND action = ?2",
            rusqlite::params!["acme", "key.revoked"],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn record_on_an_unknown_tenant_does_not_panic() {
    let db = test_db();
    let sink = SqliteAuditSink::new(db);
    sink.record("ghost-tenant", "system", "probe", serde_json::json!({}));
}
