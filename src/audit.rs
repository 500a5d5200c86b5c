//! AuditSink port (spec §6.3): records security-relevant events (auth
//! failures, key rotation/revocation, admin actions) independent of the
//! per-fleet event log. Default implementation is SQLite-backed, grounded
//! on the teacher's `db.rs` CRUD idiom, via the same `Db` connection used
//! for metadata.

use crate::db::Db;
use crate::models::AuditRecord;
use std::sync::Arc;

pub trait AuditSink: Send + Sync {
    fn record(&self, tenant: &str, actor: &str, action: &str, detail: serde_json::Value);
}

pub struct SqliteAuditSink {
    db: Arc<Db>,
}

impl SqliteAuditSink {
    pub fn new(db: Arc<Db>) -> Self {
        SqliteAuditSink { db }
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, tenant: &str, actor: &str, action: &str, detail: serde_json::Value) {
        let record = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant: tenant.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            detail,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.db.record_audit(&record) {
            log::warn!("audit record failed to persist: {:?}", e);
        }
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
