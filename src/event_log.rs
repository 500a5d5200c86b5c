//! EventLog port (spec §6.3, X1): durable, per-fleet append-only log with a
//! monotonic position, backing the `replay.request` / `replay.item` /
//! `replay.end` protocol (spec §4.6). Grounded on the teacher's
//! `retention.rs` sweep-by-age idiom for the retention half of this module.

use rusqlite::{params, Connection};
use std::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogItem {
    pub position: i64,
    pub fleet: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Durable log of fleet events, substitutable behind this trait so a
/// non-SQLite backend (e.g. a managed log service) can stand in without
/// touching callers.
pub trait EventLog: Send + Sync {
    fn append(&self, tenant: &str, fleet: &str, kind: &str, payload: &serde_json::Value) -> i64;
    fn read_since(&self, fleet: &str, since_position: i64, limit: usize) -> Vec<LogItem>;
    fn latest_position(&self, fleet: &str) -> i64;
    /// Deletes entries older than `retention_hours` for the given tenant's
    /// fleets. Returns the number pruned.
    fn prune_tenant(&self, tenant: &str, retention_hours: i64) -> usize;
}

pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).expect("failed to open event log database");
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS event_log (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                fleet TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_event_log_fleet ON event_log(fleet, position);
             CREATE INDEX IF NOT EXISTS idx_event_log_tenant ON event_log(tenant, created_at);
            ",
        )
        .expect("failed to run event log migrations");
        SqliteEventLog {
            conn: Mutex::new(conn),
        }
    }
}

impl EventLog for SqliteEventLog {
    fn append(&self, tenant: &str, fleet: &str, kind: &str, payload: &serde_json::Value) -> i64 {
        let conn = self.conn.lock().unwrap();
        let created_at = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO event_log (tenant, fleet, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant, fleet, kind, payload.to_string(), created_at],
        )
        .expect("event log append failed");
        conn.last_insert_rowid()
    }

    fn read_since(&self, fleet: &str, since_position: i64, limit: usize) -> Vec<LogItem> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT position, fleet, kind, payload, created_at FROM event_log
             WHERE fleet = ?1 AND position > ?2 ORDER BY position ASC LIMIT ?3",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![fleet, since_position, limit as i64], |row| {
            let payload_str: String = row.get(3)?;
            Ok(LogItem {
                position: row.get(0)?,
                fleet: row.get(1)?,
                kind: row.get(2)?,
                payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::json!({})),
                created_at: row.get(4)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    fn latest_position(&self, fleet: &str) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COALESCE(MAX(position), 0) FROM event_log WHERE fleet = ?1",
            params![fleet],
            |r| r.get(0),
        )
        .unwrap_or(0)
    }

    fn prune_tenant(&self, tenant: &str, retention_hours: i64) -> usize {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(retention_hours)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM event_log WHERE tenant = ?1 AND created_at < ?2",
            params![tenant, cutoff],
        )
        .unwrap_or(0)
    }
}

/// Background sweeper: periodically prunes every tenant's event log entries
/// beyond their plan's retention window. Mirrors the teacher's
/// `spawn_retention_task` shape (initial settle delay, then a fixed-interval
/// loop) but drives off per-tenant plan retention instead of per-room
/// message-count/age settings.
pub fn spawn_retention_sweep(
    log: std::sync::Arc<dyn EventLog>,
    db: std::sync::Arc<crate::db::Db>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        loop {
            let tenants: Vec<crate::models::Tenant> = {
                let conn = db.conn.lock().unwrap_or_else(|e| e.into_inner());
                let mut stmt = match conn.prepare("SELECT id, plan, email, created_at FROM tenants") {
                    Ok(s) => s,
                    Err(_) => {
                        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
                        continue;
                    }
                };
                stmt.query_map([], |row| {
                    Ok(crate::models::Tenant {
                        id: row.get(0)?,
                        plan: crate::models::Plan::parse(&row.get::<_, String>(1)?)
                            .unwrap_or(crate::models::Plan::Free),
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default()
            };

            for tenant in tenants {
                let pruned = log.prune_tenant(&tenant.id, tenant.plan.retention_hours());
                if pruned > 0 {
                    log::info!(
                        "event log retention: pruned {} entries for tenant {}",
                        pruned,
                        tenant.id
                    );
                }
            }

            let audit_pruned = db.prune_audit(crate::models::AUDIT_RETENTION_DAYS).unwrap_or(0);
            if audit_pruned > 0 {
                log::info!("audit retention: pruned {} records", audit_pruned);
            }

            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        }
    });
}
