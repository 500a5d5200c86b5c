//! MetadataStore port (spec §6.3): durable CRUD for tenants, fleets,
//! agents, keys, sessions, and groups. Grounded on the teacher's
//! `rusqlite` + `execute_batch` migration idiom.

use crate::models::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).expect("failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                plan TEXT NOT NULL DEFAULT 'free',
                email TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fleets (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(tenant, name)
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                fleet TEXT REFERENCES fleets(id) ON DELETE CASCADE,
                key_type TEXT NOT NULL,
                prefix TEXT NOT NULL,
                hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(hash);
            CREATE INDEX IF NOT EXISTS idx_api_keys_tenant ON api_keys(tenant);

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                fleet TEXT NOT NULL REFERENCES fleets(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                public_key TEXT,
                framework TEXT,
                capabilities TEXT NOT NULL DEFAULT '[]',
                profile TEXT NOT NULL DEFAULT '{}',
                total_connections INTEGER NOT NULL DEFAULT 0,
                total_messages INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(fleet, name)
            );
            CREATE INDEX IF NOT EXISTS idx_agents_fleet ON agents(fleet);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                agent TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                fleet TEXT NOT NULL,
                connected_at TEXT NOT NULL,
                disconnected_at TEXT,
                reason TEXT,
                client_addr TEXT NOT NULL,
                protocol_version INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent, connected_at);

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                fleet TEXT NOT NULL REFERENCES fleets(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                agent TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (group_id, agent)
            );

            CREATE TABLE IF NOT EXISTS audit_records (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_tenant ON audit_records(tenant, created_at);
            ",
        )
        .expect("failed to run migrations");
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// --- Tenants ---

impl Db {
    pub fn create_tenant(&self, req: &CreateTenant) -> RingDbResult<Tenant> {
        let plan = Plan::parse(&req.plan).unwrap_or(Plan::Free);
        let conn = self.conn.lock().unwrap();
        let exists: Option<String> = conn
            .query_row("SELECT id FROM tenants WHERE id = ?1", params![&req.id], |r| r.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(DbError::Conflict("tenant already exists".into()));
        }
        let created_at = now();
        conn.execute(
            "INSERT INTO tenants (id, plan, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![&req.id, plan.as_str(), &req.email, &created_at],
        )?;
        Ok(Tenant {
            id: req.id.clone(),
            plan,
            email: req.email.clone(),
            created_at,
        })
    }

    pub fn get_tenant(&self, id: &str) -> RingDbResult<Tenant> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, plan, email, created_at FROM tenants WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    plan: Plan::parse(&row.get::<_, String>(1)?).unwrap_or(Plan::Free),
                    email: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("tenant not found".into()))
    }

    pub fn update_tenant(&self, id: &str, patch: &UpdateTenant) -> RingDbResult<Tenant> {
        let mut tenant = self.get_tenant(id)?;
        if let Some(plan) = &patch.plan {
            tenant.plan = Plan::parse(plan).ok_or_else(|| DbError::Invalid("unknown plan".into()))?;
        }
        if let Some(email) = &patch.email {
            tenant.email = Some(email.clone());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tenants SET plan = ?1, email = ?2 WHERE id = ?3",
            params![tenant.plan.as_str(), &tenant.email, id],
        )?;
        Ok(tenant)
    }

    pub fn tenant_exists(&self, id: &str) -> bool {
        self.get_tenant(id).is_ok()
    }
}

// --- Fleets ---

impl Db {
    pub fn create_fleet(&self, tenant: &str, name: &str) -> RingDbResult<Fleet> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM fleets WHERE tenant = ?1 AND name = ?2",
                params![tenant, name],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(DbError::Conflict("fleet already exists".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        conn.execute(
            "INSERT INTO fleets (id, tenant, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![&id, tenant, name, &created_at],
        )?;
        Ok(Fleet {
            id,
            tenant: tenant.to_string(),
            name: name.to_string(),
            created_at,
        })
    }

    pub fn get_fleet(&self, tenant: &str, fleet_id: &str) -> RingDbResult<Fleet> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, name, created_at FROM fleets WHERE id = ?1 AND tenant = ?2",
            params![fleet_id, tenant],
            |row| {
                Ok(Fleet {
                    id: row.get(0)?,
                    tenant: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("fleet not found".into()))
    }

    /// Looks up a fleet by id alone, with no tenant to scope against.
    /// Used by background sweepers that only hold a fleet id and need to
    /// recover its owning tenant for event-log/audit writes.
    pub fn get_fleet_by_id(&self, fleet_id: &str) -> RingDbResult<Fleet> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, name, created_at FROM fleets WHERE id = ?1",
            params![fleet_id],
            |row| {
                Ok(Fleet {
                    id: row.get(0)?,
                    tenant: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("fleet not found".into()))
    }

    pub fn list_fleets(&self, tenant: &str) -> RingDbResult<Vec<Fleet>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant, name, created_at FROM fleets WHERE tenant = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![tenant], |row| {
            Ok(Fleet {
                id: row.get(0)?,
                tenant: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_fleet(&self, tenant: &str, fleet_id: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM fleets WHERE id = ?1 AND tenant = ?2",
            params![fleet_id, tenant],
        )?;
        if n == 0 {
            return Err(DbError::NotFound("fleet not found".into()));
        }
        Ok(())
    }
}

// --- API Keys ---

impl Db {
    pub fn insert_api_key(&self, key: &ApiKey) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_keys (id, tenant, fleet, key_type, prefix, hash, created_at, expires_at, revoked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &key.id, &key.tenant, &key.fleet, key.key_type.as_str(), &key.prefix,
                &key.hash, &key.created_at, &key.expires_at, &key.revoked_at
            ],
        )?;
        Ok(())
    }

    pub fn find_api_key_by_hash(&self, hash: &str) -> RingDbResult<Option<ApiKey>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, fleet, key_type, prefix, hash, created_at, expires_at, revoked_at
             FROM api_keys WHERE hash = ?1",
            params![hash],
            row_to_api_key,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn get_api_key(&self, tenant: &str, id: &str) -> RingDbResult<ApiKey> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, fleet, key_type, prefix, hash, created_at, expires_at, revoked_at
             FROM api_keys WHERE id = ?1 AND tenant = ?2",
            params![id, tenant],
            row_to_api_key,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("key not found".into()))
    }

    pub fn revoke_api_key(&self, tenant: &str, id: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND tenant = ?3",
            params![now(), id, tenant],
        )?;
        if n == 0 {
            return Err(DbError::NotFound("key not found".into()));
        }
        Ok(())
    }
}

fn row_to_api_key(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: row.get(0)?,
        tenant: row.get(1)?,
        fleet: row.get(2)?,
        key_type: KeyType::parse(&row.get::<_, String>(3)?).unwrap_or(KeyType::Live),
        prefix: row.get(4)?,
        hash: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        revoked_at: row.get(8)?,
    })
}

// --- Agents ---

impl Db {
    pub fn upsert_agent_by_name(
        &self,
        tenant: &str,
        fleet: &str,
        name: &str,
        framework: Option<&str>,
    ) -> RingDbResult<Agent> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT id, tenant, fleet, name, public_key, framework, capabilities, profile,
                        total_connections, total_messages, last_seen, created_at
                 FROM agents WHERE fleet = ?1 AND name = ?2",
                params![fleet, name],
                row_to_agent,
            )
            .optional()?;

        if let Some(mut agent) = existing {
            agent.total_connections += 1;
            agent.last_seen = now();
            conn.execute(
                "UPDATE agents SET total_connections = ?1, last_seen = ?2 WHERE id = ?3",
                params![agent.total_connections, &agent.last_seen, &agent.id],
            )?;
            return Ok(agent);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        conn.execute(
            "INSERT INTO agents (id, tenant, fleet, name, framework, capabilities, profile,
                                  total_connections, total_messages, last_seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', '{}', 1, 0, ?6, ?6)",
            params![&id, tenant, fleet, name, framework, &ts],
        )?;
        Ok(Agent {
            id,
            tenant: tenant.to_string(),
            fleet: fleet.to_string(),
            name: name.to_string(),
            public_key: None,
            framework: framework.map(String::from),
            capabilities: vec![],
            profile: AgentProfile::default(),
            total_connections: 1,
            total_messages: 0,
            last_seen: ts.clone(),
            created_at: ts,
        })
    }

    /// Side-effect-free lookup by name, unlike `upsert_agent_by_name` which
    /// bumps connection stats. Used to recover a registered public key
    /// before a reconnect signature has even been verified.
    pub fn get_agent_by_name(&self, fleet: &str, name: &str) -> RingDbResult<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, fleet, name, public_key, framework, capabilities, profile,
                    total_connections, total_messages, last_seen, created_at
             FROM agents WHERE fleet = ?1 AND name = ?2",
            params![fleet, name],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("agent not found".into()))
    }

    pub fn get_agent(&self, fleet: &str, id: &str) -> RingDbResult<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant, fleet, name, public_key, framework, capabilities, profile,
                    total_connections, total_messages, last_seen, created_at
             FROM agents WHERE id = ?1 AND fleet = ?2",
            params![id, fleet],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("agent not found".into()))
    }

    pub fn list_agents(&self, tenant: &str) -> RingDbResult<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant, fleet, name, public_key, framework, capabilities, profile,
                    total_connections, total_messages, last_seen, created_at
             FROM agents WHERE tenant = ?1 ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map(params![tenant], row_to_agent)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_agent_public_key(&self, agent_id: &str, public_key: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET public_key = ?1 WHERE id = ?2",
            params![public_key, agent_id],
        )?;
        Ok(())
    }

    pub fn bump_agent_message_count(&self, agent_id: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET total_messages = total_messages + 1 WHERE id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    let capabilities_str: String = row.get(6)?;
    let profile_str: String = row.get(7)?;
    Ok(Agent {
        id: row.get(0)?,
        tenant: row.get(1)?,
        fleet: row.get(2)?,
        name: row.get(3)?,
        public_key: row.get(4)?,
        framework: row.get(5)?,
        capabilities: serde_json::from_str(&capabilities_str).unwrap_or_default(),
        profile: serde_json::from_str(&profile_str).unwrap_or_default(),
        total_connections: row.get(8)?,
        total_messages: row.get(9)?,
        last_seen: row.get(10)?,
        created_at: row.get(11)?,
    })
}

// --- Sessions ---

impl Db {
    pub fn insert_session(&self, session: &SessionRecord) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, agent, fleet, connected_at, client_addr, protocol_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &session.id, &session.agent, &session.fleet, &session.connected_at,
                &session.client_addr, session.protocol_version
            ],
        )?;
        self.prune_sessions(&conn, &session.agent)?;
        Ok(())
    }

    pub fn close_session(&self, id: &str, reason: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET disconnected_at = ?1, reason = ?2 WHERE id = ?3",
            params![now(), reason, id],
        )?;
        Ok(())
    }

    fn prune_sessions(&self, conn: &Connection, agent: &str) -> RingDbResult<()> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE agent = ?1",
            params![agent],
            |r| r.get(0),
        )?;
        let max = MAX_SESSIONS_PER_AGENT as i64;
        if count > max {
            conn.execute(
                "DELETE FROM sessions WHERE id IN (
                    SELECT id FROM sessions WHERE agent = ?1 ORDER BY connected_at ASC LIMIT ?2
                 )",
                params![agent, count - max],
            )?;
        }
        Ok(())
    }
}

// --- Groups ---

impl Db {
    pub fn create_group(&self, fleet: &str, name: &str, kind: GroupKind) -> RingDbResult<Group> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        conn.execute(
            "INSERT INTO groups (id, fleet, name, kind, status, created_at) VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
            params![&id, fleet, name, kind_str(&kind), &created_at],
        )?;
        Ok(Group {
            id,
            fleet: fleet.to_string(),
            name: name.to_string(),
            kind,
            status: GroupStatus::Active,
            created_at,
        })
    }

    pub fn dissolve_group(&self, group_id: &str) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE groups SET status = 'dissolved' WHERE id = ?1",
            params![group_id],
        )?;
        if n == 0 {
            return Err(DbError::NotFound("group not found".into()));
        }
        Ok(())
    }

    pub fn add_group_member(&self, group_id: &str, agent: &str, role: GroupRole) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO group_members (group_id, agent, role) VALUES (?1, ?2, ?3)",
            params![group_id, agent, role_str(&role)],
        )?;
        Ok(())
    }

    pub fn get_group(&self, fleet: &str, group_id: &str) -> RingDbResult<Group> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, fleet, name, kind, status, created_at FROM groups WHERE id = ?1 AND fleet = ?2",
            params![group_id, fleet],
            row_to_group,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound("group not found".into()))
    }

    pub fn list_groups(&self, fleet: &str) -> RingDbResult<Vec<Group>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, fleet, name, kind, status, created_at FROM groups WHERE fleet = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![fleet], row_to_group)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Finds the existing active group with this name, if any, for
    /// idempotent `group.create` (spec's mutating-ops idempotency list).
    pub fn find_active_group_by_name(&self, fleet: &str, name: &str) -> RingDbResult<Option<Group>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, fleet, name, kind, status, created_at FROM groups
             WHERE fleet = ?1 AND name = ?2 AND status = 'active'",
            params![fleet, name],
            row_to_group,
        )
        .optional()
        .map_err(DbError::from)
    }
}

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        fleet: row.get(1)?,
        name: row.get(2)?,
        kind: match row.get::<_, String>(3)?.as_str() {
            "pod" => GroupKind::Pod,
            "channel" => GroupKind::Channel,
            _ => GroupKind::Squad,
        },
        status: match row.get::<_, String>(4)?.as_str() {
            "dissolved" => GroupStatus::Dissolved,
            _ => GroupStatus::Active,
        },
        created_at: row.get(5)?,
    })
}

fn kind_str(k: &GroupKind) -> &'static str {
    match k {
        GroupKind::Squad => "squad",
        GroupKind::Pod => "pod",
        GroupKind::Channel => "channel",
    }
}

fn role_str(r: &GroupRole) -> &'static str {
    match r {
        GroupRole::Owner => "owner",
        GroupRole::Admin => "admin",
        GroupRole::Member => "member",
    }
}

// --- Audit ---

impl Db {
    pub fn record_audit(&self, record: &AuditRecord) -> RingDbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_records (id, tenant, actor, action, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &record.id, &record.tenant, &record.actor, &record.action,
                record.detail.to_string(), &record.created_at
            ],
        )?;
        Ok(())
    }

    /// Deletes audit records older than the retention window. Returns the number pruned.
    pub fn prune_audit(&self, retention_days: i64) -> RingDbResult<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM audit_records WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(n)
    }
}

// --- Error plumbing ---

#[derive(Debug, Clone)]
pub enum DbError {
    NotFound(String),
    Conflict(String),
    Invalid(String),
    Backend(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        DbError::Backend(e.to_string())
    }
}

impl From<DbError> for crate::error::RingError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(m) => crate::error::RingError::NotFound(m),
            DbError::Conflict(m) => crate::error::RingError::Conflict(m),
            DbError::Invalid(m) => crate::error::RingError::InvalidMessage(m),
            DbError::Backend(m) => crate::error::RingError::ServerError(m),
        }
    }
}

pub type RingDbResult<T> = Result<T, DbError>;
