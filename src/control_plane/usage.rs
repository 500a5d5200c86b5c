//! `GET /tenants/:id/usage`, `GET /tenants/:id/agents` (spec §6.2, §4.7).

use super::AdminKey;
use crate::config::RingConfig;
use crate::db::Db;
use crate::error::RingError;
use crate::models::{Agent, Plan};
use crate::rate_limit::{QuotaGauges, RateLimiter};
use rocket::serde::json::Json;
use rocket::{get, State};
use std::sync::Arc;

#[get("/api/v1/tenants/<tenant>/usage")]
pub fn tenant_usage(
    tenant: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    quotas: &State<Arc<QuotaGauges>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<serde_json::Value>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    let record = db.get_tenant(&tenant).map_err(RingError::from)?;
    let plan: Plan = record.plan;
    Ok(Json(serde_json::json!({
        "tenant": tenant,
        "plan": plan.as_str(),
        "concurrent_agents": quotas.concurrent_agents(&tenant),
        "concurrent_agents_limit": plan.concurrent_agent_quota(),
        "messages_today": quotas.messages_today(&tenant),
        "messages_today_limit": plan.daily_message_quota(),
        "memory_entries": quotas.memory_entries(&tenant),
        "memory_entries_limit": plan.memory_entry_quota(),
        "storage_bytes": quotas.storage_bytes(&tenant),
        "retention_hours": plan.retention_hours(),
    })))
}

#[get("/api/v1/tenants/<tenant>/agents")]
pub fn tenant_agents(
    tenant: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Vec<Agent>>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.list_agents(&tenant).map_err(RingError::from)?))
}
