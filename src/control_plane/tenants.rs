//! `POST/GET/PATCH /api/v1/tenants[/:id]` (spec §6.2).

use super::AdminKey;
use crate::config::RingConfig;
use crate::db::Db;
use crate::error::RingError;
use crate::models::{CreateTenant, Tenant, UpdateTenant};
use crate::rate_limit::RateLimiter;
use rocket::serde::json::Json;
use rocket::{get, patch, post, State};
use std::sync::Arc;

/// Bootstraps a tenant. Gated on the process-wide platform admin key
/// (spec §6.2 Open Question), since no tenant admin key can exist yet, and
/// rate-limited as a single `api:platform` scope since there's only ever one
/// such key per process.
#[post("/api/v1/tenants", data = "<req>")]
pub fn create_tenant(
    req: Json<CreateTenant>,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Tenant>, RingError> {
    if admin.0 != config.platform_admin_key {
        return Err(RingError::Forbidden);
    }
    if !rate_limiter.check("api:platform", config.api_requests_per_min, 60) {
        return Err(RingError::RateLimited { retry_after_ms: 1000 });
    }
    let tenant = db.create_tenant(&req).map_err(RingError::from)?;
    Ok(Json(tenant))
}

#[get("/api/v1/tenants/<id>")]
pub fn get_tenant(
    id: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Tenant>, RingError> {
    super::require_tenant_admin(db, &id, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.get_tenant(&id).map_err(RingError::from)?))
}

#[patch("/api/v1/tenants/<id>", data = "<patch>")]
pub fn update_tenant(
    id: String,
    patch: Json<UpdateTenant>,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Tenant>, RingError> {
    super::require_tenant_admin(db, &id, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.update_tenant(&id, &patch).map_err(RingError::from)?))
}
