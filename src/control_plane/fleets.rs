//! `POST/GET/DELETE /api/v1/tenants/:id/fleets[/:fleet_id]` (spec §6.2).

use super::AdminKey;
use crate::config::RingConfig;
use crate::db::Db;
use crate::error::RingError;
use crate::models::{CreateFleet, Fleet};
use crate::rate_limit::RateLimiter;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use std::sync::Arc;

#[post("/api/v1/tenants/<tenant>/fleets", data = "<req>")]
pub fn create_fleet(
    tenant: String,
    req: Json<CreateFleet>,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Fleet>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.create_fleet(&tenant, &req.name).map_err(RingError::from)?))
}

#[get("/api/v1/tenants/<tenant>/fleets")]
pub fn list_fleets(
    tenant: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Vec<Fleet>>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.list_fleets(&tenant).map_err(RingError::from)?))
}

#[get("/api/v1/tenants/<tenant>/fleets/<fleet_id>")]
pub fn get_fleet(
    tenant: String,
    fleet_id: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<Fleet>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(db.get_fleet(&tenant, &fleet_id).map_err(RingError::from)?))
}

#[delete("/api/v1/tenants/<tenant>/fleets/<fleet_id>")]
pub fn delete_fleet(
    tenant: String,
    fleet_id: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<serde_json::Value>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    db.delete_fleet(&tenant, &fleet_id).map_err(RingError::from)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}
