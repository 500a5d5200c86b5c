//! `POST /tenants/:id/keys`, `POST /keys/:id/rotate`, `DELETE /keys/:id`
//! (spec §6.2). Rotate/revoke act on a bare key id with no tenant in the
//! path, so the caller's own admin key establishes which tenant's key
//! table the target id must belong to.

use super::AdminKey;
use crate::config::RingConfig;
use crate::db::Db;
use crate::error::RingError;
use crate::gateway::auth;
use crate::models::{KeyType, MintKeyRequest, MintedKey};
use crate::rate_limit::RateLimiter;
use rocket::serde::json::Json;
use rocket::{delete, post, State};
use std::sync::Arc;

#[post("/api/v1/tenants/<tenant>/keys", data = "<req>")]
pub fn mint_key(
    tenant: String,
    req: Json<MintKeyRequest>,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<MintedKey>, RingError> {
    super::require_tenant_admin(db, &tenant, &admin.0, rate_limiter, config.api_requests_per_min)?;
    Ok(Json(auth::mint_key(db, &tenant, &req)?))
}

#[post("/api/v1/keys/<id>/rotate")]
pub fn rotate_key(
    id: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<MintedKey>, RingError> {
    let caller = auth::authenticate_key(db, &admin.0)?;
    if !rate_limiter.check(&format!("api:{}", caller.id), config.api_requests_per_min, 60) {
        return Err(RingError::RateLimited { retry_after_ms: 1000 });
    }
    if caller.key_type != KeyType::Admin {
        return Err(RingError::Forbidden);
    }
    let target = db.get_api_key(&caller.tenant, &id).map_err(RingError::from)?;
    db.revoke_api_key(&caller.tenant, &id).map_err(RingError::from)?;
    let minted = auth::mint_key(
        db,
        &caller.tenant,
        &MintKeyRequest {
            key_type: target.key_type.as_str().to_string(),
            fleet: target.fleet.clone(),
            expires_in_days: None,
        },
    )?;
    Ok(Json(minted))
}

#[delete("/api/v1/keys/<id>")]
pub fn revoke_key(
    id: String,
    admin: AdminKey,
    db: &State<Arc<Db>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<RingConfig>,
) -> Result<Json<serde_json::Value>, RingError> {
    let caller = auth::authenticate_key(db, &admin.0)?;
    if !rate_limiter.check(&format!("api:{}", caller.id), config.api_requests_per_min, 60) {
        return Err(RingError::RateLimited { retry_after_ms: 1000 });
    }
    if caller.key_type != KeyType::Admin {
        return Err(RingError::Forbidden);
    }
    db.revoke_api_key(&caller.tenant, &id).map_err(RingError::from)?;
    Ok(Json(serde_json::json!({"revoked": true})))
}
