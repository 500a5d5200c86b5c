//! The control plane (spec §6.2): tenant/fleet/key administration and
//! usage/system introspection, mounted over plain JSON HTTP next to the
//! gateway's WebSocket route. Shares the teacher's `AdminKey`/`ClientIp`
//! request-guard shape from `routes/mod.rs`.

pub mod fleets;
pub mod keys;
pub mod system;
pub mod tenants;
pub mod usage;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

/// Bearer or `X-Admin-Key` credential gating tenant/fleet/key management.
/// Does not itself check the key against anything — routes compare it to
/// the tenant's stored admin key (or, for platform-wide routes, an
/// operator-configured value) the way they need to.
pub struct AdminKey(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(auth) = req.headers().get_one("Authorization") {
            if let Some(key) = auth.strip_prefix("Bearer ") {
                return Outcome::Success(AdminKey(key.to_string()));
            }
        }
        if let Some(key) = req.headers().get_one("X-Admin-Key") {
            return Outcome::Success(AdminKey(key.to_string()));
        }
        Outcome::Forward(Status::Unauthorized)
    }
}

pub use fleets::{create_fleet, delete_fleet, get_fleet, list_fleets};
pub use keys::{mint_key, revoke_key, rotate_key};
pub use system::{health, health_live, health_ready};
pub use tenants::{create_tenant, get_tenant, update_tenant};
pub use usage::{tenant_agents, tenant_usage};

use crate::db::Db;
use crate::error::RingError;
use crate::models::KeyType;
use crate::rate_limit::RateLimiter;

/// Verifies `presented` is a live, non-revoked `admin`-typed key scoped to
/// `tenant` (spec §6.2: every control-plane route but `POST /tenants` is
/// gated on this), and rate-limits the call under the key's own `api:<id>`
/// scope (spec §4.7).
pub(crate) fn require_tenant_admin(db: &Db, tenant: &str, presented: &str, rate_limiter: &RateLimiter, limit: usize) -> Result<(), RingError> {
    let key = crate::gateway::auth::authenticate_key(db, presented)?;
    if !rate_limiter.check(&format!("api:{}", key.id), limit, 60) {
        return Err(RingError::RateLimited { retry_after_ms: 1000 });
    }
    if key.tenant != tenant || key.key_type != KeyType::Admin {
        return Err(RingError::Forbidden);
    }
    Ok(())
}
