//! `GET /health`, `/health/ready`, `/health/live` (spec §6.2), matching the
//! teacher's plain status-JSON shape in `routes/system.rs`.

use crate::db::Db;
use rocket::serde::json::Json;
use rocket::{get, State};

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ringforge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Ready once the database connection accepts a trivial query.
#[get("/api/v1/health/ready")]
pub fn health_ready(db: &State<std::sync::Arc<Db>>) -> Json<serde_json::Value> {
    let ok = db
        .conn
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
        .is_ok();
    Json(serde_json::json!({ "status": if ok { "ready" } else { "not_ready" } }))
}

#[get("/api/v1/health/live")]
pub fn health_live() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "live" }))
}
