pub mod activity;
pub mod audit;
pub mod blob;
pub mod config;
pub mod control_plane;
pub mod db;
pub mod dm;
pub mod error;
pub mod event_log;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod memory;
pub mod models;
pub mod presence;
pub mod rate_limit;
pub mod task_router;
pub mod tasks;

use audit::{AuditSink, SqliteAuditSink};
use blob::{BlobSigner, HmacBlobSigner};
use config::RingConfig;
use db::Db;
use dm::DmQueue;
use event_log::{EventLog, SqliteEventLog};
use events::{FleetBus, RingEvent};
use gateway::protocol::OutEnvelope;
use gateway::session::{SessionRegistry, SharedSessionRegistry};
use idempotency::IdempotencyCache;
use memory::MemoryStore;
use models::TaskStatus;
use presence::PresenceIndex;
use rate_limit::{QuotaGauges, RateLimiter};
use rocket_cors::CorsOptions;
use std::sync::{Arc, Mutex};
use task_router::TaskStatsIndex;
use tasks::TaskStore;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    build_rocket(RingConfig::from_env())
}

pub fn rocket_with_config(config: RingConfig) -> rocket::Rocket<rocket::Build> {
    build_rocket(config)
}

fn build_rocket(config: RingConfig) -> rocket::Rocket<rocket::Build> {
    let db = Arc::new(Db::new(&config.database_path));
    let bus = Arc::new(FleetBus::new());
    let presence = PresenceIndex::new();
    let memory = MemoryStore::new();
    let sessions: gateway::session::SharedSessionRegistry = Arc::new(SessionRegistry::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let quotas = Arc::new(QuotaGauges::new());
    let idempotency = Arc::new(IdempotencyCache::new(config.idempotency_ttl_secs));
    let event_log_path = event_log_path_for(&config.database_path);
    let event_log: Arc<dyn EventLog> = Arc::new(SqliteEventLog::new(&event_log_path));
    let task_stats = Arc::new(Mutex::new(TaskStatsIndex::new()));
    let tasks = TaskStore::new();
    let dm_queue = DmQueue::new(config.dm_queue_max, config.dm_queue_ttl_secs);
    let audit: Arc<dyn AuditSink> = Arc::new(SqliteAuditSink::new(db.clone()));
    let blob_signer: Arc<dyn BlobSigner> = Arc::new(HmacBlobSigner::new(config.blob_base_url.clone(), config.blob_signing_secret.clone()));

    let cors = CorsOptions::default().to_cors().expect("failed to build CORS fairing");

    let sweep_presence = presence.clone();
    let sweep_bus = bus.clone();
    let sweep_memory = memory.clone();
    let sweep_event_log = event_log.clone();
    let sweep_db = db.clone();
    let sweep_db_for_gc = db.clone();
    let sweep_rate_limiter = rate_limiter.clone();
    let sweep_idempotency = idempotency.clone();
    let sweep_dm_queue = dm_queue.clone();
    let sweep_quotas = quotas.clone();
    let sweep_sessions = sessions.clone();
    let sweep_event_log_for_gc = event_log.clone();
    let presence_sweep_interval_secs = config.presence_sweep_interval_secs;
    let presence_stale_secs = config.presence_stale_secs;

    let task_sweep_db = db.clone();
    let task_sweep_bus = bus.clone();
    let task_sweep_presence = presence.clone();
    let task_sweep_tasks = tasks.clone();
    let task_sweep_stats = task_stats.clone();
    let task_sweep_sessions = sessions.clone();
    let task_sweep_event_log = event_log.clone();
    let task_claim_grace_secs = config.task_claim_grace_secs as i64;

    rocket::build()
        .manage(config)
        .manage(db)
        .manage(bus)
        .manage(presence)
        .manage(memory)
        .manage(sessions)
        .manage(rate_limiter)
        .manage(quotas)
        .manage(idempotency)
        .manage(event_log)
        .manage(task_stats)
        .manage(tasks)
        .manage(dm_queue)
        .manage(audit)
        .manage(blob_signer)
        .attach(cors)
        .attach(rocket::fairing::AdHoc::on_liftoff("Background Sweepers", |_rocket| {
            Box::pin(async move {
                presence::spawn_presence_sweep(sweep_presence, sweep_bus, presence_sweep_interval_secs, presence_stale_secs);
                memory::spawn_memory_sweep(sweep_memory, presence_sweep_interval_secs);
                event_log::spawn_retention_sweep(sweep_event_log, sweep_db, 3600);
                spawn_gc_sweep(sweep_rate_limiter, sweep_idempotency, sweep_dm_queue, sweep_quotas, sweep_sessions, sweep_db_for_gc, sweep_event_log_for_gc);
                spawn_task_sweep(
                    task_sweep_db,
                    task_sweep_bus,
                    task_sweep_presence,
                    task_sweep_tasks,
                    task_sweep_stats,
                    task_sweep_sessions,
                    task_sweep_event_log,
                    task_claim_grace_secs,
                    presence_sweep_interval_secs,
                );
                log::info!("background sweepers started");
            })
        }))
        .mount("/", rocket::routes![gateway::ws::connect])
        .mount(
            "/",
            rocket::routes![
                control_plane::create_tenant,
                control_plane::get_tenant,
                control_plane::update_tenant,
                control_plane::create_fleet,
                control_plane::list_fleets,
                control_plane::get_fleet,
                control_plane::delete_fleet,
                control_plane::mint_key,
                control_plane::rotate_key,
                control_plane::revoke_key,
                control_plane::tenant_usage,
                control_plane::tenant_agents,
                control_plane::health,
                control_plane::health_ready,
                control_plane::health_live,
            ],
        )
}

fn event_log_path_for(database_path: &str) -> String {
    match database_path.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-events.{ext}"),
        None => format!("{database_path}-events"),
    }
}

/// Periodically reclaims the sliding-window rate-limiter, idempotency
/// cache, and offline DM queue, and resets the daily message counters at
/// each sweep past midnight UTC. Mirrors the teacher's fixed-interval
/// `spawn_retention_task` shape.
#[allow(clippy::too_many_arguments)]
fn spawn_gc_sweep(
    rate_limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyCache>,
    dm_queue: DmQueue,
    quotas: Arc<QuotaGauges>,
    sessions: SharedSessionRegistry,
    db: Arc<Db>,
    event_log: Arc<dyn EventLog>,
) {
    tokio::spawn(async move {
        let mut last_reset_day = chrono::Utc::now().date_naive();
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            rate_limiter.gc(3600);
            idempotency.gc();
            for (fleet, message) in dm_queue.gc() {
                notify_dm_dropped(&sessions, &db, &*event_log, &fleet, message).await;
            }

            let today = chrono::Utc::now().date_naive();
            if today != last_reset_day {
                quotas.reset_daily_counters();
                last_reset_day = today;
            }
        }
    });
}

/// Delivers a `dropped` notification to a DM sender whose message expired
/// or was evicted while they were offline, found by the periodic DM queue
/// sweep rather than a live connection's own enqueue/drain path.
async fn notify_dm_dropped(sessions: &SessionRegistry, db: &Db, event_log: &dyn EventLog, fleet: &str, message: models::DirectMessage) {
    let frame = OutEnvelope::event("direct", "dropped", serde_json::to_value(&message).unwrap()).to_text();
    sessions.send_to_agent(fleet, &message.from, &frame).await;
    if let Ok(f) = db.get_fleet_by_id(fleet) {
        event_log.append(&f.tenant, fleet, "direct.dropped", &serde_json::to_value(&message).unwrap());
    }
}

/// Reassigns claim-grace-expired tasks and fails TTL-expired parked tasks
/// (spec §4.5: both halves of task lifecycle enforcement that need no live
/// connection to act on).
#[allow(clippy::too_many_arguments)]
fn spawn_task_sweep(
    db: Arc<Db>,
    bus: Arc<FleetBus>,
    presence: PresenceIndex,
    tasks: TaskStore,
    task_stats: Arc<Mutex<TaskStatsIndex>>,
    sessions: SharedSessionRegistry,
    event_log: Arc<dyn EventLog>,
    claim_grace_secs: i64,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
            let now = chrono::Utc::now().timestamp();

            for fleet in tasks.fleets() {
                let Ok(fleet_record) = db.get_fleet_by_id(&fleet) else {
                    continue;
                };

                for task in tasks.in_flight(&fleet) {
                    match task.status {
                        TaskStatus::Assigned => {
                            let Some(assigned_at) = task
                                .assigned_at
                                .as_deref()
                                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                            else {
                                continue;
                            };
                            if task_router::is_claim_grace_expired(assigned_at.timestamp(), now, claim_grace_secs)
                                && let Some(requeued) = tasks.requeue(&fleet, &task.id)
                            {
                                gateway::ws::assign_or_park(&fleet_record.tenant, &fleet, requeued, &bus, &presence, &tasks, &task_stats, &sessions, &*event_log).await;
                            }
                        }
                        TaskStatus::Pending => {
                            let Ok(created_at) = chrono::DateTime::parse_from_rfc3339(&task.created_at) else {
                                continue;
                            };
                            if task_router::is_ttl_expired(&task, created_at.timestamp(), now)
                                && let Some(failed) = tasks.mark_no_capable_agent(&fleet, &task.id)
                            {
                                event_log.append(&fleet_record.tenant, &fleet, "task.failed", &serde_json::to_value(&failed).unwrap());
                                bus.publish(RingEvent::TaskUpdated { fleet: fleet.clone(), task: failed });
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    });
}
