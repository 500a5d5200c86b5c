//! The gateway WebSocket route (spec §4, §5): one connection per agent
//! socket, authenticated before anything else is accepted, then a
//! `select!` loop fanning inbound frames out to the handler families and
//! forwarding `FleetBus` events back down, the same `select!`-over-
//! `broadcast::Receiver` shape as the teacher's `routes/stream.rs`
//! `EventStream!`, adapted from one-way SSE push to a duplex socket.

use crate::activity;
use crate::db::Db;
use crate::error::RingError;
use crate::event_log::{EventLog, LogItem};
use crate::events::{FleetBus, RingEvent};
use crate::memory::MemoryStore;
use crate::models::*;
use crate::presence::PresenceIndex;
use crate::rate_limit::{QuotaGauges, QuotaLevel, RateLimiter};
use crate::task_router::{self, TaskStatsIndex};
use crate::tasks::TaskStore;
use crate::{audit::AuditSink, blob::BlobSigner, config::RingConfig, dm::DmQueue, idempotency::IdempotencyCache};
use futures_util::{SinkExt, StreamExt};
use rocket::{get, State};
use rocket_ws::{Message, WebSocket};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use super::auth;
use super::protocol::{self, Envelope, OutEnvelope};
use super::session::{SessionRegistry, SessionState, SharedSessionRegistry};

/// Everything a connection needs for its whole lifetime, cloned once out of
/// managed state at connect time so the `ws.channel` future can be `'static`.
struct ConnCtx {
    tenant: String,
    fleet: String,
    client_addr: String,
    db: Arc<Db>,
    bus: Arc<FleetBus>,
    presence: PresenceIndex,
    memory: MemoryStore,
    sessions: SharedSessionRegistry,
    rate_limiter: Arc<RateLimiter>,
    quotas: Arc<QuotaGauges>,
    idempotency: Arc<IdempotencyCache>,
    event_log: Arc<dyn EventLog>,
    task_stats: Arc<Mutex<TaskStatsIndex>>,
    tasks: TaskStore,
    dm_queue: DmQueue,
    audit: Arc<dyn AuditSink>,
    blob_signer: Arc<dyn BlobSigner>,
    config: RingConfig,
}

#[allow(clippy::too_many_arguments)]
#[get("/v1/gateway/<tenant>/<fleet>")]
pub fn connect(
    ws: WebSocket,
    tenant: String,
    fleet: String,
    addr: super::ClientAddr,
    db: &State<Arc<Db>>,
    bus: &State<Arc<FleetBus>>,
    presence: &State<PresenceIndex>,
    memory: &State<MemoryStore>,
    sessions: &State<SharedSessionRegistry>,
    rate_limiter: &State<Arc<RateLimiter>>,
    quotas: &State<Arc<QuotaGauges>>,
    idempotency: &State<Arc<IdempotencyCache>>,
    event_log: &State<Arc<dyn EventLog>>,
    task_stats: &State<Arc<Mutex<TaskStatsIndex>>>,
    tasks: &State<TaskStore>,
    dm_queue: &State<DmQueue>,
    audit: &State<Arc<dyn AuditSink>>,
    blob_signer: &State<Arc<dyn BlobSigner>>,
    config: &State<RingConfig>,
) -> rocket_ws::Channel<'static> {
    let ctx = ConnCtx {
        tenant,
        fleet,
        client_addr: addr.0,
        db: db.inner().clone(),
        bus: bus.inner().clone(),
        presence: presence.inner().clone(),
        memory: memory.inner().clone(),
        sessions: sessions.inner().clone(),
        rate_limiter: rate_limiter.inner().clone(),
        quotas: quotas.inner().clone(),
        idempotency: idempotency.inner().clone(),
        event_log: event_log.inner().clone(),
        task_stats: task_stats.inner().clone(),
        tasks: tasks.inner().clone(),
        dm_queue: dm_queue.inner().clone(),
        audit: audit.inner().clone(),
        blob_signer: blob_signer.inner().clone(),
        config: config.inner().clone(),
    };

    ws.channel(move |stream| {
        Box::pin(async move {
            run_connection(ctx, stream).await;
            Ok(())
        })
    })
}

async fn run_connection(ctx: ConnCtx, stream: rocket_ws::stream::DuplexStream) {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let conn_id = uuid::Uuid::new_v4().to_string();

    // Pushed within the first round-trip of accept (spec §4.1): tells the
    // client which protocol versions are supported and hands it a
    // reconnect challenge it can sign on a future resume.
    let challenge = auth::generate_challenge();
    let _ = out_tx.send(
        OutEnvelope::event(
            "system",
            "auth_required",
            serde_json::json!({"protocol_versions": protocol::SUPPORTED_PROTOCOL_VERSIONS, "challenge": challenge}),
        )
        .to_text(),
    );

    if let Some(agent) = authenticate_connection(&ctx, &conn_id, &challenge, &out_tx, &mut ws_rx).await {
        main_loop(&ctx, &conn_id, &agent, &mut ws_rx, &out_tx).await;
        cleanup_connection(&ctx, &conn_id, &agent).await;
    }

    drop(out_tx);
    let _ = writer.await;
}

type WsReader = futures_util::stream::SplitStream<rocket_ws::stream::DuplexStream>;

#[derive(Deserialize)]
struct AuthPayload {
    #[serde(default)]
    key: Option<String>,
    agent: String,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default = "default_protocol_version")]
    protocol_version: u32,
    /// Registers (once) the agent's public key for future reconnects.
    #[serde(default)]
    public_key: Option<String>,
    /// Reconnect path: a signature over the `auth_required` challenge made
    /// with the agent's previously-registered private key, in lieu of
    /// presenting the tenant's shared secret a second time.
    #[serde(default)]
    signature: Option<String>,
}

fn default_protocol_version() -> u32 {
    1
}

fn tenant_plan(ctx: &ConnCtx) -> Plan {
    ctx.db.get_tenant(&ctx.tenant).map(|t| t.plan).unwrap_or(Plan::Free)
}

fn quota_level(current: i64, limit: i64, soft_fraction: f64) -> QuotaLevel {
    QuotaGauges::check_level(current, limit, soft_fraction)
}

/// Runs the pre-loop handshake (spec §4.1, §5): the first frame must be an
/// `auth` envelope, attempted within `auth_timeout_secs` and rate-limited
/// per source address. Returns the authenticated agent, or `None` after
/// having already pushed the terminal error frame.
async fn authenticate_connection(
    ctx: &ConnCtx,
    conn_id: &str,
    challenge: &str,
    out_tx: &mpsc::UnboundedSender<String>,
    ws_rx: &mut WsReader,
) -> Option<Agent> {
    let deadline = Duration::from_secs(ctx.config.auth_timeout_secs);
    let rl_key = format!("auth:{}", ctx.client_addr);

    let attempt = tokio::time::timeout(deadline, async {
        loop {
            if !ctx.rate_limiter.check(&rl_key, ctx.config.auth_attempts_max, ctx.config.auth_attempts_window_secs) {
                return Err(RingError::RateLimited { retry_after_ms: 1000 });
            }
            let Some(msg) = ws_rx.next().await else {
                return Err(RingError::Unauthorized("connection closed before auth".into()));
            };
            let Ok(Message::Text(raw)) = msg else {
                continue;
            };
            let envelope = match protocol::parse_frame(&raw, ctx.config.max_frame_bytes) {
                Ok(e) => e,
                Err(e) => {
                    let _ = out_tx.send(e.to_envelope(None).to_string());
                    continue;
                }
            };
            if envelope.kind != "auth" {
                let _ = out_tx.send(
                    RingError::InvalidMessage("expected an auth envelope first".into())
                        .to_envelope(envelope.r#ref.as_deref())
                        .to_string(),
                );
                continue;
            }
            return Ok(envelope);
        }
    })
    .await;

    let envelope = match attempt {
        Ok(Ok(e)) => e,
        Ok(Err(e)) => {
            let _ = out_tx.send(e.to_envelope(None).to_string());
            return None;
        }
        Err(_elapsed) => {
            let _ = out_tx.send(RingError::Unauthorized("auth timed out".into()).to_envelope(None).to_string());
            return None;
        }
    };

    let payload: AuthPayload = match serde_json::from_value(envelope.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            let _ = out_tx.send(
                RingError::InvalidMessage(format!("bad auth payload: {e}"))
                    .to_envelope(envelope.r#ref.as_deref())
                    .to_string(),
            );
            return None;
        }
    };

    if !protocol::SUPPORTED_PROTOCOL_VERSIONS.contains(&payload.protocol_version) {
        let _ = out_tx.send(
            RingError::InvalidMessage("unsupported protocol_version".into())
                .to_envelope(envelope.r#ref.as_deref())
                .to_string(),
        );
        return None;
    }

    // A lookup failure here is treated as forbidden, not not_found, so a
    // probing client can't distinguish "wrong tenant" from "unknown fleet".
    if ctx.db.get_fleet(&ctx.tenant, &ctx.fleet).is_err() {
        let _ = out_tx.send(RingError::Forbidden.to_envelope(envelope.r#ref.as_deref()).to_string());
        return None;
    }

    let reconnected = payload.signature.as_deref().is_some_and(|sig| {
        ctx.db
            .get_agent_by_name(&ctx.fleet, &payload.agent)
            .ok()
            .and_then(|a| a.public_key)
            .is_some_and(|pk| auth::verify_reconnect_signature(&pk, challenge, sig))
    });

    if !reconnected {
        let Some(presented) = &payload.key else {
            let _ = out_tx.send(
                RingError::Unauthorized("no key presented and reconnect signature invalid".into())
                    .to_envelope(envelope.r#ref.as_deref())
                    .to_string(),
            );
            return None;
        };
        let api_key = match auth::authenticate_key(&ctx.db, presented) {
            Ok(k) => k,
            Err(e) => {
                ctx.audit.record(&ctx.tenant, &payload.agent, "auth.failed", serde_json::json!({"reason": e.message()}));
                let _ = out_tx.send(e.to_envelope(envelope.r#ref.as_deref()).to_string());
                return None;
            }
        };
        if api_key.tenant != ctx.tenant {
            let _ = out_tx.send(RingError::Forbidden.to_envelope(envelope.r#ref.as_deref()).to_string());
            return None;
        }
        if let Some(scoped_fleet) = &api_key.fleet {
            if scoped_fleet != &ctx.fleet {
                let _ = out_tx.send(RingError::Forbidden.to_envelope(envelope.r#ref.as_deref()).to_string());
                return None;
            }
        }
    }

    let agent = match ctx.db.upsert_agent_by_name(&ctx.tenant, &ctx.fleet, &payload.agent, payload.framework.as_deref()) {
        Ok(a) => a,
        Err(e) => {
            let _ = out_tx.send(RingError::from(e).to_envelope(envelope.r#ref.as_deref()).to_string());
            return None;
        }
    };
    if let (Some(pk), true) = (&payload.public_key, agent.public_key.is_none()) {
        ctx.db.set_agent_public_key(&agent.id, pk).ok();
    }

    let plan = tenant_plan(ctx);
    if quota_level(ctx.quotas.concurrent_agents(&ctx.tenant), plan.concurrent_agent_quota(), ctx.config.quota_soft_fraction) == QuotaLevel::Hard {
        let _ = out_tx.send(RingError::QuotaExceeded { retry_after_ms: None }.to_envelope(envelope.r#ref.as_deref()).to_string());
        return None;
    }

    ctx.sessions
        .register(conn_id.to_string(), &ctx.tenant, &ctx.fleet, &agent.name, &ctx.client_addr, payload.protocol_version, out_tx.clone())
        .await;
    if let Err(e) = ctx.sessions.set_state(conn_id, SessionState::Active).await {
        let _ = out_tx.send(e.to_envelope(None).to_string());
        return None;
    }

    let session_record = SessionRecord {
        id: conn_id.to_string(),
        agent: agent.id.clone(),
        fleet: ctx.fleet.clone(),
        connected_at: chrono::Utc::now().to_rfc3339(),
        disconnected_at: None,
        reason: None,
        client_addr: ctx.client_addr.clone(),
        protocol_version: payload.protocol_version,
    };
    if let Err(e) = ctx.db.insert_session(&session_record) {
        log::warn!("failed to persist session record: {:?}", e);
    }

    ctx.audit.record(
        &ctx.tenant,
        &agent.name,
        if reconnected { "auth.reconnected" } else { "auth.succeeded" },
        serde_json::json!({"conn_id": conn_id}),
    );
    ctx.quotas.agent_connected(&ctx.tenant);

    let entry = PresenceEntry {
        agent: agent.name.clone(),
        name: agent.name.clone(),
        state: PresenceState::Online,
        task: None,
        capabilities: agent.capabilities.clone(),
    };
    let is_new = ctx.presence.update(&ctx.fleet, entry.clone());
    if is_new {
        ctx.event_log.append(&ctx.tenant, &ctx.fleet, "agent.joined", &serde_json::to_value(&entry).unwrap());
        ctx.bus.publish(RingEvent::AgentJoined { fleet: ctx.fleet.clone(), entry });
    }

    let recipient_key = format!("{}:{}", ctx.fleet, agent.name);
    let (queued, dropped) = ctx.dm_queue.drain(&recipient_key);
    for item in queued {
        let frame = OutEnvelope::event("direct", "deliver", serde_json::to_value(&item).unwrap()).to_text();
        let _ = out_tx.send(frame);
    }
    notify_dm_dropped(ctx, dropped).await;

    let _ = out_tx.send(
        OutEnvelope::reply("auth", "ok", envelope.r#ref.clone(), serde_json::json!({"agent_id": agent.id, "agent": agent.name}))
            .to_text(),
    );

    Some(agent)
}

/// Delivers a `dropped` system notification to the original sender of each
/// evicted/expired DM, if they're still connected (spec §4.5/§9: "on
/// overflow or TTL, produce a dropped-notification exactly once").
async fn notify_dm_dropped(ctx: &ConnCtx, dropped: Vec<DirectMessage>) {
    for message in dropped {
        let frame = OutEnvelope::event("direct", "dropped", serde_json::to_value(&message).unwrap()).to_text();
        ctx.sessions.send_to_agent(&ctx.fleet, &message.from, &frame).await;
        ctx.event_log.append(&ctx.tenant, &ctx.fleet, "direct.dropped", &serde_json::to_value(&message).unwrap());
    }
}

/// The steady-state loop (spec §4.1): inbound frames, `FleetBus` fan-out
/// filtered to this agent's relevance, and the heartbeat ticker that force-
/// closes a connection past `heartbeat_missed_limit`.
async fn main_loop(ctx: &ConnCtx, conn_id: &str, agent: &Agent, ws_rx: &mut WsReader, out_tx: &mpsc::UnboundedSender<String>) {
    let mut bus_rx = ctx.bus.subscribe();
    let mut heartbeat = interval(Duration::from_secs(ctx.config.heartbeat_interval_secs));

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(raw)) => {
                        ctx.sessions.touch(conn_id).await;
                        handle_frame(ctx, conn_id, agent, &raw, out_tx).await;
                    }
                    Ok(Message::Pong(_)) => {
                        ctx.sessions.touch(conn_id).await;
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            event = bus_rx.recv() => {
                match event {
                    Ok(ev) if ev.fleet() == ctx.fleet => {
                        if let Some(frame) = build_event_frame(ctx, agent, &ev) {
                            let _ = out_tx.send(frame);
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                let _ = out_tx.send(OutEnvelope::event("system", "ping", serde_json::json!({})).to_text());
                ctx.sessions.record_missed_pong(conn_id).await;
                let stale = ctx.sessions.stale_connections(ctx.config.heartbeat_missed_limit).await;
                if stale.iter().any(|id| id == conn_id) {
                    break;
                }
            }
        }
    }
}

async fn cleanup_connection(ctx: &ConnCtx, conn_id: &str, agent: &Agent) {
    ctx.sessions.remove(conn_id).await;
    ctx.presence.remove(&ctx.fleet, &agent.name);
    ctx.event_log.append(&ctx.tenant, &ctx.fleet, "agent.left", &serde_json::json!({"agent": agent.name}));
    ctx.bus.publish(RingEvent::AgentLeft { fleet: ctx.fleet.clone(), agent: agent.name.clone() });
    ctx.quotas.agent_disconnected(&ctx.tenant);
    if let Err(e) = ctx.db.close_session(conn_id, "closed") {
        log::warn!("failed to close session record: {:?}", e);
    }
    ctx.audit.record(&ctx.tenant, &agent.name, "session.closed", serde_json::json!({"conn_id": conn_id}));
}

/// Parses, size-checks, rate-limits, and idempotency-caches an inbound
/// frame before dispatching it to its handler family (spec §4.7's X2).
async fn handle_frame(ctx: &ConnCtx, conn_id: &str, agent: &Agent, raw: &str, out_tx: &mpsc::UnboundedSender<String>) {
    let envelope = match protocol::parse_frame(raw, ctx.config.max_frame_bytes) {
        Ok(e) => e,
        Err(e) => {
            let _ = out_tx.send(e.to_envelope(None).to_string());
            return;
        }
    };

    if !protocol::is_known_family(&envelope.kind) {
        let _ = out_tx.send(
            RingError::InvalidMessage(format!("unknown family: {}", envelope.kind))
                .to_envelope(envelope.r#ref.as_deref())
                .to_string(),
        );
        return;
    }

    if !ctx.rate_limiter.check(&format!("msg:{conn_id}"), ctx.config.messages_per_sec, 1) {
        let _ = out_tx.send(RingError::RateLimited { retry_after_ms: 1000 }.to_envelope(envelope.r#ref.as_deref()).to_string());
        return;
    }

    if let Some(r#ref) = &envelope.r#ref {
        if let Some(cached) = ctx.idempotency.get(&agent.name, r#ref) {
            let frame = OutEnvelope::reply(&envelope.kind, envelope.action.as_deref().unwrap_or("ok"), envelope.r#ref.clone(), cached).to_text();
            let _ = out_tx.send(frame);
            return;
        }
    }

    match dispatch(ctx, agent, &envelope, out_tx).await {
        Ok(payload) => {
            if let Some(r#ref) = &envelope.r#ref {
                ctx.idempotency.put(&agent.name, r#ref, payload.clone());
            }
            let frame = OutEnvelope::reply(&envelope.kind, envelope.action.as_deref().unwrap_or("ok"), envelope.r#ref.clone(), payload).to_text();
            let _ = out_tx.send(frame);
        }
        Err(e) => {
            let _ = out_tx.send(e.to_envelope(envelope.r#ref.as_deref()).to_string());
        }
    }
}

async fn dispatch(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope, out_tx: &mpsc::UnboundedSender<String>) -> Result<serde_json::Value, RingError> {
    let plan = tenant_plan(ctx);
    if quota_level(ctx.quotas.messages_today(&ctx.tenant), plan.daily_message_quota(), ctx.config.quota_soft_fraction) == QuotaLevel::Hard {
        return Err(RingError::QuotaExceeded { retry_after_ms: None });
    }
    ctx.db.bump_agent_message_count(&agent.id).ok();
    let count = ctx.quotas.record_message(&ctx.tenant);
    if quota_level(count, plan.daily_message_quota(), ctx.config.quota_soft_fraction) == QuotaLevel::Soft {
        let _ = out_tx.send(
            OutEnvelope::event("system", "quota_warning", serde_json::json!({"resource": "messages_today", "current": count, "limit": plan.daily_message_quota()})).to_text(),
        );
    }

    match envelope.kind.as_str() {
        "presence" => handle_presence(ctx, agent, envelope).await,
        "activity" => handle_activity(ctx, agent, envelope).await,
        "memory" => handle_memory(ctx, agent, envelope, out_tx).await,
        "direct" => handle_direct(ctx, agent, envelope).await,
        "task" => handle_task(ctx, agent, envelope).await,
        "replay" => handle_replay(ctx, envelope, out_tx).await,
        "file" => handle_file(ctx, envelope).await,
        "group" => handle_group(ctx, agent, envelope).await,
        "system" => handle_system(envelope).await,
        "auth" => Err(RingError::Conflict("already authenticated".into())),
        other => Err(RingError::InvalidMessage(format!("unhandled family: {other}"))),
    }
}

async fn handle_presence(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    #[derive(Deserialize, Default)]
    struct Update {
        #[serde(default)]
        state: Option<String>,
        #[serde(default)]
        task: Option<String>,
    }

    match envelope.action.as_deref() {
        Some("update") => {
            let req: Update = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            if let Some(s) = &req.state {
                let state = PresenceState::parse(s).ok_or_else(|| RingError::InvalidMessage("unknown presence state".into()))?;
                ctx.presence.set_state(&ctx.fleet, &agent.name, state);
            }
            if req.task.is_some() {
                ctx.presence.set_task(&ctx.fleet, &agent.name, req.task.clone());
            }
            if let Some(entry) = ctx.presence.get(&ctx.fleet, &agent.name) {
                ctx.bus.publish(RingEvent::PresenceChanged { fleet: ctx.fleet.clone(), entry });
            }

            // Spec §4.5: a task parked without a capable agent is
            // re-evaluated on every presence change, not just left to rot
            // until its TTL elapses.
            for pending in ctx.tasks.in_flight(&ctx.fleet) {
                if pending.status == TaskStatus::Pending {
                    assign_or_park(&ctx.tenant, &ctx.fleet, pending, &ctx.bus, &ctx.presence, &ctx.tasks, &ctx.task_stats, &ctx.sessions, &*ctx.event_log).await;
                }
            }

            Ok(serde_json::json!({"acknowledged": true}))
        }
        Some("list") | None => Ok(serde_json::json!({"roster": ctx.presence.roster(&ctx.fleet)})),
        Some(other) => Err(RingError::InvalidMessage(format!("unknown presence action: {other}"))),
    }
}

async fn handle_activity(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    #[derive(Deserialize)]
    struct PostActivity {
        kind: ActivityKind,
        description: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        scope: Option<ActivityScope>,
    }

    if envelope.action.as_deref() != Some("post") {
        return Err(RingError::InvalidMessage("activity envelope requires action \"post\"".into()));
    }
    let req: PostActivity = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
    let description = activity::validate_description(&req.description).map_err(RingError::InvalidMessage)?;

    let event = ActivityEvent {
        id: uuid::Uuid::new_v4().to_string(),
        fleet: ctx.fleet.clone(),
        origin: agent.name.clone(),
        kind: req.kind,
        description,
        tags: req.tags,
        data: req.data,
        timestamp: chrono::Utc::now().to_rfc3339(),
        scope: req.scope,
    };
    ctx.event_log.append(&ctx.tenant, &ctx.fleet, "activity", &serde_json::to_value(&event).unwrap());
    ctx.bus.publish(RingEvent::Activity { fleet: ctx.fleet.clone(), event: event.clone() });
    Ok(serde_json::json!({"id": event.id}))
}

async fn handle_memory(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope, out_tx: &mpsc::UnboundedSender<String>) -> Result<serde_json::Value, RingError> {
    match envelope.action.as_deref() {
        Some("set") => {
            if !ctx.rate_limiter.check(&format!("mem_write:{}", agent.name), ctx.config.memory_writes_per_sec, 1) {
                return Err(RingError::RateLimited { retry_after_ms: 1000 });
            }
            let plan = tenant_plan(ctx);
            if quota_level(ctx.quotas.memory_entries(&ctx.tenant), plan.memory_entry_quota(), ctx.config.quota_soft_fraction) == QuotaLevel::Hard {
                return Err(RingError::QuotaExceeded { retry_after_ms: None });
            }

            let req: MemorySet = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let kind = match req.kind.as_deref() {
                Some("text") => MemoryValueKind::Text,
                Some("json") | None => MemoryValueKind::Json,
                Some("embedding_reference") => MemoryValueKind::EmbeddingReference,
                Some("blob_reference") => MemoryValueKind::BlobReference,
                Some(other) => return Err(RingError::InvalidMessage(format!("unknown memory kind: {other}"))),
            };
            let entry = ctx
                .memory
                .set(
                    &ctx.fleet,
                    req.key,
                    req.value,
                    kind,
                    req.tags,
                    agent.name.clone(),
                    req.ttl_secs,
                    req.metadata.unwrap_or(serde_json::json!({})),
                    ctx.config.max_memory_value_bytes,
                )
                .map_err(|e| match e {
                    crate::memory::MemoryError::TooLarge => RingError::PayloadTooLarge,
                    crate::memory::MemoryError::InvalidPattern(m) => RingError::InvalidMessage(m),
                })?;
            crate::memory::publish_memory_set(&ctx.event_log, &ctx.bus, &ctx.tenant, &ctx.fleet, entry.clone());
            let count = ctx.quotas.memory_entry_created(&ctx.tenant);
            if quota_level(count, plan.memory_entry_quota(), ctx.config.quota_soft_fraction) == QuotaLevel::Soft {
                let _ = out_tx.send(
                    OutEnvelope::event("system", "quota_warning", serde_json::json!({"resource": "memory_entries", "current": count, "limit": plan.memory_entry_quota()})).to_text(),
                );
            }
            Ok(serde_json::to_value(&entry).unwrap())
        }
        Some("get") => {
            #[derive(Deserialize)]
            struct Get {
                key: String,
            }
            let req: Get = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let entry = ctx.memory.get(&ctx.fleet, &req.key).ok_or_else(|| RingError::NotFound("memory key not found".into()))?;
            Ok(serde_json::to_value(&entry).unwrap())
        }
        Some("delete") => {
            #[derive(Deserialize)]
            struct Delete {
                key: String,
            }
            let req: Delete = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            if !ctx.memory.delete(&ctx.fleet, &req.key) {
                return Err(RingError::NotFound("memory key not found".into()));
            }
            crate::memory::publish_memory_delete(&ctx.event_log, &ctx.bus, &ctx.tenant, &ctx.fleet, req.key);
            ctx.quotas.memory_entry_deleted(&ctx.tenant);
            Ok(serde_json::json!({"deleted": true}))
        }
        Some("query") => {
            let q: MemoryQuery = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            Ok(serde_json::json!({"entries": ctx.memory.query(&ctx.fleet, &q)}))
        }
        Some("subscribe") => {
            #[derive(Deserialize)]
            struct Sub {
                pattern: String,
            }
            let req: Sub = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let id = ctx
                .memory
                .subscribe(&ctx.fleet, &agent.name, &req.pattern)
                .map_err(|e| match e {
                    crate::memory::MemoryError::InvalidPattern(m) => RingError::InvalidMessage(m),
                    crate::memory::MemoryError::TooLarge => RingError::ServerError("unexpected".into()),
                })?;
            Ok(serde_json::json!({"subscription_id": id}))
        }
        Some("unsubscribe") => {
            #[derive(Deserialize)]
            struct Unsub {
                subscription_id: String,
            }
            let req: Unsub = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            ctx.memory.unsubscribe(&ctx.fleet, &req.subscription_id);
            Ok(serde_json::json!({"unsubscribed": true}))
        }
        Some(other) => Err(RingError::InvalidMessage(format!("unknown memory action: {other}"))),
        None => Err(RingError::InvalidMessage("memory envelope missing action".into())),
    }
}

async fn handle_direct(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    #[derive(Deserialize)]
    struct SendDirect {
        to: String,
        #[serde(default)]
        correlation: Option<String>,
        payload: serde_json::Value,
    }

    if envelope.action.as_deref() != Some("send") {
        return Err(RingError::InvalidMessage("direct envelope requires action \"send\"".into()));
    }
    let req: SendDirect = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;

    let mut message = DirectMessage {
        id: uuid::Uuid::new_v4().to_string(),
        from: agent.name.clone(),
        to: req.to.clone(),
        correlation: req.correlation,
        payload: req.payload,
        timestamp: chrono::Utc::now().to_rfc3339(),
        state: DmDeliveryState::Queued,
    };

    let frame = OutEnvelope::event("direct", "deliver", serde_json::to_value(&message).unwrap()).to_text();
    let delivered = ctx.sessions.send_to_agent(&ctx.fleet, &req.to, &frame).await;
    if delivered > 0 {
        message.state = DmDeliveryState::Delivered;
    } else {
        let recipient_key = format!("{}:{}", ctx.fleet, req.to);
        let (state, dropped) = ctx.dm_queue.enqueue(&recipient_key, message.clone());
        message.state = state;
        notify_dm_dropped(ctx, dropped).await;
    }

    ctx.event_log.append(&ctx.tenant, &ctx.fleet, "direct.message", &serde_json::to_value(&message).unwrap());
    ctx.bus.publish(RingEvent::DirectMessage { fleet: ctx.fleet.clone(), message: message.clone() });
    Ok(serde_json::json!({"id": message.id, "state": message.state}))
}

/// Attempts to route `task` to the best capable, online candidate. Leaves
/// it `pending` (parked) with no further side effect if none qualify,
/// instead of failing it outright (spec §4.5: "parked in pending...
/// re-evaluated on every presence change until a candidate appears or the
/// TTL elapses"). Shared between the submit path, the presence-change
/// re-evaluation above, and the claim-grace sweeper in `lib.rs`.
pub(crate) async fn assign_or_park(
    tenant: &str,
    fleet: &str,
    task: Task,
    bus: &FleetBus,
    presence: &PresenceIndex,
    tasks: &TaskStore,
    task_stats: &Mutex<TaskStatsIndex>,
    sessions: &SessionRegistry,
    event_log: &dyn EventLog,
) -> Task {
    let roster = presence.roster(fleet);
    let capable = task_router::capable_agents(&roster, &task.required_capabilities);
    let snapshots: Vec<AgentTaskStats> = {
        let guard = task_stats.lock().unwrap_or_else(|e| e.into_inner());
        capable.iter().map(|p| guard.get(&p.agent)).collect()
    };
    let candidates: Vec<task_router::Candidate> = capable
        .iter()
        .zip(snapshots.iter())
        .map(|(presence, stats)| task_router::Candidate { presence, stats })
        .collect();

    let Some(assignee) = task_router::select_assignee(&candidates, &task.task_type) else {
        return task;
    };

    let assigned = tasks.assign(fleet, &task.id, &assignee).unwrap_or_else(|| task.clone());
    {
        let mut guard = task_stats.lock().unwrap_or_else(|e| e.into_inner());
        guard.record_assignment(&assignee, chrono::Utc::now().timestamp());
    }
    let frame = OutEnvelope::event("task", "assigned", serde_json::to_value(&assigned).unwrap()).to_text();
    sessions.send_to_agent(fleet, &assignee, &frame).await;
    event_log.append(tenant, fleet, "task.assigned", &serde_json::to_value(&assigned).unwrap());
    bus.publish(RingEvent::TaskUpdated { fleet: fleet.to_string(), task: assigned.clone() });
    assigned
}

async fn handle_task(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    match envelope.action.as_deref() {
        Some("submit") => {
            if !ctx.rate_limiter.check(&format!("task_submit:{}", agent.name), ctx.config.task_submit_per_sec, 1) {
                return Err(RingError::RateLimited { retry_after_ms: 1000 });
            }
            let req: SubmitTask = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let task = ctx.tasks.submit(&ctx.fleet, &agent.name, &req);
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "task.submitted", &serde_json::to_value(&task).unwrap());
            ctx.bus.publish(RingEvent::TaskUpdated { fleet: ctx.fleet.clone(), task: task.clone() });

            let result = assign_or_park(&ctx.tenant, &ctx.fleet, task, &ctx.bus, &ctx.presence, &ctx.tasks, &ctx.task_stats, &ctx.sessions, &*ctx.event_log).await;
            Ok(serde_json::to_value(&result).unwrap())
        }
        Some("claim") => {
            #[derive(Deserialize)]
            struct Claim {
                task_id: String,
            }
            let req: Claim = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let task = ctx
                .tasks
                .claim(&ctx.fleet, &req.task_id, &agent.name)
                .ok_or_else(|| RingError::Conflict("task is not assigned to this agent".into()))?;
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "task.claimed", &serde_json::to_value(&task).unwrap());
            ctx.bus.publish(RingEvent::TaskUpdated { fleet: ctx.fleet.clone(), task: task.clone() });
            Ok(serde_json::to_value(&task).unwrap())
        }
        Some("complete") => {
            #[derive(Deserialize)]
            struct Complete {
                task_id: String,
                #[serde(default)]
                result: serde_json::Value,
                #[serde(default)]
                latency_ms: f64,
            }
            let req: Complete = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let task = ctx.tasks.complete(&ctx.fleet, &req.task_id, req.result).ok_or_else(|| RingError::NotFound("task not found".into()))?;
            {
                let mut guard = ctx.task_stats.lock().unwrap_or_else(|e| e.into_inner());
                guard.record_completion(&agent.name, &task.task_type, req.latency_ms, true);
            }
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "task.completed", &serde_json::to_value(&task).unwrap());
            ctx.bus.publish(RingEvent::TaskUpdated { fleet: ctx.fleet.clone(), task: task.clone() });
            Ok(serde_json::to_value(&task).unwrap())
        }
        Some("fail") => {
            #[derive(Deserialize)]
            struct Fail {
                task_id: String,
                reason: String,
            }
            let req: Fail = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            let task = ctx.tasks.fail(&ctx.fleet, &req.task_id, req.reason).ok_or_else(|| RingError::NotFound("task not found".into()))?;
            {
                let mut guard = ctx.task_stats.lock().unwrap_or_else(|e| e.into_inner());
                guard.record_completion(&agent.name, &task.task_type, 0.0, false);
            }
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "task.failed", &serde_json::to_value(&task).unwrap());
            ctx.bus.publish(RingEvent::TaskUpdated { fleet: ctx.fleet.clone(), task: task.clone() });
            Ok(serde_json::to_value(&task).unwrap())
        }
        Some(other) => Err(RingError::InvalidMessage(format!("unknown task action: {other}"))),
        None => Err(RingError::InvalidMessage("task envelope missing action".into())),
    }
}

/// First-class group CRUD (spec §3, §4.7 "group create" in the idempotency
/// list). No `group` entry appears in the base wire `type` enumeration, but
/// dropping this silently would leave a fully-implemented store entity with
/// no way to ever populate it (see DESIGN.md).
async fn handle_group(ctx: &ConnCtx, agent: &Agent, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    match envelope.action.as_deref() {
        Some("create") => {
            #[derive(Deserialize)]
            struct CreateGroup {
                name: String,
                kind: GroupKind,
            }
            let req: CreateGroup = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;

            // Idempotent: re-creating an already-active group by name
            // returns the existing one instead of erroring.
            if let Ok(Some(existing)) = ctx.db.find_active_group_by_name(&ctx.fleet, &req.name) {
                return Ok(serde_json::to_value(&existing).unwrap());
            }

            let group = ctx.db.create_group(&ctx.fleet, &req.name, req.kind).map_err(RingError::from)?;
            ctx.db.add_group_member(&group.id, &agent.name, GroupRole::Owner).map_err(RingError::from)?;
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "group.created", &serde_json::to_value(&group).unwrap());
            ctx.bus.publish(RingEvent::GroupUpdated { fleet: ctx.fleet.clone(), group: group.clone() });
            Ok(serde_json::to_value(&group).unwrap())
        }
        Some("dissolve") => {
            #[derive(Deserialize)]
            struct Dissolve {
                group_id: String,
            }
            let req: Dissolve = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            ctx.db.dissolve_group(&req.group_id).map_err(RingError::from)?;
            let group = ctx.db.get_group(&ctx.fleet, &req.group_id).map_err(RingError::from)?;
            ctx.event_log.append(&ctx.tenant, &ctx.fleet, "group.dissolved", &serde_json::to_value(&group).unwrap());
            ctx.bus.publish(RingEvent::GroupUpdated { fleet: ctx.fleet.clone(), group: group.clone() });
            Ok(serde_json::to_value(&group).unwrap())
        }
        Some("add_member") => {
            #[derive(Deserialize)]
            struct AddMember {
                group_id: String,
                agent: String,
                #[serde(default = "default_group_role")]
                role: GroupRole,
            }
            fn default_group_role() -> GroupRole {
                GroupRole::Member
            }
            let req: AddMember = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            ctx.db.add_group_member(&req.group_id, &req.agent, req.role).map_err(RingError::from)?;
            let group = ctx.db.get_group(&ctx.fleet, &req.group_id).map_err(RingError::from)?;
            ctx.bus.publish(RingEvent::GroupUpdated { fleet: ctx.fleet.clone(), group: group.clone() });
            Ok(serde_json::json!({"added": true}))
        }
        Some("list") | None => Ok(serde_json::json!({"groups": ctx.db.list_groups(&ctx.fleet).map_err(RingError::from)?})),
        Some(other) => Err(RingError::InvalidMessage(format!("unknown group action: {other}"))),
    }
}

/// Streams the event log back to the caller as individually rate-limited
/// `replay.item` frames terminated by `replay.end` (spec §4.6, Scenario
/// S1), instead of one bulk reply, so a large backlog can't blow past the
/// frame size limit or starve the connection's heartbeat.
async fn handle_replay(ctx: &ConnCtx, envelope: &Envelope, out_tx: &mpsc::UnboundedSender<String>) -> Result<serde_json::Value, RingError> {
    #[derive(Deserialize, Default)]
    struct Replay {
        #[serde(default)]
        from: i64,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        kinds: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        agents: Vec<String>,
        #[serde(default = "default_replay_limit")]
        limit: usize,
    }
    fn default_replay_limit() -> usize {
        100
    }

    let req: Replay = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
    let items = ctx.event_log.read_since(&ctx.fleet, req.from, req.limit.min(1000));

    let rate = ctx.config.replay_items_per_sec.max(1);
    let mut gate = interval(Duration::from_millis((1000 / rate).max(1)));
    let mut delivered_count = 0usize;

    for item in items {
        if let Some(to) = req.to {
            if item.position > to {
                break;
            }
        }
        if !req.kinds.is_empty() && !req.kinds.iter().any(|k| k == &item.kind) {
            continue;
        }
        if !req.tags.is_empty() && !event_matches_tags(&item, &req.tags) {
            continue;
        }
        if !req.agents.is_empty() && !event_matches_agents(&item, &req.agents) {
            continue;
        }

        gate.tick().await;
        let frame = OutEnvelope::event("replay", "item", serde_json::to_value(&item).unwrap()).to_text();
        if out_tx.send(frame).is_err() {
            break;
        }
        delivered_count += 1;
    }

    let _ = out_tx.send(OutEnvelope::event("replay", "end", serde_json::json!({"delivered_count": delivered_count})).to_text());
    Ok(serde_json::json!({"delivered_count": delivered_count}))
}

/// Best-effort tag match: event payloads have no uniform shape across
/// kinds, so this looks for a `tags` array wherever the event happens to
/// carry one (activity posts, memory entries).
fn event_matches_tags(item: &LogItem, tags: &[String]) -> bool {
    item.payload
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).any(|t| tags.iter().any(|want| want == t)))
        .unwrap_or(false)
}

/// Best-effort agent match across the differently-named agent fields each
/// event kind happens to carry (`agent`, `origin`, `from`, `to`,
/// `requester`, `assigned_agent`).
fn event_matches_agents(item: &LogItem, agents: &[String]) -> bool {
    [
        item.payload.get("agent").and_then(|v| v.as_str()),
        item.payload.get("origin").and_then(|v| v.as_str()),
        item.payload.get("from").and_then(|v| v.as_str()),
        item.payload.get("to").and_then(|v| v.as_str()),
        item.payload.get("requester").and_then(|v| v.as_str()),
        item.payload.get("assigned_agent").and_then(|v| v.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|found| agents.iter().any(|want| want == found))
}

async fn handle_file(ctx: &ConnCtx, envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    match envelope.action.as_deref() {
        Some("sign") => {
            #[derive(Deserialize)]
            struct Sign {
                blob_ref: String,
                #[serde(default = "default_expiry_secs")]
                expires_in_secs: i64,
            }
            fn default_expiry_secs() -> i64 {
                300
            }
            let req: Sign = serde_json::from_value(envelope.payload.clone()).map_err(|e| RingError::InvalidMessage(e.to_string()))?;
            Ok(serde_json::json!({"url": ctx.blob_signer.sign(&req.blob_ref, req.expires_in_secs)}))
        }
        Some(other) => Err(RingError::InvalidMessage(format!("unknown file action: {other}"))),
        None => Err(RingError::InvalidMessage("file envelope missing action".into())),
    }
}

async fn handle_system(envelope: &Envelope) -> Result<serde_json::Value, RingError> {
    match envelope.action.as_deref() {
        Some("pong") | Some("ping") => Ok(serde_json::json!({})),
        Some(other) => Err(RingError::InvalidMessage(format!("unknown system action: {other}"))),
        None => Err(RingError::InvalidMessage("system envelope missing action".into())),
    }
}

/// Filters a `FleetBus` event down to a frame worth forwarding to `agent`'s
/// own socket, or `None` if it isn't relevant (own echo, scope mismatch, no
/// matching memory subscription).
fn build_event_frame(ctx: &ConnCtx, agent: &Agent, event: &RingEvent) -> Option<String> {
    match event {
        RingEvent::AgentJoined { entry, .. } if entry.agent != agent.name => {
            Some(OutEnvelope::event("presence", "joined", serde_json::to_value(entry).unwrap()).to_text())
        }
        RingEvent::AgentLeft { agent: left, .. } if left != &agent.name => {
            Some(OutEnvelope::event("presence", "left", serde_json::json!({"agent": left})).to_text())
        }
        RingEvent::PresenceChanged { entry, .. } if entry.agent != agent.name => {
            Some(OutEnvelope::event("presence", "changed", serde_json::to_value(entry).unwrap()).to_text())
        }
        RingEvent::Activity { event, .. } => {
            if event.origin == agent.name {
                return None;
            }
            let candidate = ctx.presence.get(&ctx.fleet, &agent.name)?;
            activity::matches_scope(event, &candidate).then(|| OutEnvelope::event("activity", "posted", serde_json::to_value(event).unwrap()).to_text())
        }
        RingEvent::MemorySet { entry, .. } => ctx
            .memory
            .matching_subscribers(&ctx.fleet, &entry.key)
            .iter()
            .any(|a| a == &agent.name)
            .then(|| OutEnvelope::event("memory", "set", serde_json::to_value(entry).unwrap()).to_text()),
        RingEvent::MemoryDeleted { key, .. } => ctx
            .memory
            .matching_subscribers(&ctx.fleet, key)
            .iter()
            .any(|a| a == &agent.name)
            .then(|| OutEnvelope::event("memory", "deleted", serde_json::json!({"key": key})).to_text()),
        RingEvent::TaskUpdated { task, .. } => {
            (task.assigned_agent.as_deref() == Some(agent.name.as_str()) || task.requester == agent.name)
                .then(|| OutEnvelope::event("task", "updated", serde_json::to_value(task).unwrap()).to_text())
        }
        RingEvent::GroupUpdated { group, .. } => Some(OutEnvelope::event("group", "updated", serde_json::to_value(group).unwrap()).to_text()),
        _ => None,
    }
}
