//! Process configuration, read from the environment with documented
//! defaults, following the teacher's `RateLimitConfig::from_env` idiom.

use std::env;

#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Path to the SQLite database file backing MetadataStore + EventLog.
    pub database_path: String,
    /// Interval between gateway pings (spec §4.1): 30s.
    pub heartbeat_interval_secs: u64,
    /// Missed pongs before a session is force-closed (spec §4.1): 3.
    pub heartbeat_missed_limit: u32,
    /// Auth must complete within this many seconds of connect (spec §5).
    pub auth_timeout_secs: u64,
    /// Single envelope size limit in bytes (spec §4.1): 64 KiB.
    pub max_frame_bytes: usize,
    /// Shared-memory value size limit in bytes (spec §3): 1 MiB.
    pub max_memory_value_bytes: usize,
    /// Soft per-session message rate cap, enforced by X2 (spec §4.1).
    pub messages_per_sec: usize,
    /// Per-agent memory-write and task-submission rate caps (spec §4.7's
    /// `mem_write:<agent>` / `task_submit:<agent>` scopes).
    pub memory_writes_per_sec: usize,
    pub task_submit_per_sec: usize,
    /// Per-key control-plane request rate cap (spec §4.7's `api:<key_id>` scope).
    pub api_requests_per_min: usize,
    /// Auth attempts per source address per window before `rate_limited` (spec §4.1).
    pub auth_attempts_max: usize,
    pub auth_attempts_window_secs: u64,
    /// Offline DM queue bounds (spec §4.5).
    pub dm_queue_max: usize,
    pub dm_queue_ttl_secs: u64,
    /// Task claim grace period before reassignment (spec §4.5).
    pub task_claim_grace_secs: u64,
    /// Idempotency cache TTL (spec §4.7).
    pub idempotency_ttl_secs: u64,
    /// Presence sweep interval / staleness threshold (spec §4.3).
    pub presence_sweep_interval_secs: u64,
    pub presence_stale_secs: u64,
    /// Replay delivery rate (spec §4.6).
    pub replay_items_per_sec: u64,
    /// Soft/hard quota thresholds as fractions of the plan limit (spec §4.7).
    pub quota_soft_fraction: f64,
    /// Bootstrap credential for `POST /tenants` (spec §6.2), the one
    /// control-plane route that precedes any tenant admin key existing.
    pub platform_admin_key: String,
    /// Base URL the `BlobSigner` port mints signed URLs against (spec §6.3);
    /// the blob store process itself is out of scope.
    pub blob_base_url: String,
    pub blob_signing_secret: String,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            database_path: "data/ringforge.db".to_string(),
            heartbeat_interval_secs: 30,
            heartbeat_missed_limit: 3,
            auth_timeout_secs: 10,
            max_frame_bytes: 64 * 1024,
            max_memory_value_bytes: 1024 * 1024,
            messages_per_sec: 100,
            memory_writes_per_sec: 50,
            task_submit_per_sec: 20,
            api_requests_per_min: 120,
            auth_attempts_max: 5,
            auth_attempts_window_secs: 60,
            dm_queue_max: 100,
            dm_queue_ttl_secs: 300,
            task_claim_grace_secs: 10,
            idempotency_ttl_secs: 300,
            presence_sweep_interval_secs: 15,
            presence_stale_secs: 90,
            replay_items_per_sec: 100,
            quota_soft_fraction: 0.8,
            platform_admin_key: String::new(),
            blob_base_url: "http://localhost:9000/blobs".to_string(),
            blob_signing_secret: String::new(),
        }
    }
}

impl RingConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();

        if let Ok(v) = env::var("DATABASE_PATH") {
            c.database_path = v;
        }
        if let Some(n) = parse_env_u64("HEARTBEAT_INTERVAL_SECS") {
            c.heartbeat_interval_secs = n;
        }
        if let Some(n) = parse_env_u32("HEARTBEAT_MISSED_LIMIT") {
            c.heartbeat_missed_limit = n;
        }
        if let Some(n) = parse_env_u64("AUTH_TIMEOUT_SECS") {
            c.auth_timeout_secs = n;
        }
        if let Some(n) = parse_env_usize("MAX_FRAME_BYTES") {
            c.max_frame_bytes = n;
        }
        if let Some(n) = parse_env_usize("MAX_MEMORY_VALUE_BYTES") {
            c.max_memory_value_bytes = n;
        }
        if let Some(n) = parse_env_usize("MESSAGES_PER_SEC") {
            c.messages_per_sec = n;
        }
        if let Some(n) = parse_env_usize("MEMORY_WRITES_PER_SEC") {
            c.memory_writes_per_sec = n;
        }
        if let Some(n) = parse_env_usize("TASK_SUBMIT_PER_SEC") {
            c.task_submit_per_sec = n;
        }
        if let Some(n) = parse_env_usize("API_REQUESTS_PER_MIN") {
            c.api_requests_per_min = n;
        }
        if let Some(n) = parse_env_usize("AUTH_ATTEMPTS_MAX") {
            c.auth_attempts_max = n;
        }
        if let Some(n) = parse_env_u64("AUTH_ATTEMPTS_WINDOW_SECS") {
            c.auth_attempts_window_secs = n;
        }
        if let Some(n) = parse_env_usize("DM_QUEUE_MAX") {
            c.dm_queue_max = n;
        }
        if let Some(n) = parse_env_u64("DM_QUEUE_TTL_SECS") {
            c.dm_queue_ttl_secs = n;
        }
        if let Some(n) = parse_env_u64("TASK_CLAIM_GRACE_SECS") {
            c.task_claim_grace_secs = n;
        }
        if let Some(n) = parse_env_u64("IDEMPOTENCY_TTL_SECS") {
            c.idempotency_ttl_secs = n;
        }
        if let Some(n) = parse_env_u64("REPLAY_ITEMS_PER_SEC") {
            c.replay_items_per_sec = n;
        }

        c.platform_admin_key = env::var("RINGFORGE_PLATFORM_ADMIN_KEY").unwrap_or_else(|_| {
            let generated = random_hex_secret();
            log::warn!(
                "RINGFORGE_PLATFORM_ADMIN_KEY not set; generated an ephemeral key for this process (set it explicitly in production): {generated}"
            );
            generated
        });

        if let Ok(v) = env::var("RINGFORGE_BLOB_BASE_URL") {
            c.blob_base_url = v;
        }
        c.blob_signing_secret = env::var("RINGFORGE_BLOB_SIGNING_SECRET").unwrap_or_else(|_| {
            log::warn!("RINGFORGE_BLOB_SIGNING_SECRET not set; generated an ephemeral signing key for this process");
            random_hex_secret()
        });

        c
    }
}

fn random_hex_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
