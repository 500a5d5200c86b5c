use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Tenancy ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Scale,
    Enterprise,
}

impl Plan {
    pub fn retention_hours(&self) -> i64 {
        match self {
            Plan::Free => 24,
            Plan::Pro => 24 * 7,
            Plan::Scale => 24 * 30,
            Plan::Enterprise => 24 * 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Scale => "scale",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Daily message quota (spec §4.7, Scenario S6: free tier rejects at
    /// 50,001 messages in a day).
    pub fn daily_message_quota(&self) -> i64 {
        match self {
            Plan::Free => 50_000,
            Plan::Pro => 500_000,
            Plan::Scale => 5_000_000,
            Plan::Enterprise => i64::MAX,
        }
    }

    pub fn concurrent_agent_quota(&self) -> i64 {
        match self {
            Plan::Free => 10,
            Plan::Pro => 100,
            Plan::Scale => 1_000,
            Plan::Enterprise => i64::MAX,
        }
    }

    pub fn memory_entry_quota(&self) -> i64 {
        match self {
            Plan::Free => 1_000,
            Plan::Pro => 50_000,
            Plan::Scale => 500_000,
            Plan::Enterprise => i64::MAX,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Plan::Free),
            "pro" => Some(Plan::Pro),
            "scale" => Some(Plan::Scale),
            "enterprise" => Some(Plan::Enterprise),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tenant {
    pub id: String,
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub id: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_plan() -> String {
    "free".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenant {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

// --- Fleet ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Fleet {
    pub id: String,
    pub tenant: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFleet {
    pub name: String,
}

// --- API Keys ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Live,
    Test,
    Admin,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Live => "live",
            KeyType::Test => "test",
            KeyType::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(KeyType::Live),
            "test" => Some(KeyType::Test),
            "admin" => Some(KeyType::Admin),
            _ => None,
        }
    }
}

/// Stored shape of an API key: only the hash and a displayable prefix ever
/// persist. The plaintext secret is returned once, at mint time, and never
/// again.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiKey {
    pub id: String,
    pub tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet: Option<String>,
    pub key_type: KeyType,
    pub prefix: String,
    pub hash: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MintedKey {
    pub id: String,
    pub secret: String,
    pub prefix: String,
    pub key_type: String,
}

#[derive(Debug, Deserialize)]
pub struct MintKeyRequest {
    #[serde(default = "default_key_type")]
    pub key_type: String,
    #[serde(default)]
    pub fleet: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

fn default_key_type() -> String {
    "live".to_string()
}

// --- Agent ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AgentProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Agent {
    pub id: String,
    pub tenant: String,
    pub fleet: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub profile: AgentProfile,
    pub total_connections: i64,
    pub total_messages: i64,
    pub last_seen: String,
    pub created_at: String,
}

// --- Session ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub agent: String,
    pub fleet: String,
    pub connected_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub client_addr: String,
    pub protocol_version: u32,
}

/// At most this many historical session rows are retained per agent.
pub const MAX_SESSIONS_PER_AGENT: usize = 50;

// --- Presence (in-memory only, not persisted) ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Busy,
    Away,
}

impl PresenceState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(PresenceState::Online),
            "busy" => Some(PresenceState::Busy),
            "away" => Some(PresenceState::Away),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Busy => "busy",
            PresenceState::Away => "away",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PresenceEntry {
    pub agent: String,
    pub name: String,
    pub state: PresenceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

// --- Shared Memory ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryValueKind {
    Text,
    Json,
    EmbeddingReference,
    BlobReference,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub kind: MemoryValueKind,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<i64>,
    pub access_count: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct MemorySet {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MemoryQuery {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_sort() -> String {
    "updated_at".to_string()
}

fn default_limit() -> usize {
    50
}

// --- Activity ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    Discovery,
    Question,
    Alert,
    Custom,
    Join,
    Leave,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityScope {
    Fleet,
    Tagged { tags: Vec<String> },
    Direct { agent: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityEvent {
    pub id: String,
    pub fleet: String,
    pub origin: String,
    pub kind: ActivityKind,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ActivityScope>,
}

// --- Direct Messages ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmDeliveryState {
    Delivered,
    Queued,
    Dropped,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirectMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: String,
    pub state: DmDeliveryState,
}

// --- Tasks ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Claimed,
    Running,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Task {
    pub id: String,
    pub fleet: String,
    pub requester: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<String>,
    pub ttl_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTask {
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(default = "default_task_ttl")]
    pub ttl_secs: i64,
}

fn default_task_ttl() -> i64 {
    300
}

/// Per-agent stats the task router consults when scoring candidates.
#[derive(Debug, Clone, Default)]
pub struct AgentTaskStats {
    pub load: f64,
    pub mean_latency_ms_by_type: HashMap<String, f64>,
    pub success_rate_by_type: HashMap<String, f64>,
    pub cost: f64,
    pub last_assigned_at: i64,
}

// --- Groups ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Squad,
    Pod,
    Channel,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Dissolved,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    pub id: String,
    pub fleet: String,
    pub name: String,
    pub kind: GroupKind,
    pub status: GroupStatus,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupMember {
    pub group_id: String,
    pub agent: String,
    pub role: GroupRole,
}

// --- Audit ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditRecord {
    pub id: String,
    pub tenant: String,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub created_at: String,
}

/// Durable retention window for audit records, independent of tenant plan.
pub const AUDIT_RETENTION_DAYS: i64 = 365;
