//! Per-connection session state machine (spec §4.1): `New -> AwaitingAuth
//! -> Active -> Closed`, plus the connection registry every gateway route
//! consults to route outbound frames. Grounded on `ConnectedClient` /
//! `GatewayState` from the reference gateway-state file: an outbound
//! `mpsc::UnboundedSender<String>` per connection, touched on activity,
//! looked up by id in a `RwLock<HashMap<..>>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    AwaitingAuth,
    Active,
    Closed,
}

impl SessionState {
    /// Enforces the one-directional state machine (spec §4.1): no state
    /// may be re-entered once left.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::New, SessionState::AwaitingAuth)
                | (SessionState::New, SessionState::Closed)
                | (SessionState::AwaitingAuth, SessionState::Active)
                | (SessionState::AwaitingAuth, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        )
    }
}

pub struct ConnectedSession {
    pub conn_id: String,
    pub tenant: String,
    pub fleet: String,
    pub agent: String,
    pub client_addr: String,
    pub protocol_version: u32,
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub missed_pongs: u32,
    state: SessionState,
}

impl ConnectedSession {
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.missed_pongs = 0;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), crate::error::RingError> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::RingError::ServerError(format!(
                "illegal session transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// All live sessions for the process, keyed by connection id. Looking up
/// "who's connected for agent X in fleet Y" walks the small per-fleet set,
/// which stays small relative to total connections.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ConnectedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn_id: String, tenant: &str, fleet: &str, agent: &str, client_addr: &str, protocol_version: u32, sender: mpsc::UnboundedSender<String>) {
        let now = Instant::now();
        let session = ConnectedSession {
            conn_id: conn_id.clone(),
            tenant: tenant.to_string(),
            fleet: fleet.to_string(),
            agent: agent.to_string(),
            client_addr: client_addr.to_string(),
            protocol_version,
            sender,
            connected_at: now,
            last_activity: now,
            missed_pongs: 0,
            state: SessionState::AwaitingAuth,
        };
        self.sessions.write().await.insert(conn_id, session);
    }

    pub async fn remove(&self, conn_id: &str) -> Option<ConnectedSession> {
        self.sessions.write().await.remove(conn_id)
    }

    pub async fn touch(&self, conn_id: &str) {
        if let Some(s) = self.sessions.write().await.get_mut(conn_id) {
            s.touch();
        }
    }

    pub async fn set_state(&self, conn_id: &str, next: SessionState) -> Result<(), crate::error::RingError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(conn_id)
            .ok_or_else(|| crate::error::RingError::NotFound("no such session".into()))?;
        session.transition(next)
    }

    /// Sends a frame to every active session for `agent` in `fleet`
    /// (spec §4.5 direct messaging fan-out across multi-connect agents).
    pub async fn send_to_agent(&self, fleet: &str, agent: &str, frame: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.fleet == fleet && s.agent == agent && s.state() == SessionState::Active)
            .filter(|s| s.send(frame))
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Finds sessions that have missed too many heartbeats and should be
    /// force-closed (spec §4.1: 3 missed pings over 90s).
    pub async fn stale_connections(&self, missed_limit: u32) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.missed_pongs >= missed_limit)
            .map(|s| s.conn_id.clone())
            .collect()
    }

    pub async fn record_missed_pong(&self, conn_id: &str) {
        if let Some(s) = self.sessions.write().await.get_mut(conn_id) {
            s.missed_pongs += 1;
        }
    }
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
