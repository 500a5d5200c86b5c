//! Shared scaffolding for the WebSocket gateway integration suites. Unlike
//! the control-plane suites, these need a real TCP listener since
//! `rocket::local::blocking::Client` can't drive a WebSocket upgrade —
//! every test here launches the full `Rocket` instance on a loopback port
//! and drives it with a genuine `tokio-tungstenite` client, the same shape
//! as a real agent connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use ringforge::config::RingConfig;
use ringforge::db::Db;
use ringforge::gateway::auth;
use ringforge::models::{CreateTenant, MintKeyRequest};

pub const PLATFORM_ADMIN_KEY: &str = "test-platform-admin-key";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_PORT: AtomicU16 = AtomicU16::new(18300);
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Owns the temp database backing a launched gateway; the DB file and its
/// WAL/SHM siblings are removed once the test's `GatewayServer` drops.
pub struct GatewayServer {
    pub addr: SocketAddr,
    pub db_path: String,
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        if let Some((stem, ext)) = self.db_path.rsplit_once('.') {
            let events_path = format!("{stem}-events.{ext}");
            let _ = std::fs::remove_file(&events_path);
            let _ = std::fs::remove_file(format!("{events_path}-wal"));
            let _ = std::fs::remove_file(format!("{events_path}-shm"));
        }
    }
}

/// Launches the gateway with `configure` applied to its `RingConfig`, on a
/// dedicated loopback port. The caller's remaining tokio runtime lifetime
/// owns the spawned server task — it's torn down when the test's runtime
/// drops at the end of `#[tokio::test]`.
pub async fn spawn_gateway(configure: impl FnOnce(&mut RingConfig)) -> GatewayServer {
    let db_path = format!(
        "/tmp/ringforge_test_ws_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);

    let rocket = {
        // Rocket's default figment reads ROCKET_* env vars at the moment
        // `rocket::build()` runs inside `rocket_with_config`; serialize
        // that window so concurrently-running tests can't steal each
        // other's port.
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("ROCKET_PORT", port.to_string());
        std::env::set_var("ROCKET_ADDRESS", "127.0.0.1");
        std::env::set_var("ROCKET_LOG_LEVEL", "off");

        let mut config = RingConfig {
            database_path: db_path.clone(),
            platform_admin_key: PLATFORM_ADMIN_KEY.to_string(),
            // A loopback test run reuses one source address across every
            // connection it opens, which would otherwise trip the auth
            // rate limiter long before any scenario-specific one does.
            auth_attempts_max: 10_000,
            ..RingConfig::default()
        };
        configure(&mut config);
        ringforge::rocket_with_config(config)
    };

    tokio::spawn(async move {
        let _ = rocket.launch().await;
    });
    // Give the listener a moment to bind before the first connect attempt.
    tokio::time::sleep(Duration::from_millis(150)).await;

    GatewayServer {
        addr: format!("127.0.0.1:{port}").parse().unwrap(),
        db_path,
    }
}

/// Bootstraps a tenant, a fleet, and a `live` API key directly against the
/// gateway's own database file, mirroring `bootstrap_admin_key`'s rationale
/// in the control-plane suite: minting a tenant's first credential has no
/// HTTP route to call it through.
pub fn setup_fleet(gw: &GatewayServer, tenant: &str, fleet_name: &str, plan: &str, scoped: bool) -> (String, String) {
    let db = Db::new(&gw.db_path);
    db.create_tenant(&CreateTenant {
        id: tenant.to_string(),
        plan: plan.to_string(),
        email: None,
    })
    .expect("create tenant");
    let fleet = db.create_fleet(tenant, fleet_name).expect("create fleet");
    let minted = auth::mint_key(
        &db,
        tenant,
        &MintKeyRequest {
            key_type: "live".to_string(),
            fleet: if scoped { Some(fleet.id.clone()) } else { None },
            expires_in_days: None,
        },
    )
    .expect("mint agent key");
    (fleet.id, minted.secret)
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
pub type WsRx = futures_util::stream::SplitStream<WsStream>;

pub async fn ws_connect(addr: &SocketAddr, tenant: &str, fleet: &str) -> Result<(WsTx, WsRx), tokio_tungstenite::tungstenite::Error> {
    let url = format!("ws://{addr}/v1/gateway/{tenant}/{fleet}");
    let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
    Ok(stream.split())
}

pub async fn ws_send(tx: &mut WsTx, value: &serde_json::Value) {
    tx.send(WsMessage::Text(value.to_string().into())).await.expect("ws send");
}

pub async fn ws_recv(rx: &mut WsRx) -> serde_json::Value {
    let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
        .await
        .expect("ws recv timeout")
        .expect("ws stream closed")
        .expect("ws recv error");
    match msg {
        WsMessage::Text(text) => serde_json::from_str(&text).expect("non-JSON frame"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Reads frames until one matches `(kind, action)`, discarding everything
/// else (pings, quota warnings, unrelated pushes) along the way.
pub async fn ws_recv_until(rx: &mut WsRx, kind: &str, action: &str) -> serde_json::Value {
    loop {
        let frame = ws_recv(rx).await;
        if frame.get("type").and_then(|v| v.as_str()) == Some(kind) && frame.get("action").and_then(|v| v.as_str()) == Some(action) {
            return frame;
        }
    }
}

/// Drives the handshake: consumes the `auth_required` push, sends the auth
/// envelope, and waits for the `auth ok` reply (or whatever terminal error
/// frame the server sends instead).
pub async fn ws_authenticate(tx: &mut WsTx, rx: &mut WsRx, key: &str, agent: &str) -> serde_json::Value {
    let _ = ws_recv_until(rx, "system", "auth_required").await;
    ws_send(tx, &serde_json::json!({"type": "auth", "payload": {"key": key, "agent": agent}})).await;
    loop {
        let frame = ws_recv(rx).await;
        let kind = frame.get("type").and_then(|v| v.as_str());
        if kind == Some("auth") || kind == Some("error") {
            return frame;
        }
    }
}
