//! The real-time gateway (spec §4, §5, §6.1): the WebSocket transport
//! agents connect to, the per-connection session machinery, and the wire
//! protocol and auth primitives it all rests on.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod ws;

use rocket::request::{FromRequest, Outcome, Request};

/// The agent's observed source address, trusting `X-Forwarded-For` ahead of
/// the socket peer the way the teacher's `ClientIp` guard does.
pub struct ClientAddr(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientAddr {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientAddr(ip))
    }
}
