//! Error taxonomy (spec §7). A single enum maps each kind to both an HTTP
//! status, for the control plane, and a wire envelope code, for the gateway.

use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use std::fmt;

#[derive(Debug, Clone)]
pub enum RingError {
    InvalidMessage(String),
    Unauthorized(String),
    Forbidden,
    NotFound(String),
    Conflict(String),
    QuotaExceeded { retry_after_ms: Option<u64> },
    RateLimited { retry_after_ms: u64 },
    PayloadTooLarge,
    ServerError(String),
    Unavailable(String),
}

impl RingError {
    /// Wire envelope error code (spec §6.1).
    pub fn code(&self) -> &'static str {
        match self {
            RingError::InvalidMessage(_) => "invalid_message",
            RingError::Unauthorized(_) => "unauthorized",
            RingError::Forbidden => "forbidden",
            RingError::NotFound(_) => "not_found",
            RingError::Conflict(_) => "conflict",
            RingError::QuotaExceeded { .. } => "quota_exceeded",
            RingError::RateLimited { .. } => "rate_limited",
            RingError::PayloadTooLarge => "payload_too_large",
            RingError::ServerError(_) => "server_error",
            RingError::Unavailable(_) => "unavailable",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            RingError::InvalidMessage(_) => Status::BadRequest,
            RingError::Unauthorized(_) => Status::Unauthorized,
            RingError::Forbidden => Status::Forbidden,
            RingError::NotFound(_) => Status::NotFound,
            RingError::Conflict(_) => Status::Conflict,
            RingError::QuotaExceeded { .. } => Status::TooManyRequests,
            RingError::RateLimited { .. } => Status::TooManyRequests,
            RingError::PayloadTooLarge => Status::PayloadTooLarge,
            RingError::ServerError(_) => Status::InternalServerError,
            RingError::Unavailable(_) => Status::ServiceUnavailable,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RingError::InvalidMessage(m) => m.clone(),
            RingError::Unauthorized(m) => m.clone(),
            RingError::Forbidden => "forbidden".to_string(),
            RingError::NotFound(m) => m.clone(),
            RingError::Conflict(m) => m.clone(),
            RingError::QuotaExceeded { .. } => "quota exceeded".to_string(),
            RingError::RateLimited { .. } => "rate limited".to_string(),
            RingError::PayloadTooLarge => "payload too large".to_string(),
            RingError::ServerError(m) => m.clone(),
            RingError::Unavailable(m) => m.clone(),
        }
    }

    /// Build the server-originated wire envelope for this error (spec §6.1),
    /// echoing `ref` when the triggering request carried one.
    pub fn to_envelope(&self, r#ref: Option<&str>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "type": "error",
            "payload": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        if let Some(ms) = self.retry_after_ms() {
            body["payload"]["retry_after_ms"] = serde_json::json!(ms);
        }
        if let Some(r) = r#ref {
            body["ref"] = serde_json::json!(r);
        }
        body
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            RingError::QuotaExceeded { retry_after_ms } => *retry_after_ms,
            RingError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for RingError {}

/// HTTP responder for the control plane: renders the same JSON error body
/// shape the teacher used for its rate-limit/not-found responses.
impl<'r, 'o: 'r> Responder<'r, 'o> for RingError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "error": self.message(),
            "code": self.code(),
            "retry_after_ms": self.retry_after_ms(),
        }));
        Response::build_from(body.respond_to(req)?)
            .status(self.status())
            .ok()
    }
}

pub type RingResult<T> = Result<T, RingError>;
