//! Wire envelope shape (spec §6.1) and the strict size/shape validation
//! performed on every inbound frame before it reaches a handler family.

use serde::{Deserialize, Serialize};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[1];

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "ref", default)]
    pub r#ref: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
    pub payload: serde_json::Value,
}

impl OutEnvelope {
    pub fn event(kind: &str, action: &str, payload: serde_json::Value) -> Self {
        OutEnvelope {
            kind: kind.to_string(),
            action: Some(action.to_string()),
            r#ref: None,
            payload,
        }
    }

    pub fn reply(kind: &str, action: &str, r#ref: Option<String>, payload: serde_json::Value) -> Self {
        OutEnvelope {
            kind: kind.to_string(),
            action: Some(action.to_string()),
            r#ref,
            payload,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Parses and size-checks a raw inbound text frame. A frame over
/// `max_frame_bytes` is rejected before JSON parsing is even attempted
/// (spec §4.1 "fatal on breach -> close with payload_too_large").
pub fn parse_frame(raw: &str, max_frame_bytes: usize) -> Result<Envelope, crate::error::RingError> {
    if raw.len() > max_frame_bytes {
        return Err(crate::error::RingError::PayloadTooLarge);
    }
    serde_json::from_str::<Envelope>(raw)
        .map_err(|e| crate::error::RingError::InvalidMessage(format!("malformed envelope: {e}")))
}

pub const HANDLER_FAMILIES: &[&str] = &[
    "auth", "presence", "activity", "memory", "file", "replay", "direct", "task", "group", "system", "error",
];

pub fn is_known_family(kind: &str) -> bool {
    HANDLER_FAMILIES.contains(&kind)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
