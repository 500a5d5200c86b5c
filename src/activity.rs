//! Activity broadcasts (spec §4.2/§3, part of C2 fleet routing): every
//! `ActivityEvent` carries an optional scope restricting who should receive
//! it. Grounded on the teacher's `broadcast_message` validation style
//! (`routes/broadcast.rs`), generalized from "deliver to N rooms" to
//! "deliver to whichever agents match this event's scope."

use crate::models::{ActivityEvent, ActivityScope, PresenceEntry};

/// Returns true if `event` should be delivered to `candidate`, given the
/// event's scope (spec §3's ActivityScope: `fleet | tagged(tags) | direct(agent)`).
pub fn matches_scope(event: &ActivityEvent, candidate: &PresenceEntry) -> bool {
    match &event.scope {
        None | Some(ActivityScope::Fleet) => true,
        Some(ActivityScope::Tagged { tags }) => {
            tags.iter().any(|t| candidate.capabilities.contains(t))
        }
        Some(ActivityScope::Direct { agent }) => agent == &candidate.agent,
    }
}

/// Validates an inbound activity broadcast the way the teacher validates
/// `BroadcastMessage` (trimmed, bounded lengths) before it reaches the
/// event log or the fleet bus.
pub fn validate_description(description: &str) -> Result<String, String> {
    let trimmed = description.trim().to_string();
    if trimmed.is_empty() {
        return Err("description must not be empty".to_string());
    }
    if trimmed.len() > 10_000 {
        return Err("description must be at most 10000 characters".to_string());
    }
    Ok(trimmed)
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
