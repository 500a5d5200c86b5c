use super::*;
use crate::models::{ActivityKind, PresenceState};

fn candidate(agent: &str, capabilities: Vec<&str>) -> PresenceEntry {
    PresenceEntry {
        agent: agent.to_string(),
        name: agent.to_string(),
        state: PresenceState::Online,
        task: None,
        capabilities: capabilities.into_iter().map(String::from).collect(),
    }
}

fn event(scope: Option<ActivityScope>) -> ActivityEvent {
    ActivityEvent {
        id: "evt-1".to_string(),
        fleet: "fleet-a".to_string(),
        origin: "agent-1".to_string(),
        kind: ActivityKind::Discovery,
        description: "found something".to_string(),
        tags: vec![],
        data: serde_json::json!({}),
        timestamp: chrono::Utc::now().to_rfc3339(),
        scope,
    }
}

#[test]
fn unscoped_event_reaches_everyone() {
    let e = event(None);
    assert!(matches_scope(&e, &candidate("agent-2", vec![])));
}

#[test]
fn tagged_scope_requires_a_matching_capability() {
    let e = event(Some(ActivityScope::Tagged { tags: vec!["search".to_string()] }));
    assert!(matches_scope(&e, &candidate("agent-2", vec!["search"])));
    assert!(!matches_scope(&e, &candidate("agent-3", vec!["code"])));
}

#[test]
fn direct_scope_only_matches_the_named_agent() {
    let e = event(Some(ActivityScope::Direct { agent: "agent-2".to_string() }));
    assert!(matches_scope(&e, &candidate("agent-2", vec![])));
    assert!(!matches_scope(&e, &candidate("agent-3", vec![])));
}

#[test]
fn description_validation_rejects_blank_input() {
    assert!(validate_description("   ").is_err());
    assert!(validate_description("hello").is_ok());
}
