use super::*;

fn submit(store: &TaskStore) -> Task {
    store.submit(
        "fleet-a",
        "requester-1",
        &SubmitTask {
            required_capabilities: vec!["python".into()],
            task_type: "lint".into(),
            payload: serde_json::json!({}),
            ttl_secs: 300,
        },
    )
}

#[test]
fn submitted_tasks_start_pending_and_are_retrievable() {
    let store = TaskStore::new();
    let task = submit(&store);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(store.get("fleet-a", &task.id).unwrap().status, TaskStatus::Pending);
}

#[test]
fn claim_only_succeeds_for_the_assigned_agent() {
    let store = TaskStore::new();
    let task = submit(&store);
    store.assign("fleet-a", &task.id, "agent-1").unwrap();

    assert!(store.claim("fleet-a", &task.id, "agent-2").is_none());
    let claimed = store.claim("fleet-a", &task.id, "agent-1").unwrap();
    assert_eq!(claimed.status, TaskStatus::Claimed);
}

#[test]
fn complete_records_a_result_and_terminal_status() {
    let store = TaskStore::new();
    let task = submit(&store);
    store.assign("fleet-a", &task.id, "agent-1").unwrap();
    store.claim("fleet-a", &task.id, "agent-1").unwrap();
    let done = store.complete("fleet-a", &task.id, serde_json::json!({"ok": true})).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(serde_json::json!({"ok": true})));
}

#[test]
fn in_flight_excludes_terminal_tasks() {
    let store = TaskStore::new();
    let pending = submit(&store);
    let assigned = submit(&store);
    store.assign("fleet-a", &assigned.id, "agent-1").unwrap();
    let completed = submit(&store);
    store.assign("fleet-a", &completed.id, "agent-1").unwrap();
    store.complete("fleet-a", &completed.id, serde_json::json!({})).unwrap();

    let in_flight: Vec<String> = store.in_flight("fleet-a").into_iter().map(|t| t.id).collect();
    assert!(in_flight.contains(&pending.id));
    assert!(in_flight.contains(&assigned.id));
    assert!(!in_flight.contains(&completed.id));
}

#[test]
fn mark_no_capable_agent_fails_the_task_with_a_reason() {
    let store = TaskStore::new();
    let task = submit(&store);
    let failed = store.mark_no_capable_agent("fleet-a", &task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.reason.as_deref(), Some("no_capable_agent"));
}

#[test]
fn requeue_resets_an_assigned_task_back_to_pending() {
    let store = TaskStore::new();
    let task = submit(&store);
    let assigned = store.assign("fleet-a", &task.id, "agent-1").unwrap();
    assert!(assigned.assigned_at.is_some());

    let requeued = store.requeue("fleet-a", &task.id).unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.assigned_agent.is_none());
    assert!(requeued.assigned_at.is_none());
}

#[test]
fn fleets_lists_every_fleet_with_a_submitted_task() {
    let store = TaskStore::new();
    submit(&store);
    assert_eq!(store.fleets(), vec!["fleet-a".to_string()]);
}
