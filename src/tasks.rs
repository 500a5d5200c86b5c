//! Task store (spec §4.5, C5): holds the live (non-terminal and recently
//! terminal) tasks for each fleet so the gateway can look one up by id when
//! an agent claims, completes, or fails it. Mirrors `PresenceIndex`'s
//! `fleet -> id -> value` nesting.

use crate::models::{SubmitTask, Task, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct TaskStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, Task>>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, fleet: &str, requester: &str, req: &SubmitTask) -> Task {
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            fleet: fleet.to_string(),
            requester: requester.to_string(),
            required_capabilities: req.required_capabilities.clone(),
            task_type: req.task_type.clone(),
            payload: req.payload.clone(),
            assigned_agent: None,
            status: TaskStatus::Pending,
            result: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            ttl_secs: req.ttl_secs,
            reason: None,
        };
        let mut fleets = self.inner.write().unwrap_or_else(|e| e.into_inner());
        fleets.entry(fleet.to_string()).or_default().insert(task.id.clone(), task.clone());
        task
    }

    pub fn get(&self, fleet: &str, id: &str) -> Option<Task> {
        let fleets = self.inner.read().unwrap_or_else(|e| e.into_inner());
        fleets.get(fleet)?.get(id).cloned()
    }

    pub fn assign(&self, fleet: &str, id: &str, agent: &str) -> Option<Task> {
        self.update(fleet, id, |t| {
            t.status = TaskStatus::Assigned;
            t.assigned_agent = Some(agent.to_string());
            t.assigned_at = Some(chrono::Utc::now().to_rfc3339());
        })
    }

    /// Resets a task back to `pending` so it can be re-routed, either
    /// because its claim grace expired or a fresh presence change makes a
    /// better candidate available.
    pub fn requeue(&self, fleet: &str, id: &str) -> Option<Task> {
        self.update(fleet, id, |t| {
            t.status = TaskStatus::Pending;
            t.assigned_agent = None;
            t.assigned_at = None;
        })
    }

    pub fn mark_no_capable_agent(&self, fleet: &str, id: &str) -> Option<Task> {
        self.update(fleet, id, |t| {
            t.status = TaskStatus::Failed;
            t.reason = Some("no_capable_agent".to_string());
        })
    }

    /// Transitions a task to `claimed` if the claiming agent is the one it
    /// was assigned to. Returns `None` on any mismatch (unknown task, not
    /// assigned to this agent, or already past the assigned state).
    pub fn claim(&self, fleet: &str, id: &str, agent: &str) -> Option<Task> {
        let mut fleets = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let task = fleets.get_mut(fleet)?.get_mut(id)?;
        if task.status != TaskStatus::Assigned || task.assigned_agent.as_deref() != Some(agent) {
            return None;
        }
        task.status = TaskStatus::Claimed;
        Some(task.clone())
    }

    pub fn start(&self, fleet: &str, id: &str) -> Option<Task> {
        self.update(fleet, id, |t| t.status = TaskStatus::Running)
    }

    pub fn complete(&self, fleet: &str, id: &str, result: serde_json::Value) -> Option<Task> {
        self.update(fleet, id, |t| {
            t.status = TaskStatus::Completed;
            t.result = Some(result.clone());
        })
    }

    pub fn fail(&self, fleet: &str, id: &str, reason: String) -> Option<Task> {
        self.update(fleet, id, |t| {
            t.status = TaskStatus::Failed;
            t.reason = Some(reason.clone());
        })
    }

    pub fn timeout(&self, fleet: &str, id: &str) -> Option<Task> {
        self.update(fleet, id, |t| t.status = TaskStatus::Timeout)
    }

    /// Returns tasks still pending or assigned, for TTL/claim-grace sweeps.
    pub fn in_flight(&self, fleet: &str) -> Vec<Task> {
        let fleets = self.inner.read().unwrap_or_else(|e| e.into_inner());
        fleets
            .get(fleet)
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Assigned))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every fleet id with at least one task ever submitted, for sweeps
    /// that must enumerate fleets without a connection to hang them off.
    pub fn fleets(&self) -> Vec<String> {
        let fleets = self.inner.read().unwrap_or_else(|e| e.into_inner());
        fleets.keys().cloned().collect()
    }

    fn update(&self, fleet: &str, id: &str, f: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut fleets = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let task = fleets.get_mut(fleet)?.get_mut(id)?;
        f(task);
        Some(task.clone())
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
