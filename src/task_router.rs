//! Task Router (spec §4.5, C5): capability-filtered, weighted-score
//! assignment of submitted tasks to one online, capable agent, with
//! anti-starvation tie-breaking and reassignment on missed claim grace.

use crate::models::{AgentTaskStats, PresenceEntry, PresenceState, Task, TaskStatus};
use std::collections::HashMap;

/// A candidate under consideration, bundling its presence snapshot with the
/// router's own bookkeeping of its recent task performance.
pub struct Candidate<'a> {
    pub presence: &'a PresenceEntry,
    pub stats: &'a AgentTaskStats,
}

const WEIGHT_STATE_FIT: f64 = 0.30;
const WEIGHT_LOAD: f64 = 0.25;
const WEIGHT_LATENCY: f64 = 0.20;
const WEIGHT_SUCCESS_RATE: f64 = 0.15;
const WEIGHT_COST: f64 = 0.10;

/// Ranks `candidates` (agents whose capability set is already known to be a
/// superset of the task's requirements) and returns the winning agent id,
/// or `None` if the candidate list is empty.
pub fn select_assignee(candidates: &[Candidate], task_type: &str) -> Option<String> {
    candidates
        .iter()
        .filter(|c| c.presence.state != PresenceState::Away)
        .max_by(|a, b| {
            let score_a = score(a, task_type);
            let score_b = score(b, task_type);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.stats.last_assigned_at.cmp(&a.stats.last_assigned_at).reverse())
        })
        .map(|c| c.presence.agent.clone())
}

fn score(c: &Candidate, task_type: &str) -> f64 {
    let state_fit = state_fit_score(c.presence.state.clone(), c.stats.load);
    let load_score = (1.0 - c.stats.load).clamp(0.0, 1.0);
    let latency = c
        .stats
        .mean_latency_ms_by_type
        .get(task_type)
        .copied()
        .unwrap_or(0.0);
    let latency_score = 1.0 / (1.0 + latency / 1000.0);
    let success_rate = c
        .stats
        .success_rate_by_type
        .get(task_type)
        .copied()
        .unwrap_or(0.5);
    let cost_score = (1.0 - c.stats.cost).clamp(0.0, 1.0);

    WEIGHT_STATE_FIT * state_fit
        + WEIGHT_LOAD * load_score
        + WEIGHT_LATENCY * latency_score
        + WEIGHT_SUCCESS_RATE * success_rate
        + WEIGHT_COST * cost_score
}

fn state_fit_score(state: PresenceState, load: f64) -> f64 {
    match state {
        PresenceState::Online => 1.0,
        PresenceState::Busy if load < 0.8 => 0.6,
        PresenceState::Busy => 0.1,
        PresenceState::Away => 0.0,
    }
}

/// Filters `roster` to agents whose `capabilities` are a superset of
/// `required`.
pub fn capable_agents<'a>(roster: &'a [PresenceEntry], required: &[String]) -> Vec<&'a PresenceEntry> {
    roster
        .iter()
        .filter(|p| required.iter().all(|r| p.capabilities.contains(r)))
        .collect()
}

/// In-memory per-agent task performance stats the router scores against.
/// Not persisted: recomputed from completed/failed task history as it
/// accrues during the process lifetime.
#[derive(Default)]
pub struct TaskStatsIndex {
    stats: HashMap<String, AgentTaskStats>,
}

impl TaskStatsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent: &str) -> AgentTaskStats {
        self.stats.get(agent).cloned().unwrap_or_default()
    }

    pub fn record_assignment(&mut self, agent: &str, assigned_at: i64) {
        let stats = self.stats.entry(agent.to_string()).or_default();
        stats.load += 1.0;
        stats.last_assigned_at = assigned_at;
    }

    pub fn record_completion(&mut self, agent: &str, task_type: &str, latency_ms: f64, success: bool) {
        let stats = self.stats.entry(agent.to_string()).or_default();
        stats.load = (stats.load - 1.0).max(0.0);
        let prev_latency = *stats.mean_latency_ms_by_type.get(task_type).unwrap_or(&latency_ms);
        stats
            .mean_latency_ms_by_type
            .insert(task_type.to_string(), (prev_latency + latency_ms) / 2.0);
        let prev_rate = *stats.success_rate_by_type.get(task_type).unwrap_or(&0.5);
        let observed = if success { 1.0 } else { 0.0 };
        stats
            .success_rate_by_type
            .insert(task_type.to_string(), (prev_rate * 0.8) + (observed * 0.2));
    }
}

/// Determines whether a task parked past its TTL without being claimed
/// should transition to `failed` (spec §4.5 "no_capable_agent").
pub fn is_ttl_expired(task: &Task, created_at_epoch: i64, now_epoch: i64) -> bool {
    task.status == TaskStatus::Pending && now_epoch - created_at_epoch >= task.ttl_secs
}

/// Determines whether an assigned-but-unclaimed task has exceeded the claim
/// grace period and should be reassigned (spec §4.5, §5 "Task claim grace").
pub fn is_claim_grace_expired(assigned_at_epoch: i64, now_epoch: i64, claim_grace_secs: i64) -> bool {
    now_epoch - assigned_at_epoch >= claim_grace_secs
}

#[cfg(test)]
#[path = "task_router_tests.rs"]
mod tests;
