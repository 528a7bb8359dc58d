//! Concurrency policy (§6) and resource-usage windows (§4.6 step 1-2).

use std::collections::HashMap;

use aow_core::ParallelizationRules;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_max_tokens_per_minute")]
    pub max_tokens_per_minute: u64,
    #[serde(default = "default_max_cost_per_hour")]
    pub max_cost_per_hour: f64,
    #[serde(default = "default_max_concurrent_api_calls")]
    pub max_concurrent_api_calls: u32,
}

fn default_max_tokens_per_minute() -> u64 {
    100_000
}

fn default_max_cost_per_hour() -> f64 {
    10.0
}

fn default_max_concurrent_api_calls() -> u32 {
    10
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_tokens_per_minute: default_max_tokens_per_minute(),
            max_cost_per_hour: default_max_cost_per_hour(),
            max_concurrent_api_calls: default_max_concurrent_api_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyPolicy {
    #[serde(default = "default_max_total_agents")]
    pub max_total_agents: u32,
    #[serde(default = "default_max_per_type")]
    pub max_per_type: HashMap<String, u32>,
    #[serde(default = "default_conflict_matrix")]
    pub conflict_matrix: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

fn default_max_total_agents() -> u32 {
    10
}

fn default_max_per_type() -> HashMap<String, u32> {
    HashMap::from([
        ("planner".to_string(), 3),
        ("executor".to_string(), 5),
        ("analyst".to_string(), 3),
        ("observer".to_string(), 5),
        ("arbiter".to_string(), 1),
        ("archivist".to_string(), 2),
    ])
}

fn default_conflict_matrix() -> HashMap<String, Vec<String>> {
    HashMap::from([
        ("arbiter".to_string(), vec!["arbiter".to_string()]),
        ("planner".to_string(), vec!["planner".to_string()]),
    ])
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            max_total_agents: default_max_total_agents(),
            max_per_type: default_max_per_type(),
            conflict_matrix: default_conflict_matrix(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl ConcurrencyPolicy {
    pub fn max_per_type_for(&self, aat_id: &str) -> u32 {
        self.max_per_type.get(aat_id).copied().unwrap_or(self.max_total_agents)
    }

    pub fn conflicts_for(&self, aat_id: &str) -> &[String] {
        self.conflict_matrix.get(aat_id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// `canSpawn(A)` (§4.6 step 3): evaluated against the live active-count
/// snapshot rather than held state, so it stays a pure function of its
/// inputs and is cheap to unit test independent of the agent pool.
pub fn can_spawn(
    aat_id: &str,
    rules: &ParallelizationRules,
    policy: &ConcurrencyPolicy,
    active_counts: &HashMap<String, u32>,
) -> Result<(), String> {
    let active_here = active_counts.get(aat_id).copied().unwrap_or(0);

    if !rules.parallelizable && active_here > 0 {
        return Err(format!("'{}' is not parallelizable and already has an active instance", aat_id));
    }

    let cap = rules.max_concurrent.min(policy.max_per_type_for(aat_id));
    if active_here >= cap {
        return Err(format!("'{}' is at its concurrency cap ({})", aat_id, cap));
    }

    let total_active: u32 = active_counts.values().sum();
    if total_active >= policy.max_total_agents {
        return Err("global agent cap reached".to_string());
    }

    for conflict in &rules.conflicts_with {
        if active_counts.get(conflict).copied().unwrap_or(0) > 0 {
            return Err(format!("'{}' conflicts with active archetype '{}'", aat_id, conflict));
        }
    }
    for conflict in policy.conflicts_for(aat_id) {
        if active_counts.get(conflict).copied().unwrap_or(0) > 0 {
            return Err(format!("'{}' conflicts with active archetype '{}' per policy matrix", aat_id, conflict));
        }
    }

    Ok(())
}

struct ResourceWindowState {
    minute_started_at: DateTime<Utc>,
    tokens_this_minute: u64,
    hour_started_at: DateTime<Utc>,
    cost_this_hour: f64,
    active_api_calls: u32,
}

/// Windowed counters for tokens-per-minute, cost-per-hour, and concurrent
/// API calls (§5 resource counters: "atomic increments; windowed reset").
pub struct ResourceWindow {
    state: Mutex<ResourceWindowState>,
}

impl ResourceWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ResourceWindowState {
                minute_started_at: now,
                tokens_this_minute: 0,
                hour_started_at: now,
                cost_this_hour: 0.0,
                active_api_calls: 0,
            }),
        }
    }

    /// §4.6 step 1: reset per-minute/per-hour counters when their window expires.
    pub fn refresh(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if now - state.minute_started_at >= Duration::minutes(1) {
            state.tokens_this_minute = 0;
            state.minute_started_at = now;
        }
        if now - state.hour_started_at >= Duration::hours(1) {
            state.cost_this_hour = 0.0;
            state.hour_started_at = now;
        }
    }

    pub fn record_tokens(&self, tokens: u64) {
        self.state.lock().tokens_this_minute += tokens;
    }

    pub fn record_cost(&self, cost: f64) {
        self.state.lock().cost_this_hour += cost;
    }

    pub fn begin_api_call(&self) {
        self.state.lock().active_api_calls += 1;
    }

    pub fn end_api_call(&self) {
        let mut state = self.state.lock();
        state.active_api_calls = state.active_api_calls.saturating_sub(1);
    }

    /// §4.6 step 2: the resource gate.
    pub fn is_exhausted(&self, limits: &ResourceLimits) -> bool {
        let state = self.state.lock();
        state.tokens_this_minute >= limits.max_tokens_per_minute
            || state.cost_this_hour >= limits.max_cost_per_hour
            || state.active_api_calls >= limits.max_concurrent_api_calls
    }
}
