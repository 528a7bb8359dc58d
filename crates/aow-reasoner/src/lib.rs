//! Reasoner collaborator (§6) implementations.
//!
//! The reasoning backend itself — the LLM, the planner model, whatever
//! proposes actions — is an external collaborator the core consumes through
//! the `Reasoner` trait. This crate ships two concrete, deterministic
//! implementations so the rest of the workspace is runnable and testable
//! without a live model: `EchoReasoner`, which always picks the first
//! enabled affordance, and `ScriptedReasoner`, which replays a fixed queue
//! of decisions (used to script end-to-end scenario tests).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aow_core::{AowError, AowResult, ContextView, Decision, Reasoner, Task, ToolRunOutcome};

/// Always selects the first enabled affordance with empty parameters.
/// Useful as a default reasoner in tests that only care about the
/// traversal mechanics, not the decision content.
#[derive(Debug, Default)]
pub struct EchoReasoner;

#[async_trait]
impl Reasoner for EchoReasoner {
    async fn reason_about_context(
        &self,
        _system_prompt: &str,
        view: &ContextView,
        _task: &Task,
        _previous_actions: &[Decision],
    ) -> AowResult<Decision> {
        match view.enabled_affordances().next() {
            Some(affordance) => Ok(Decision::traverse(
                affordance.id.clone(),
                "selecting the first enabled affordance",
            )),
            None => Ok(Decision::refusal("no enabled affordances to select from")),
        }
    }
}

/// Replays a fixed, ordered queue of decisions regardless of the context it
/// is asked about; once exhausted, returns a refusal. Lets tests script an
/// exact sequence of Agent Runtime iterations.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    queue: Mutex<Vec<Decision>>,
    tool_outcomes: Mutex<Vec<ToolRunOutcome>>,
}

impl ScriptedReasoner {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self { queue: Mutex::new(decisions), tool_outcomes: Mutex::new(Vec::new()) }
    }

    pub fn with_tool_outcomes(self, outcomes: Vec<ToolRunOutcome>) -> Self {
        *self.tool_outcomes.lock().unwrap() = outcomes;
        self
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason_about_context(
        &self,
        _system_prompt: &str,
        _view: &ContextView,
        _task: &Task,
        _previous_actions: &[Decision],
    ) -> AowResult<Decision> {
        let mut queue = self.queue.lock().map_err(|_| AowError::reasoner_failure("poisoned lock"))?;
        if queue.is_empty() {
            return Ok(Decision::refusal("scripted reasoner exhausted"));
        }
        Ok(queue.remove(0))
    }

    async fn run_with_tools(
        &self,
        _task: &Task,
        _allowed_tools: &[String],
    ) -> AowResult<ToolRunOutcome> {
        let mut outcomes = self
            .tool_outcomes
            .lock()
            .map_err(|_| AowError::reasoner_failure("poisoned lock"))?;
        if outcomes.is_empty() {
            return Ok(ToolRunOutcome { success: false, output: None, error: Some("no scripted tool outcome".to_string()) });
        }
        Ok(outcomes.remove(0))
    }

    fn supports_tools(&self) -> bool {
        true
    }
}

/// Parses a numbered-step plan out of free-form reasoning text, e.g.
/// `"1) do A, 2) do B"`. Used by the Agent Runtime's structural-enforcement
/// fallback when a planner's reasoner refuses to call `EmitPlan` directly.
pub fn parse_numbered_steps(reasoning: &str) -> Vec<HashMap<String, serde_json::Value>> {
    let mut steps = Vec::new();
    for segment in reasoning.split(|c: char| c == ',' || c == '\n') {
        let segment = segment.trim();
        let Some(rest) = segment
            .split_once(')')
            .map(|(head, tail)| (head, tail))
            .filter(|(head, _)| head.trim().chars().all(|c| c.is_ascii_digit()))
            .map(|(_, tail)| tail.trim())
        else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let mut step = HashMap::new();
        step.insert("action".to_string(), serde_json::Value::String(rest.to_string()));
        step.insert("rationale".to_string(), serde_json::Value::String(reasoning.to_string()));
        steps.push(step);
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use aow_core::{Affordance, AffordanceParams, TaskType, TracePolicy};
    use chrono::Utc;
    use uuid::Uuid;

    fn view_with_affordances(affordances: Vec<Affordance>) -> ContextView {
        ContextView {
            id: Uuid::new_v4(),
            agent_did: "did:example:1".into(),
            agent_type: "executor".into(),
            timestamp: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
            nonce: Uuid::new_v4(),
            scope: None,
            verified_credentials: vec![],
            constraints: vec![],
            affordances,
            structural_requirements: None,
            trace_policy: TracePolicy::Always,
            custom: HashMap::new(),
        }
    }

    fn affordance(id: &str, enabled: bool) -> Affordance {
        Affordance {
            id: id.to_string(),
            action_type: "Act".to_string(),
            rel: "next".to_string(),
            target: "/noop".to_string(),
            params: AffordanceParams::default(),
            requires_credential: vec![],
            effects: vec![],
            enabled,
        }
    }

    fn dummy_task() -> Task {
        Task::new(Uuid::new_v4(), TaskType::Execute, serde_json::Value::Null)
    }

    #[tokio::test]
    async fn echo_reasoner_picks_first_enabled_affordance() {
        let view = view_with_affordances(vec![affordance("a1", false), affordance("a2", true)]);
        let reasoner = EchoReasoner;
        let decision = reasoner
            .reason_about_context("", &view, &dummy_task(), &[])
            .await
            .unwrap();
        assert_eq!(decision.selected_affordance_id, Some("a2".to_string()));
    }

    #[tokio::test]
    async fn echo_reasoner_refuses_with_no_enabled_affordances() {
        let view = view_with_affordances(vec![affordance("a1", false)]);
        let reasoner = EchoReasoner;
        let decision = reasoner
            .reason_about_context("", &view, &dummy_task(), &[])
            .await
            .unwrap();
        assert!(decision.is_refusal());
    }

    #[tokio::test]
    async fn scripted_reasoner_replays_in_order_then_refuses() {
        let reasoner = ScriptedReasoner::new(vec![
            Decision::traverse("a1", "first"),
            Decision::traverse("a2", "second"),
        ]);
        let view = view_with_affordances(vec![]);
        let task = dummy_task();

        let d1 = reasoner.reason_about_context("", &view, &task, &[]).await.unwrap();
        assert_eq!(d1.selected_affordance_id, Some("a1".to_string()));

        let d2 = reasoner.reason_about_context("", &view, &task, &[]).await.unwrap();
        assert_eq!(d2.selected_affordance_id, Some("a2".to_string()));

        let d3 = reasoner.reason_about_context("", &view, &task, &[]).await.unwrap();
        assert!(d3.is_refusal());
    }

    #[test]
    fn parse_numbered_steps_extracts_actions() {
        let steps = parse_numbered_steps("1) do A, 2) do B");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["action"], serde_json::json!("do A"));
        assert_eq!(steps[1]["action"], serde_json::json!("do B"));
    }

    #[test]
    fn parse_numbered_steps_empty_for_unstructured_text() {
        let steps = parse_numbered_steps("just a free-form sentence");
        assert!(steps.is_empty());
    }
}
