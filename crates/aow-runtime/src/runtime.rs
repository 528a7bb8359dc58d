//! Agent Runtime (§4.5): the per-agent decision/traversal loop. One
//! `AgentRuntime` is bound to one task execution; it never returns raw
//! reasoning as output, only a projection of the actions it actually
//! traversed.

use std::collections::HashMap;
use std::sync::Arc;

use aow_core::{
    ActionRecord, Affordance, AowError, AowResult, ContextView, Credentials, Decision, Reasoner,
    Task, TaskResult, TaskResultStatus,
};
use aow_reasoner::parse_numbered_steps;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::broker::ContextBroker;

#[derive(Debug)]
pub struct RunOutcome {
    pub task_result: TaskResult,
    pub action_history: Vec<ActionRecord>,
}

pub struct AgentRuntime {
    pub id: Uuid,
    pub did: String,
    pub aat_id: String,
    pub credentials: Credentials,
    reasoner: Arc<dyn Reasoner>,
    broker: Arc<ContextBroker>,
    max_iterations: u32,
}

impl AgentRuntime {
    pub fn new(
        did: impl Into<String>,
        aat_id: impl Into<String>,
        credentials: Credentials,
        reasoner: Arc<dyn Reasoner>,
        broker: Arc<ContextBroker>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            did: did.into(),
            aat_id: aat_id.into(),
            credentials,
            reasoner,
            broker,
            max_iterations: 10,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn run(&self, task: &Task) -> AowResult<RunOutcome> {
        let mut history: Vec<ActionRecord> = Vec::new();
        let mut previous_decisions: Vec<Decision> = Vec::new();

        for _ in 0..self.max_iterations {
            let view = self.broker.issue_context(&self.did, &self.aat_id, &self.credentials);
            let enabled: Vec<Affordance> = view.enabled_affordances().cloned().collect();

            if enabled.is_empty() {
                if let Some(request_credential) = view.affordances.iter().find(|a| a.action_type == "RequestCredential") {
                    return Ok(self.finish_waiting(history, &request_credential.id));
                }
            }

            let mut decision = self.deterministic_shortcut(&view, task, &history);

            if decision.is_none() {
                decision = Some(
                    self.reasoner
                        .reason_about_context("", &view, task, &previous_decisions)
                        .await?,
                );
            }
            let mut decision = decision.expect("decision always populated by this point");

            if (decision.is_refusal() || decision.selected_affordance_id.is_none()) && self.aat_id == "analyst" {
                if let Some(query_data) = find_by_action_type(&view, "QueryData") {
                    decision = Decision::traverse(query_data.id.clone(), "falling back to a default query")
                        .with_parameters(HashMap::from([
                            ("query".to_string(), json!("SELECT * WHERE { ?s ?p ?o }")),
                            ("queryLanguage".to_string(), json!("sparql")),
                        ]));
                }
            }

            if let Some(structural) = view.required_output_action() {
                let matches_required = decision
                    .selected_affordance_id
                    .as_ref()
                    .and_then(|id| view.find_affordance(id))
                    .map(|a| a.action_type == structural)
                    .unwrap_or(false);

                if !matches_required {
                    if let Some(target) = view.affordances.iter().find(|a| a.action_type == structural && a.enabled) {
                        let params = synthesize_structural_parameters(&structural, &decision.reasoning, task);
                        decision = Decision {
                            reasoning: decision.reasoning.clone(),
                            selected_affordance_id: Some(target.id.clone()),
                            parameters: params,
                            should_continue: true,
                            message: None,
                        };
                    }
                }
            }

            if !decision.should_continue || decision.selected_affordance_id.is_none() {
                return self.finish(&view, history, Ok(()));
            }

            let affordance_id = decision.selected_affordance_id.clone().unwrap();
            let Some(affordance) = view.find_affordance(&affordance_id).cloned() else {
                return Err(AowError::affordance_unknown(affordance_id));
            };

            let mut final_params = decision.parameters.clone();
            inject_task_context_parameters(&mut final_params, &affordance.action_type, task);

            if self.aat_id == "executor" && self.reasoner.supports_tools() {
                let allowed_tools: Vec<String> = affordance.effects.clone();
                match self.reasoner.run_with_tools(task, &allowed_tools).await {
                    Ok(outcome) => {
                        final_params.insert(
                            "executionResult".to_string(),
                            json!({ "success": outcome.success, "output": outcome.output, "error": outcome.error }),
                        );
                    }
                    Err(err) => {
                        final_params.insert(
                            "executionResult".to_string(),
                            json!({ "success": false, "output": Value::Null, "error": err.to_string() }),
                        );
                    }
                }
            }

            let traverse_result = self
                .broker
                .traverse(view.id, &affordance_id, final_params.clone(), &self.credentials, &self.aat_id)
                .await;

            match traverse_result {
                Ok(outcome) => {
                    history.push(ActionRecord {
                        affordance_id: affordance_id.clone(),
                        action_type: affordance.action_type.clone(),
                        parameters: final_params,
                        success: outcome.success,
                        result: outcome.result.clone(),
                        trace_id: outcome.trace_id,
                        recorded_at: Utc::now(),
                    });
                    previous_decisions.push(decision);

                    if !outcome.success {
                        return Ok(RunOutcome {
                            task_result: TaskResult {
                                status: TaskResultStatus::Failed,
                                output: Value::Null,
                                error: outcome.error,
                                waiting_on: None,
                            },
                            action_history: history,
                        });
                    }

                    if is_terminal_action(&self.aat_id, &affordance.action_type) {
                        return self.finish(&view, history, Ok(()));
                    }
                }
                Err(err) => {
                    if err.error_kind() == "effect-failed" {
                        return Ok(RunOutcome {
                            task_result: TaskResult {
                                status: TaskResultStatus::Failed,
                                output: Value::Null,
                                error: Some(err.to_string()),
                                waiting_on: None,
                            },
                            action_history: history,
                        });
                    }
                    // Other per-iteration errors are recoverable: retry next
                    // iteration with a freshly issued view (§7 propagation).
                    previous_decisions.push(decision);
                }
            }
        }

        Err(AowError::max_iterations_reached(format!(
            "agent '{}' exceeded {} iterations on task '{}'",
            self.did, self.max_iterations, task.id
        )))
    }

    fn finish_waiting(&self, history: Vec<ActionRecord>, affordance_id: &str) -> RunOutcome {
        RunOutcome {
            task_result: TaskResult {
                status: TaskResultStatus::Waiting,
                output: Value::Null,
                error: None,
                waiting_on: Some(affordance_id.to_string()),
            },
            action_history: history,
        }
    }

    fn finish(&self, view: &ContextView, history: Vec<ActionRecord>, _ok: AowResult<()>) -> AowResult<RunOutcome> {
        if let Some(required) = view.required_output_action() {
            let satisfied = history.iter().any(|record| record.action_type == required);
            if !satisfied {
                return Err(AowError::structural_missing_required_output(format!(
                    "required output action '{}' was never traversed",
                    required
                )));
            }
        }

        let output = project_output(&self.aat_id, &history);
        Ok(RunOutcome {
            task_result: TaskResult { status: TaskResultStatus::Completed, output, error: None, waiting_on: None },
            action_history: history,
        })
    }

    /// Step 4(a): deterministic archetype shortcuts that skip the reasoner
    /// entirely under specific conditions.
    fn deterministic_shortcut(
        &self,
        view: &ContextView,
        task: &Task,
        history: &[ActionRecord],
    ) -> Option<Decision> {
        match self.aat_id.as_str() {
            "archivist" => {
                let content = task.input.get("content")?;
                let content_type = task.input.get("contentType")?;
                let store = find_by_action_type(view, "Store")?;
                Some(
                    Decision::traverse(store.id.clone(), "task context carries content; auto-storing")
                        .with_parameters(HashMap::from([
                            ("content".to_string(), content.clone()),
                            ("contentType".to_string(), content_type.clone()),
                        ])),
                )
            }
            "arbiter" => {
                let approve = find_by_action_type(view, "Approve")?;
                Some(Decision::traverse(approve.id.clone(), "arbiter auto-approves"))
            }
            "analyst" => {
                let last_query = history
                    .iter()
                    .rev()
                    .find(|r| r.action_type == "QueryData" && r.success)?;
                let insight = find_by_action_type(view, "EmitInsight")?;
                Some(
                    Decision::traverse(insight.id.clone(), "summarizing prior query results")
                        .with_parameters(HashMap::from([(
                            "summary".to_string(),
                            last_query.result.clone().unwrap_or(Value::Null),
                        )])),
                )
            }
            _ => None,
        }
    }
}

fn find_by_action_type<'a>(view: &'a ContextView, action_type: &str) -> Option<&'a Affordance> {
    view.enabled_affordances().find(|a| a.action_type == action_type)
}

fn is_terminal_action(aat_id: &str, action_type: &str) -> bool {
    match aat_id {
        "archivist" => action_type == "Store",
        "arbiter" => action_type == "Approve" || action_type == "Deny",
        "analyst" => matches!(action_type, "EmitInsight" | "GenerateReport" | "DetectAnomaly"),
        _ => false,
    }
}

/// Task-context → affordance-parameter injection table (§6). Only fills
/// keys the decision didn't already set, since the reasoner's explicit
/// parameters take precedence.
fn inject_task_context_parameters(params: &mut HashMap<String, Value>, action_type: &str, task: &Task) {
    match action_type {
        "Act" => {
            if let Some(action_ref) = task.input.get("actionRef") {
                params.entry("actionRef".to_string()).or_insert_with(|| action_ref.clone());
            }
            if let Some(target) = task.input.get("target") {
                params.entry("target".to_string()).or_insert_with(|| target.clone());
            }
        }
        "QueryData" => {
            params
                .entry("query".to_string())
                .or_insert_with(|| task.input.get("query").cloned().unwrap_or_else(|| json!("SELECT * WHERE { ?s ?p ?o }")));
            params.entry("queryLanguage".to_string()).or_insert_with(|| json!("sparql"));
            if let Some(semantic_layer_ref) = task.input.get("semanticLayerRef") {
                params.entry("semanticLayerRef".to_string()).or_insert_with(|| semantic_layer_ref.clone());
            }
            if let Some(source_ref) = task.input.get("sourceRef") {
                params.entry("sourceRef".to_string()).or_insert_with(|| source_ref.clone());
            }
        }
        "Store" => {
            if let Some(content) = task.input.get("content") {
                params.entry("content".to_string()).or_insert_with(|| content.clone());
            }
            if let Some(content_type) = task.input.get("contentType") {
                params.entry("contentType".to_string()).or_insert_with(|| content_type.clone());
            }
        }
        _ => {}
    }
}

/// Structural enforcement parameter synthesis (step 6): for `EmitPlan`,
/// parse numbered steps out of the reasoning text; fall back to a
/// single-step plan whose action is the task itself.
fn synthesize_structural_parameters(
    required_action: &str,
    reasoning: &str,
    task: &Task,
) -> HashMap<String, Value> {
    if required_action == "EmitPlan" {
        let steps = parse_numbered_steps(reasoning);
        let plan_steps = if steps.is_empty() {
            vec![json!({ "action": task.input.clone(), "rationale": reasoning })]
        } else {
            steps
                .into_iter()
                .map(|step| Value::Object(step.into_iter().collect()))
                .collect()
        };
        HashMap::from([("steps".to_string(), Value::Array(plan_steps))])
    } else {
        HashMap::new()
    }
}

/// Projects the agent's output from the actions it actually traversed,
/// never from raw reasoning text — archetype-specific (step 7).
fn project_output(aat_id: &str, history: &[ActionRecord]) -> Value {
    match aat_id {
        "planner" => history
            .iter()
            .find(|r| r.action_type == "EmitPlan")
            .and_then(|r| r.result.clone())
            .unwrap_or(Value::Null),
        "executor" => Value::Array(
            history
                .iter()
                .filter(|r| r.action_type == "Act")
                .filter_map(|r| r.result.clone())
                .collect(),
        ),
        "observer" => history.last().and_then(|r| r.result.clone()).unwrap_or(Value::Null),
        "arbiter" => history
            .iter()
            .find(|r| r.action_type == "Approve" || r.action_type == "Deny")
            .and_then(|r| r.result.clone())
            .unwrap_or(Value::Null),
        "archivist" => history
            .iter()
            .find(|r| r.action_type == "Store")
            .and_then(|r| r.result.clone())
            .unwrap_or(Value::Null),
        "analyst" => history
            .iter()
            .rev()
            .find(|r| matches!(r.action_type.as_str(), "EmitInsight" | "GenerateReport" | "DetectAnomaly" | "QueryData"))
            .and_then(|r| r.result.clone())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AffordanceTemplate, ContextBroker, EffectHandler, NoopEffectHandler};
    use aow_core::{
        Aat, ActionSpace, AffordanceParams, AllowedAction, AatRegistry, BehavioralInvariant,
        EnforcementLevel, ForbiddenAction, SchemaParamValidator, TaskType,
    };
    use aow_policy::PolicyEngine;
    use aow_provenance::InMemoryTraceStore;
    use aow_reasoner::ScriptedReasoner;
    use async_trait::async_trait;

    struct EchoEffectHandler;

    #[async_trait]
    impl EffectHandler for EchoEffectHandler {
        async fn handle(
            &self,
            affordance: &Affordance,
            parameters: &HashMap<String, Value>,
            _credentials: &Credentials,
        ) -> AowResult<Value> {
            Ok(json!({ "action": affordance.action_type, "echo": parameters }))
        }
    }

    fn executor_runtime(reasoner: Arc<dyn Reasoner>) -> AgentRuntime {
        let mut registry = AatRegistry::new();
        registry
            .register(Aat {
                id: "executor".to_string(),
                action_space: ActionSpace {
                    allowed: vec![AllowedAction { action_type: "Act".to_string(), requires_capability: None }],
                    forbidden: vec![],
                },
                behavioral_invariants: vec![],
                parallelization: None,
            })
            .unwrap();

        let aat_registry = Arc::new(registry);
        let policy_engine = Arc::new(PolicyEngine::new());
        let validator = Arc::new(SchemaParamValidator::default());
        let trace_store = Arc::new(InMemoryTraceStore::default());
        let mut broker = ContextBroker::new(aat_registry, policy_engine, validator, trace_store);
        broker.register_affordance(AffordanceTemplate {
            affordance: Affordance {
                id: "act-1".to_string(),
                action_type: "Act".to_string(),
                rel: "next".to_string(),
                target: "/noop".to_string(),
                params: AffordanceParams::default(),
                requires_credential: vec![],
                effects: vec![],
                enabled: true,
            },
            constraints: vec![],
        });
        broker.register_effect_handler("Act", Arc::new(EchoEffectHandler));
        let broker = Arc::new(broker);

        let credentials = Credentials { did: "did:example:1".to_string(), capabilities: vec![], claims: HashMap::new() };
        AgentRuntime::new("did:example:1", "executor", credentials, reasoner, broker)
    }

    fn planner_runtime(reasoner: Arc<dyn Reasoner>) -> AgentRuntime {
        let mut registry = AatRegistry::new();
        registry
            .register(Aat {
                id: "planner".to_string(),
                action_space: ActionSpace {
                    allowed: vec![AllowedAction { action_type: "EmitPlan".to_string(), requires_capability: None }],
                    forbidden: vec![ForbiddenAction { action_type: "Act".to_string(), rationale: None }],
                },
                behavioral_invariants: vec![BehavioralInvariant {
                    id: "must-emit-plan".to_string(),
                    enforcement: EnforcementLevel::Structural,
                    required_output_action: Some("EmitPlan".to_string()),
                }],
                parallelization: None,
            })
            .unwrap();

        let aat_registry = Arc::new(registry);
        let policy_engine = Arc::new(PolicyEngine::new());
        let validator = Arc::new(SchemaParamValidator::default());
        let trace_store = Arc::new(InMemoryTraceStore::default());
        let mut broker = ContextBroker::new(aat_registry, policy_engine, validator, trace_store);
        broker.register_affordance(AffordanceTemplate {
            affordance: Affordance {
                id: "emit-plan-1".to_string(),
                action_type: "EmitPlan".to_string(),
                rel: "next".to_string(),
                target: "/plan".to_string(),
                params: AffordanceParams::default(),
                requires_credential: vec![],
                effects: vec![],
                enabled: true,
            },
            constraints: vec![],
        });
        broker.register_effect_handler("EmitPlan", Arc::new(EchoEffectHandler));
        let broker = Arc::new(broker);

        let credentials = Credentials { did: "did:example:1".to_string(), capabilities: vec![], claims: HashMap::new() };
        AgentRuntime::new("did:example:1", "planner", credentials, reasoner, broker)
    }

    fn dummy_task(task_type: TaskType, input: Value) -> Task {
        Task::new(Uuid::new_v4(), task_type, input)
    }

    #[tokio::test]
    async fn executor_traverses_act_and_projects_results_array() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Decision::traverse("act-1", "acting"),
            Decision { reasoning: "done".to_string(), selected_affordance_id: None, parameters: HashMap::new(), should_continue: false, message: None },
        ]));
        let runtime = executor_runtime(reasoner);
        let task = dummy_task(TaskType::Execute, json!({"target": "/resource"}));
        let outcome = runtime.run(&task).await.unwrap();

        assert_eq!(outcome.task_result.status, TaskResultStatus::Completed);
        assert_eq!(outcome.action_history.len(), 1);
        assert!(outcome.task_result.output.is_array());
    }

    #[tokio::test]
    async fn structural_enforcement_redirects_non_compliant_decision_to_required_action() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Decision::refusal("I refuse to plan")]));
        let runtime = planner_runtime(reasoner);
        let task = dummy_task(TaskType::Plan, json!({"description": "do the thing"}));
        let outcome = runtime.run(&task).await.unwrap();

        assert_eq!(outcome.task_result.status, TaskResultStatus::Completed);
        assert_eq!(outcome.action_history[0].action_type, "EmitPlan");
    }

    #[tokio::test]
    async fn missing_required_output_after_termination_fails_structurally() {
        // Reasoner immediately stops without ever selecting an affordance,
        // and the redirect target affordance is disabled so enforcement
        // cannot substitute it; P-Structural must reject the "success".
        struct AlwaysStop;
        #[async_trait]
        impl Reasoner for AlwaysStop {
            async fn reason_about_context(
                &self,
                _system_prompt: &str,
                _view: &ContextView,
                _task: &Task,
                _previous_actions: &[Decision],
            ) -> AowResult<Decision> {
                Ok(Decision { reasoning: "stop".to_string(), selected_affordance_id: None, parameters: HashMap::new(), should_continue: false, message: None })
            }
        }

        let mut registry = AatRegistry::new();
        registry
            .register(Aat {
                id: "planner".to_string(),
                action_space: ActionSpace { allowed: vec![], forbidden: vec![] },
                behavioral_invariants: vec![BehavioralInvariant {
                    id: "must-emit-plan".to_string(),
                    enforcement: EnforcementLevel::Structural,
                    required_output_action: Some("EmitPlan".to_string()),
                }],
                parallelization: None,
            })
            .unwrap();
        let aat_registry = Arc::new(registry);
        let policy_engine = Arc::new(PolicyEngine::new());
        let validator = Arc::new(SchemaParamValidator::default());
        let trace_store = Arc::new(InMemoryTraceStore::default());
        let broker = Arc::new(ContextBroker::new(aat_registry, policy_engine, validator, trace_store));
        let credentials = Credentials { did: "did:example:1".to_string(), capabilities: vec![], claims: HashMap::new() };
        let runtime = AgentRuntime::new("did:example:1", "planner", credentials, Arc::new(AlwaysStop), broker);

        let task = dummy_task(TaskType::Plan, Value::Null);
        let err = runtime.run(&task).await.unwrap_err();
        assert_eq!(err.error_kind(), "structural-missing-required-output");
    }

    #[tokio::test]
    async fn exhausting_iterations_without_termination_fails_with_max_iterations() {
        // `Act` is not a terminal action for the executor archetype, so a
        // reasoner that keeps re-selecting it forever should exhaust the cap.
        struct NeverSettles;
        #[async_trait]
        impl Reasoner for NeverSettles {
            async fn reason_about_context(
                &self,
                _system_prompt: &str,
                view: &ContextView,
                _task: &Task,
                _previous_actions: &[Decision],
            ) -> AowResult<Decision> {
                let aff = view.enabled_affordances().next().unwrap();
                Ok(Decision::traverse(aff.id.clone(), "always keep acting"))
            }
        }

        let runtime = executor_runtime(Arc::new(NeverSettles)).with_max_iterations(3);
        let task = dummy_task(TaskType::Execute, Value::Null);
        let err = runtime.run(&task).await.unwrap_err();
        assert_eq!(err.error_kind(), "max-iterations-reached");
    }
}
