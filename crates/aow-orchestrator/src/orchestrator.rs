//! Concurrent Orchestrator (§4.6): owns the task queue, agent pool, workflow
//! registry, checkpointer, and resource counters, and drives the scheduling
//! tick. Grounded on the teacher's `FleetCoordinator`: an `Arc`-wrapped
//! inner state shared across spawned tasks, a builder for construction, and
//! a tagged-variant event channel.

use std::collections::HashSet;
use std::sync::Arc;

use aow_core::{
    Aat, AatRegistry, AowError, AowResult, Checkpoint, CheckpointStore, Credentials,
    EnclaveService, Goal, Priority, Reasoner, Task, TaskResultStatus, TaskStatus, TaskType,
    Workflow, WorkflowStatus,
};
use aow_runtime::{AgentRuntime, ContextBroker};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dag::{self, plan_steps};
use crate::enclave::NullEnclaveService;
use crate::events::OrchestratorEvent;
use crate::policy::{can_spawn, ConcurrencyPolicy, ResourceWindow};

/// Archetype dispatch order (§4.6 step 3: "for each archetype A, in declared
/// order"), following the goal→task-DAG mapping's archetype sequence.
const ARCHETYPE_ORDER: [&str; 6] = ["planner", "executor", "observer", "arbiter", "archivist", "analyst"];

#[derive(Debug, Clone)]
struct PooledAgent {
    id: Uuid,
    aat_id: String,
    credentials: Credentials,
    busy: bool,
    current_task_id: Option<Uuid>,
    #[allow(dead_code)]
    enclave_id: Option<Uuid>,
}

struct Inner {
    aat_registry: Arc<AatRegistry>,
    policy: ConcurrencyPolicy,
    resource_window: ResourceWindow,
    broker: Arc<ContextBroker>,
    reasoner: Arc<dyn Reasoner>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    enclave_service: Arc<dyn EnclaveService>,
    repository_configured: bool,
    workflows: DashMap<Uuid, Workflow>,
    tasks: DashMap<Uuid, Task>,
    agents: DashMap<Uuid, PooledAgent>,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

pub struct OrchestratorBuilder {
    aat_registry: Arc<AatRegistry>,
    broker: Arc<ContextBroker>,
    reasoner: Arc<dyn Reasoner>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    policy: ConcurrencyPolicy,
    enclave_service: Arc<dyn EnclaveService>,
    repository_configured: bool,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(
        aat_registry: Arc<AatRegistry>,
        broker: Arc<ContextBroker>,
        reasoner: Arc<dyn Reasoner>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            aat_registry,
            broker,
            reasoner,
            checkpoint_store,
            policy: ConcurrencyPolicy::default(),
            enclave_service: Arc::new(NullEnclaveService),
            repository_configured: false,
            event_tx: None,
        }
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_enclave_service(mut self, service: Arc<dyn EnclaveService>) -> Self {
        self.enclave_service = service;
        self
    }

    pub fn with_repository_configured(mut self, configured: bool) -> Self {
        self.repository_configured = configured;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                aat_registry: self.aat_registry,
                policy: self.policy,
                resource_window: ResourceWindow::new(Utc::now()),
                broker: self.broker,
                reasoner: self.reasoner,
                checkpoint_store: self.checkpoint_store,
                enclave_service: self.enclave_service,
                repository_configured: self.repository_configured,
                workflows: DashMap::new(),
                tasks: DashMap::new(),
                agents: DashMap::new(),
                event_tx: self.event_tx,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.inner.workflows.get(&workflow_id).map(|w| w.clone())
    }

    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.inner.tasks.get(&task_id).map(|t| t.clone())
    }

    /// Submits a goal, creating its workflow plus the initial `plan` task.
    pub fn submit_goal(&self, goal: Goal) -> Uuid {
        let mut workflow = Workflow::new(goal.clone());
        let workflow_id = workflow.id;

        let plan_task = Task::new(
            workflow_id,
            TaskType::Plan,
            json!({ "goal": goal.description, "constraints": goal.constraints }),
        );
        let plan_task_id = plan_task.id;

        workflow.task_ids.push(plan_task_id);
        self.inner.tasks.insert(plan_task_id, plan_task);
        self.inner.workflows.insert(workflow_id, workflow);

        workflow_id
    }

    /// One scheduling tick (§4.6): refresh windows, gate on resources,
    /// attempt one dispatch per archetype, sweep completions, clean enclaves.
    pub async fn tick(&self) -> AowResult<()> {
        let now = Utc::now();
        self.inner.resource_window.refresh(now);

        if self.inner.resource_window.is_exhausted(&self.inner.policy.resource_limits) {
            self.emit(OrchestratorEvent::ResourceLimitReached {
                detail: "token, cost, or concurrent-call cap reached".to_string(),
            })
            .await;
            return Ok(());
        }

        for aat_id in ARCHETYPE_ORDER {
            self.try_dispatch(aat_id).await;
        }

        self.completion_pass().await;
        self.cleanup_enclaves().await;
        Ok(())
    }

    fn active_counts(&self) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for agent in self.inner.agents.iter() {
            if agent.busy {
                *counts.entry(agent.aat_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    fn next_ready_task(&self, aat_id: &str) -> Option<Uuid> {
        let completed: HashSet<Uuid> = self
            .inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();

        self.inner
            .tasks
            .iter()
            .filter(|t| t.task_type.archetype() == aat_id && t.is_ready(&completed))
            .max_by_key(|t| (t.priority, std::cmp::Reverse(t.created_at)))
            .map(|t| t.id)
    }

    async fn try_dispatch(&self, aat_id: &str) {
        let active_counts = self.active_counts();
        let rules = self.inner.aat_registry.get_parallelization_rules(aat_id);

        if let Err(reason) = can_spawn(aat_id, &rules, &self.inner.policy, &active_counts) {
            debug!(aat_id, %reason, "dispatch skipped");
            self.emit(OrchestratorEvent::DispatchSkipped { aat_id: aat_id.to_string(), reason }).await;
            return;
        }

        let Some(task_id) = self.next_ready_task(aat_id) else {
            return;
        };

        let agent_id = self.get_or_spawn_agent(aat_id, &rules).await;

        if let Some(mut task) = self.inner.tasks.get_mut(&task_id) {
            task.mark_running(agent_id);
        }
        if let Some(mut agent) = self.inner.agents.get_mut(&agent_id) {
            agent.busy = true;
            agent.current_task_id = Some(task_id);
        }

        self.emit(OrchestratorEvent::TaskDispatched { task_id, agent_id, aat_id: aat_id.to_string() }).await;

        let this = self.clone();
        let aat_id = aat_id.to_string();
        tokio::spawn(async move { this.run_task(task_id, agent_id, aat_id).await });
    }

    async fn get_or_spawn_agent(&self, aat_id: &str, rules: &aow_core::ParallelizationRules) -> Uuid {
        let idle = self
            .inner
            .agents
            .iter()
            .find(|a| a.aat_id == aat_id && !a.busy)
            .map(|a| a.id);
        if let Some(id) = idle {
            return id;
        }

        let id = Uuid::new_v4();
        let did = format!("did:agent:{}", id);
        let credentials = Credentials { did: did.clone(), capabilities: vec![], claims: HashMap::new() };

        let mut enclave_id = None;
        if rules.requires_isolation && self.inner.repository_configured {
            if let Ok(enclave) = self
                .inner
                .enclave_service
                .create(&did, rules.preferred_enclave_scope.as_deref(), 3600)
                .await
            {
                enclave_id = Some(enclave.id);
            }
        }

        self.inner.agents.insert(
            id,
            PooledAgent { id, aat_id: aat_id.to_string(), credentials, busy: false, current_task_id: None, enclave_id },
        );
        self.emit(OrchestratorEvent::AgentSpawned { agent_id: id, aat_id: aat_id.to_string() }).await;
        id
    }

    async fn run_task(&self, task_id: Uuid, agent_id: Uuid, aat_id: String) {
        let Some(task_snapshot) = self.inner.tasks.get(&task_id).map(|t| t.clone()) else { return };
        let Some(credentials) = self.inner.agents.get(&agent_id).map(|a| a.credentials.clone()) else { return };
        let did = credentials.did.clone();

        let runtime = AgentRuntime::new(did, aat_id.clone(), credentials, self.inner.reasoner.clone(), self.inner.broker.clone());
        let result = runtime.run(&task_snapshot).await;

        if let Some(mut agent) = self.inner.agents.get_mut(&agent_id) {
            agent.busy = false;
            agent.current_task_id = None;
        }

        match result {
            Ok(outcome) => match outcome.task_result.status {
                TaskResultStatus::Completed => {
                    if let Some(mut task) = self.inner.tasks.get_mut(&task_id) {
                        task.mark_completed(outcome.task_result.output.clone());
                    }
                    self.emit(OrchestratorEvent::TaskCompleted { task_id, workflow_id: task_snapshot.workflow_id }).await;

                    if aat_id == "planner" {
                        self.expand_plan(task_id, task_snapshot.workflow_id, &outcome.task_result.output).await;
                    }
                }
                TaskResultStatus::Failed => {
                    let error = outcome.task_result.error.clone().unwrap_or_else(|| "agent reported failure".to_string());
                    if let Some(mut task) = self.inner.tasks.get_mut(&task_id) {
                        task.mark_failed(error.clone());
                    }
                    self.emit(OrchestratorEvent::TaskFailed { task_id, workflow_id: task_snapshot.workflow_id, error }).await;
                }
                TaskResultStatus::Waiting => {
                    // Per §7, waiting is not a failure; the task stays
                    // `running` until a future tick re-dispatches it once
                    // the missing credential is supplied.
                    if let Some(mut task) = self.inner.tasks.get_mut(&task_id) {
                        task.status = TaskStatus::Queued;
                        task.assigned_agent_id = None;
                    }
                }
            },
            Err(err) => {
                warn!(%task_id, error = %err, "agent runtime failed");
                if let Some(mut task) = self.inner.tasks.get_mut(&task_id) {
                    task.mark_failed(err.to_string());
                }
                self.emit(OrchestratorEvent::TaskFailed { task_id, workflow_id: task_snapshot.workflow_id, error: err.to_string() })
                    .await;
            }
        }
    }

    /// §4.6 "Plan expansion": builds the execute-phase DAG once a `plan`
    /// task completes with `{goal, steps[]}`.
    async fn expand_plan(&self, plan_task_id: Uuid, workflow_id: Uuid, plan_output: &serde_json::Value) {
        let steps = plan_steps(plan_output);
        if steps.is_empty() {
            return;
        }
        let goal = plan_output.get("goal").cloned().unwrap_or(serde_json::Value::Null);

        let enable_parallel = self
            .inner
            .workflows
            .get(&workflow_id)
            .map(|w| w.options.enable_parallel_execution)
            .unwrap_or(false);

        let new_tasks = if enable_parallel {
            dag::expand_parallel(workflow_id, plan_task_id, &goal, &steps)
        } else {
            dag::expand_sequential(workflow_id, plan_task_id, &goal, &steps)
        };

        if let Some(mut workflow) = self.inner.workflows.get_mut(&workflow_id) {
            workflow.status = WorkflowStatus::Executing;
            for task in &new_tasks {
                workflow.task_ids.push(task.id);
            }
        }
        for task in new_tasks {
            self.inner.tasks.insert(task.id, task);
        }
    }

    async fn completion_pass(&self) {
        let workflow_ids: Vec<Uuid> = self
            .inner
            .workflows
            .iter()
            .filter(|w| !matches!(w.status, WorkflowStatus::Completed | WorkflowStatus::Failed))
            .map(|w| w.id)
            .collect();

        for workflow_id in workflow_ids {
            let Some(task_ids) = self.inner.workflows.get(&workflow_id).map(|w| w.task_ids.clone()) else { continue };
            if task_ids.is_empty() {
                continue;
            }
            let tasks: Vec<Task> = task_ids.iter().filter_map(|id| self.inner.tasks.get(id).map(|t| t.clone())).collect();

            if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
                if let Some(mut workflow) = self.inner.workflows.get_mut(&workflow_id) {
                    workflow.status = WorkflowStatus::Failed;
                }
                let error = tasks.iter().find(|t| t.status == TaskStatus::Failed).and_then(|t| t.error.clone()).unwrap_or_default();
                self.emit(OrchestratorEvent::WorkflowFailed { workflow_id, error }).await;
            } else if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
                if let Some(mut workflow) = self.inner.workflows.get_mut(&workflow_id) {
                    workflow.status = WorkflowStatus::Completed;
                }
                self.emit(OrchestratorEvent::WorkflowCompleted { workflow_id }).await;
            }
        }
    }

    async fn cleanup_enclaves(&self) {
        if let Ok(count) = self.inner.enclave_service.cleanup_expired().await {
            if count > 0 {
                self.emit(OrchestratorEvent::EnclaveCleanup { expired_count: count }).await;
            }
        }
    }

    /// Snapshots queued task ids, completed task ids, and the current goal
    /// for a workflow (§4.6 checkpointing).
    pub async fn checkpoint(&self, workflow_id: Uuid) -> AowResult<Checkpoint> {
        let workflow = self
            .inner
            .workflows
            .get(&workflow_id)
            .map(|w| w.clone())
            .ok_or_else(|| AowError::orchestrator(format!("unknown workflow '{}'", workflow_id)))?;

        let mut queued = Vec::new();
        let mut completed = Vec::new();
        for task_id in &workflow.task_ids {
            let Some(task) = self.inner.tasks.get(task_id) else { continue };
            match task.status {
                TaskStatus::Completed => completed.push(*task_id),
                TaskStatus::Queued | TaskStatus::Assigned | TaskStatus::Running => queued.push(*task_id),
                _ => {}
            }
        }

        let agent_state = aow_core::AgentState {
            task_queue: queued,
            completed_task_ids: completed,
            working_memory: HashMap::new(),
            current_goal: Some(workflow.goal.id),
        };
        let context_snapshot = serde_json::Value::Null;
        let content_hash = Checkpoint::compute_hash(workflow_id, &agent_state, &context_snapshot);

        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            workflow_id,
            timestamp: Utc::now(),
            context_snapshot,
            agent_state,
            content_hash,
            supersedes: None,
        };

        let stored = self.inner.checkpoint_store.create(checkpoint).await?;

        if let Some(mut workflow) = self.inner.workflows.get_mut(&workflow_id) {
            workflow.checkpoints.push(stored.id);
        }
        self.emit(OrchestratorEvent::CheckpointCreated { workflow_id, checkpoint_id: stored.id }).await;

        Ok(stored)
    }

    /// Reconstructs queued/completed status on the in-memory task map from a
    /// stored checkpoint (§4.6: "resumption reconstructs queue and completed
    /// set").
    pub async fn resume(&self, checkpoint_id: Uuid) -> AowResult<()> {
        let checkpoint = self
            .inner
            .checkpoint_store
            .resume(checkpoint_id)
            .await?
            .ok_or_else(|| AowError::orchestrator(format!("checkpoint '{}' not found", checkpoint_id)))?;

        for task_id in &checkpoint.agent_state.task_queue {
            if let Some(mut task) = self.inner.tasks.get_mut(task_id) {
                if task.status != TaskStatus::Completed {
                    task.status = TaskStatus::Queued;
                    task.assigned_agent_id = None;
                }
            }
        }
        for task_id in &checkpoint.agent_state.completed_task_ids {
            if let Some(mut task) = self.inner.tasks.get_mut(task_id) {
                task.status = TaskStatus::Completed;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.inner.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

pub fn default_archetypes() -> [Aat; 6] {
    use aow_core::{ActionSpace, AllowedAction, BehavioralInvariant, EnforcementLevel, ForbiddenAction};

    [
        Aat {
            id: "planner".to_string(),
            action_space: ActionSpace {
                allowed: vec![AllowedAction { action_type: "EmitPlan".to_string(), requires_capability: None }],
                forbidden: vec![ForbiddenAction { action_type: "Act".to_string(), rationale: Some("planners never act directly".to_string()) }],
            },
            behavioral_invariants: vec![BehavioralInvariant {
                id: "must-emit-plan".to_string(),
                enforcement: EnforcementLevel::Structural,
                required_output_action: Some("EmitPlan".to_string()),
            }],
            parallelization: None,
        },
        Aat {
            id: "executor".to_string(),
            action_space: ActionSpace { allowed: vec![AllowedAction { action_type: "Act".to_string(), requires_capability: None }], forbidden: vec![] },
            behavioral_invariants: vec![],
            parallelization: None,
        },
        Aat {
            id: "observer".to_string(),
            action_space: ActionSpace {
                allowed: vec![AllowedAction { action_type: "QueryData".to_string(), requires_capability: None }],
                forbidden: vec![
                    ForbiddenAction { action_type: "Act".to_string(), rationale: None },
                    ForbiddenAction { action_type: "Store".to_string(), rationale: None },
                ],
            },
            behavioral_invariants: vec![],
            parallelization: None,
        },
        Aat {
            id: "arbiter".to_string(),
            action_space: ActionSpace {
                allowed: vec![
                    AllowedAction { action_type: "Approve".to_string(), requires_capability: None },
                    AllowedAction { action_type: "Deny".to_string(), requires_capability: None },
                ],
                forbidden: vec![],
            },
            behavioral_invariants: vec![],
            parallelization: None,
        },
        Aat {
            id: "archivist".to_string(),
            action_space: ActionSpace { allowed: vec![AllowedAction { action_type: "Store".to_string(), requires_capability: None }], forbidden: vec![] },
            behavioral_invariants: vec![],
            parallelization: None,
        },
        Aat {
            id: "analyst".to_string(),
            action_space: ActionSpace {
                allowed: vec![
                    AllowedAction { action_type: "QueryData".to_string(), requires_capability: None },
                    AllowedAction { action_type: "EmitInsight".to_string(), requires_capability: None },
                ],
                forbidden: vec![],
            },
            behavioral_invariants: vec![],
            parallelization: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aow_core::{Affordance, AffordanceParams, Decision, SchemaParamValidator};
    use aow_policy::PolicyEngine;
    use aow_provenance::{InMemoryCheckpointStore, InMemoryTraceStore};
    use aow_reasoner::ScriptedReasoner;
    use aow_runtime::{AffordanceTemplate, EffectHandler, NoopEffectHandler};
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    fn build_broker() -> (Arc<AatRegistry>, Arc<ContextBroker>) {
        let mut registry = AatRegistry::new();
        for aat in default_archetypes() {
            registry.register(aat).unwrap();
        }
        let aat_registry = Arc::new(registry);

        let policy_engine = Arc::new(PolicyEngine::new());
        let validator = Arc::new(SchemaParamValidator::default());
        let trace_store = Arc::new(InMemoryTraceStore::default());
        let mut broker = ContextBroker::new(aat_registry.clone(), policy_engine, validator, trace_store);

        broker.register_affordance(AffordanceTemplate {
            affordance: Affordance {
                id: "emit-plan".to_string(),
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
        broker.register_affordance(AffordanceTemplate {
            affordance: Affordance {
                id: "act".to_string(),
                action_type: "Act".to_string(),
                rel: "next".to_string(),
                target: "/act".to_string(),
                params: AffordanceParams::default(),
                requires_credential: vec![],
                effects: vec![],
                enabled: true,
            },
            constraints: vec![],
        });
        broker.register_affordance(AffordanceTemplate {
            affordance: Affordance {
                id: "store".to_string(),
                action_type: "Store".to_string(),
                rel: "next".to_string(),
                target: "/store".to_string(),
                params: AffordanceParams::default(),
                requires_credential: vec![],
                effects: vec![],
                enabled: true,
            },
            constraints: vec![],
        });

        struct EchoEffectHandler;
        #[async_trait]
        impl EffectHandler for EchoEffectHandler {
            async fn handle(
                &self,
                affordance: &Affordance,
                parameters: &Map<String, serde_json::Value>,
                _credentials: &Credentials,
            ) -> AowResult<serde_json::Value> {
                Ok(json!({ "action": affordance.action_type, "echo": parameters }))
            }
        }
        broker.register_effect_handler("EmitPlan", Arc::new(EchoEffectHandler));
        broker.register_effect_handler("Act", Arc::new(EchoEffectHandler));
        broker.register_effect_handler("Store", Arc::new(NoopEffectHandler));

        (aat_registry, Arc::new(broker))
    }

    /// Scenario 1: plan → execute → archive (parallel).
    #[tokio::test]
    async fn parallel_plan_drives_workflow_to_completion() {
        let (aat_registry, broker) = build_broker();
        let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new(vec![Decision::refusal("planner defers to structural enforcement")]));
        let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());

        let orchestrator = OrchestratorBuilder::new(aat_registry, broker, reasoner, checkpoint_store).build();

        let goal = Goal::new("G").with_parallel_execution(true);
        let workflow_id = orchestrator.submit_goal(goal);

        // Drive enough ticks for plan -> 2 executes -> archive, yielding
        // between ticks so spawned per-task futures get to run.
        for _ in 0..20 {
            orchestrator.tick().await.unwrap();
            tokio::task::yield_now().await;
        }

        let workflow = orchestrator.workflow(workflow_id).unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);

        let executes = workflow
            .task_ids
            .iter()
            .filter(|id| orchestrator.task(**id).map(|t| t.task_type == TaskType::Execute).unwrap_or(false))
            .count();
        assert_eq!(executes, 2);

        let archive = workflow
            .task_ids
            .iter()
            .filter_map(|id| orchestrator.task(*id))
            .find(|t| t.task_type == TaskType::Archive)
            .unwrap();
        assert_eq!(archive.dependencies.len(), 2);
    }

    #[test]
    fn submit_goal_creates_a_plan_task() {
        let (aat_registry, broker) = build_broker();
        let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new(vec![]));
        let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = OrchestratorBuilder::new(aat_registry, broker, reasoner, checkpoint_store).build();

        let workflow_id = orchestrator.submit_goal(Goal::new("G"));
        let workflow = orchestrator.workflow(workflow_id).unwrap();
        assert_eq!(workflow.task_ids.len(), 1);
        assert_eq!(orchestrator.task(workflow.task_ids[0]).unwrap().task_type, TaskType::Plan);
    }

    /// Scenario 6: checkpoint / resume.
    #[tokio::test]
    async fn checkpoint_then_resume_restores_task_statuses() {
        let (aat_registry, broker) = build_broker();
        let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new(vec![]));
        let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = OrchestratorBuilder::new(aat_registry, broker, reasoner, checkpoint_store).build();

        let workflow_id = orchestrator.submit_goal(Goal::new("G"));
        let plan_task_id = orchestrator.workflow(workflow_id).unwrap().task_ids[0];

        // Fabricate 2 completed + 3 queued tasks under the same workflow.
        let mut extra_ids = Vec::new();
        for i in 0..5 {
            let mut task = Task::new(workflow_id, TaskType::Execute, json!({ "i": i }));
            if i < 2 {
                task.status = TaskStatus::Completed;
            }
            extra_ids.push(task.id);
            orchestrator.inner.tasks.insert(task.id, task);
        }
        {
            let mut workflow = orchestrator.inner.workflows.get_mut(&workflow_id).unwrap();
            workflow.task_ids.extend(extra_ids.iter().cloned());
        }
        {
            let mut plan_task = orchestrator.inner.tasks.get_mut(&plan_task_id).unwrap();
            plan_task.status = TaskStatus::Completed;
        }

        let checkpoint = orchestrator.checkpoint(workflow_id).await.unwrap();
        assert_eq!(checkpoint.agent_state.completed_task_ids.len(), 3); // plan + 2 executes
        assert_eq!(checkpoint.agent_state.task_queue.len(), 3);

        // "Destroy" in-memory status by resetting everything to queued.
        for id in &extra_ids {
            orchestrator.inner.tasks.get_mut(id).unwrap().status = TaskStatus::Queued;
        }

        orchestrator.resume(checkpoint.id).await.unwrap();

        let completed_after = extra_ids.iter().filter(|id| orchestrator.task(**id).unwrap().status == TaskStatus::Completed).count();
        assert_eq!(completed_after, 2);
    }

    #[test]
    fn priority_breaks_ties_by_earliest_creation() {
        let task_type = TaskType::Execute;
        let mut high = Task::new(Uuid::new_v4(), task_type, serde_json::Value::Null);
        high.priority = Priority::High;
        let mut low = Task::new(Uuid::new_v4(), task_type, serde_json::Value::Null);
        low.priority = Priority::Low;
        assert!(high.priority > low.priority);
    }
}
