//! Core data model: Goal, Workflow, Task, AAT, Agent instance, ContextView,
//! Affordance, Trace, and the shared-context change/checkpoint envelope types.
//!
//! Field shapes follow the declarative resource style used across the
//! workspace (plain serde structs, `chrono::DateTime<Utc>` timestamps,
//! `Uuid` identifiers) rather than the Kubernetes-style `apiVersion/kind`
//! envelope used for AAT definitions — these are runtime records, not
//! declaratively authored resources.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Goal / Workflow / Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub options: GoalOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalOptions {
    #[serde(default)]
    pub enable_parallel_execution: bool,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            constraints: Vec::new(),
            priority: Priority::default(),
            options: GoalOptions::default(),
        }
    }

    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.options.enable_parallel_execution = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Planning,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub goal: Goal,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
    #[serde(default)]
    pub checkpoints: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub options: GoalOptions,
}

impl Workflow {
    pub fn new(goal: Goal) -> Self {
        let options = goal.options.clone();
        Self {
            id: Uuid::new_v4(),
            goal,
            status: WorkflowStatus::Planning,
            task_ids: Vec::new(),
            checkpoints: Vec::new(),
            created_at: Utc::now(),
            options,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Plan,
    Approve,
    Execute,
    Observe,
    Archive,
    Analyze,
}

impl TaskType {
    /// The archetype id that routes this task type, per the goal→task-DAG mapping.
    pub fn archetype(&self) -> &'static str {
        match self {
            TaskType::Plan => "planner",
            TaskType::Approve => "arbiter",
            TaskType::Execute => "executor",
            TaskType::Observe => "observer",
            TaskType::Archive => "archivist",
            TaskType::Analyze => "analyst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Ready,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub assigned_agent_id: Option<Uuid>,
    #[serde(default)]
    pub step_number: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(workflow_id: Uuid, task_type: TaskType, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            task_type,
            priority: Priority::default(),
            status: TaskStatus::Queued,
            dependencies: Vec::new(),
            input,
            output: None,
            assigned_agent_id: None,
            step_number: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// A task becomes ready only when every dependency is completed.
    pub fn is_ready(&self, completed: &std::collections::HashSet<Uuid>) -> bool {
        self.status == TaskStatus::Queued
            && self.dependencies.iter().all(|d| completed.contains(d))
    }

    pub fn mark_running(&mut self, agent_id: Uuid) {
        self.status = TaskStatus::Running;
        self.assigned_agent_id = Some(agent_id);
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// AAT (Abstract Agent Type)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub requires_capability: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpace {
    #[serde(default)]
    pub allowed: Vec<AllowedAction>,
    #[serde(default)]
    pub forbidden: Vec<ForbiddenAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Structural,
    Advisory,
    Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralInvariant {
    pub id: String,
    pub enforcement: EnforcementLevel,
    #[serde(default)]
    pub required_output_action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelizationRules {
    pub parallelizable: bool,
    pub max_concurrent: u32,
    #[serde(default)]
    pub requires_isolation: bool,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default)]
    pub preferred_enclave_scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aat {
    pub id: String,
    #[serde(default)]
    pub action_space: ActionSpace,
    #[serde(default)]
    pub behavioral_invariants: Vec<BehavioralInvariant>,
    #[serde(default)]
    pub parallelization: Option<ParallelizationRules>,
}

// ---------------------------------------------------------------------------
// Agent instance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentInstanceStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub did: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub claims: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: Uuid,
    pub did: String,
    pub aat_id: String,
    pub credentials: Credentials,
    pub status: AgentInstanceStatus,
    pub busy: bool,
    #[serde(default)]
    pub current_task_id: Option<Uuid>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl AgentInstance {
    pub fn new(aat_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4(),
            did: credentials.did.clone(),
            aat_id: aat_id.into(),
            credentials,
            status: AgentInstanceStatus::Idle,
            busy: false,
            current_task_id: None,
            token_usage: TokenUsage::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextView / Affordance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintType {
    Deontic,
    Outcome,
    Temporal,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintEnforcement {
    Strict,
    Advisory,
    AuditOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    /// Human-readable description of the rule, e.g. "requires approval for external writes".
    pub rule: String,
    pub enforcement_level: ConstraintEnforcement,
    /// The deontic modality this constraint is evaluated under when
    /// `constraint_type == Deontic` (§4.2). Defaults to `Permission`
    /// (never fails) for non-deontic constraint types.
    #[serde(default)]
    pub modality: crate::condition::DeonticModality,
    /// Structured condition backing `rule`, evaluated against
    /// `{context, affordance, parameters}`. A prohibition fails when this
    /// holds true; an obligation fails when it does not.
    #[serde(default)]
    pub condition: Option<crate::condition::Condition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffordanceParams {
    #[serde(default)]
    pub params_schema_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affordance {
    pub id: String,
    pub action_type: String,
    pub rel: String,
    pub target: String,
    #[serde(default)]
    pub params: AffordanceParams,
    #[serde(default)]
    pub requires_credential: Vec<String>,
    #[serde(default)]
    pub effects: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralRequirements {
    #[serde(default)]
    pub required_output_action: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TracePolicy {
    #[default]
    Always,
    OnFailureOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextView {
    pub id: Uuid,
    pub agent_did: String,
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nonce: Uuid,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub verified_credentials: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    pub affordances: Vec<Affordance>,
    #[serde(default)]
    pub structural_requirements: Option<StructuralRequirements>,
    #[serde(default)]
    pub trace_policy: TracePolicy,
    /// Ad-hoc flags the Policy Engine's rule conditions reference by dotted
    /// path (e.g. `context.hasApproval`); not part of the spec's literal
    /// ContextView field list but needed as a home for such flags.
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl ContextView {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn enabled_affordances(&self) -> impl Iterator<Item = &Affordance> {
        self.affordances.iter().filter(|a| a.enabled)
    }

    pub fn find_affordance(&self, id: &str) -> Option<&Affordance> {
        self.affordances.iter().find(|a| a.id == id)
    }

    pub fn required_output_action(&self) -> Option<&str> {
        self.structural_requirements
            .as_ref()
            .and_then(|r| r.required_output_action.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Decision / ActionRecord / TaskResult
// ---------------------------------------------------------------------------

/// Returned by the `Reasoner` (or synthesized by a deterministic archetype
/// shortcut) inside the Agent Runtime loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    #[serde(default)]
    pub selected_affordance_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default = "default_true")]
    pub should_continue: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Decision {
    pub fn refusal(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            selected_affordance_id: None,
            parameters: HashMap::new(),
            should_continue: false,
            message: None,
        }
    }

    pub fn traverse(affordance_id: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            selected_affordance_id: Some(affordance_id.into()),
            parameters: HashMap::new(),
            should_continue: true,
            message: None,
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Whether the reasoner declined to act: no affordance and refusal-shaped language.
    pub fn is_refusal(&self) -> bool {
        self.selected_affordance_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub affordance_id: String,
    pub action_type: String,
    pub parameters: HashMap<String, Value>,
    pub success: bool,
    pub result: Option<Value>,
    pub trace_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskResultStatus,
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub waiting_on: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Completed,
    Failed,
    Waiting,
}

// ---------------------------------------------------------------------------
// Trace / Provenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociatedAgent {
    pub agent_did: String,
    pub agent_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsedContext {
    pub context_snapshot_ref: Uuid,
    pub affordance: String,
    pub parameters: HashMap<String, Value>,
    pub credentials: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub result_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generated {
    pub outcome: Outcome,
    #[serde(default)]
    pub state_changes: Vec<String>,
    #[serde(default)]
    pub events_emitted: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub was_associated_with: AssociatedAgent,
    pub used: UsedContext,
    pub generated: Generated,
    #[serde(default)]
    pub usage_event: Option<String>,
    #[serde(default)]
    pub intervention_label: Option<String>,
}

impl Trace {
    pub fn action_type(&self) -> &str {
        &self.used.affordance
    }

    pub fn agent_did(&self) -> &str {
        &self.was_associated_with.agent_did
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    pub agent_did: Option<String>,
    pub action_type: Option<String>,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub task_queue: Vec<Uuid>,
    #[serde(default)]
    pub completed_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub working_memory: HashMap<String, Value>,
    #[serde(default)]
    pub current_goal: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub context_snapshot: Value,
    pub agent_state: AgentState,
    pub content_hash: String,
    #[serde(default)]
    pub supersedes: Option<Uuid>,
}

impl Checkpoint {
    /// Content-address the snapshot the same way the provenance store
    /// content-addresses traces: a stable hash over the serialized fields.
    pub fn compute_hash(workflow_id: Uuid, agent_state: &AgentState, context_snapshot: &Value) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        workflow_id.hash(&mut hasher);
        agent_state.task_queue.hash(&mut hasher);
        agent_state.completed_task_ids.hash(&mut hasher);
        context_snapshot.to_string().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_is_ready_only_when_dependencies_complete() {
        let wf = Uuid::new_v4();
        let dep = Uuid::new_v4();
        let task = Task::new(wf, TaskType::Execute, Value::Null).with_dependencies(vec![dep]);

        let mut completed = std::collections::HashSet::new();
        assert!(!task.is_ready(&completed));
        completed.insert(dep);
        assert!(task.is_ready(&completed));
    }

    #[test]
    fn task_type_routes_to_expected_archetype() {
        assert_eq!(TaskType::Plan.archetype(), "planner");
        assert_eq!(TaskType::Execute.archetype(), "executor");
        assert_eq!(TaskType::Approve.archetype(), "arbiter");
        assert_eq!(TaskType::Archive.archetype(), "archivist");
        assert_eq!(TaskType::Observe.archetype(), "observer");
        assert_eq!(TaskType::Analyze.archetype(), "analyst");
    }

    #[test]
    fn context_view_expiry() {
        let view = ContextView {
            id: Uuid::new_v4(),
            agent_did: "did:example:1".into(),
            agent_type: "executor".into(),
            timestamp: Utc::now() - chrono::Duration::seconds(10),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            nonce: Uuid::new_v4(),
            scope: None,
            verified_credentials: vec![],
            constraints: vec![],
            affordances: vec![],
            structural_requirements: None,
            trace_policy: TracePolicy::Always,
            custom: HashMap::new(),
        };
        assert!(view.is_expired(Utc::now()));
    }

    #[test]
    fn checkpoint_hash_is_stable_for_same_state() {
        let wf = Uuid::new_v4();
        let state = AgentState::default();
        let snap = Value::Null;
        let h1 = Checkpoint::compute_hash(wf, &state, &snap);
        let h2 = Checkpoint::compute_hash(wf, &state, &snap);
        assert_eq!(h1, h2);
    }
}
