//! External collaborator interfaces the core consumes (§6).
//!
//! The core never implements these itself — `aow-reasoner`, `aow-provenance`,
//! and `aow-orchestrator` each carry at least one concrete implementation so
//! the workspace is runnable and testable standalone.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AowResult;
use crate::model::{Checkpoint, ContextView, Decision, Task, Trace, TraceQuery};

/// Proposes the next action for an Agent Runtime iteration.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason_about_context(
        &self,
        system_prompt: &str,
        view: &ContextView,
        task: &Task,
        previous_actions: &[Decision],
    ) -> AowResult<Decision>;

    /// Optional: executor archetype only. Default implementation reports no
    /// tool-execution capability, matching "treated as optional" in §6.
    async fn run_with_tools(
        &self,
        _task: &Task,
        _allowed_tools: &[String],
    ) -> AowResult<ToolRunOutcome> {
        Ok(ToolRunOutcome {
            success: false,
            output: None,
            error: Some("tool execution not supported by this reasoner".to_string()),
        })
    }

    fn supports_tools(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct ToolRunOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Parameter validation against an affordance's declared schema, called
/// inside the Context Broker's `TRAVERSE`.
pub trait ParamValidator: Send + Sync {
    fn validate(&self, action_type: &str, params: &HashMap<String, Value>) -> ValidationOutcome;
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub violations: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self { ok: true, violations: Vec::new() }
    }

    pub fn deny(violations: Vec<String>) -> Self {
        Self { ok: false, violations }
    }
}

/// Append-only trace storage (§4.3).
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Fails if a trace with that id already exists (idempotent rejection).
    async fn store(&self, trace: Trace) -> AowResult<()>;
    async fn query(&self, query: TraceQuery) -> AowResult<Vec<Trace>>;
    async fn get_by_id(&self, id: Uuid) -> AowResult<Option<Trace>>;
}

/// Workflow checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create(&self, checkpoint: Checkpoint) -> AowResult<Checkpoint>;
    async fn resume(&self, id: Uuid) -> AowResult<Option<Checkpoint>>;
    async fn prune_keep_latest(&self, workflow_id: Uuid, n: usize) -> AowResult<()>;
}

#[derive(Debug, Clone)]
pub struct Enclave {
    pub id: Uuid,
    pub agent_did: String,
    pub scope: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Optional isolation service; the core proceeds without enclaves when no
/// repository is configured.
#[async_trait]
pub trait EnclaveService: Send + Sync {
    async fn create(
        &self,
        agent_did: &str,
        scope: Option<&str>,
        ttl_seconds: u64,
    ) -> AowResult<Enclave>;
    async fn seal(&self, id: Uuid) -> AowResult<()>;
    async fn cleanup_expired(&self) -> AowResult<usize>;
}
