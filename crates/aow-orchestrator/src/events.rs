//! `OrchestratorEvent` (§9 design note): a tagged-variant event enum
//! broadcast over a single channel, mirroring the teacher's `FleetEvent`.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    WorkflowSubmitted { workflow_id: Uuid },
    AgentSpawned { agent_id: Uuid, aat_id: String },
    TaskDispatched { task_id: Uuid, agent_id: Uuid, aat_id: String },
    DispatchSkipped { aat_id: String, reason: String },
    ResourceLimitReached { detail: String },
    TaskCompleted { task_id: Uuid, workflow_id: Uuid },
    TaskFailed { task_id: Uuid, workflow_id: Uuid, error: String },
    WorkflowCompleted { workflow_id: Uuid },
    WorkflowFailed { workflow_id: Uuid, error: String },
    CheckpointCreated { workflow_id: Uuid, checkpoint_id: Uuid },
    EnclaveCleanup { expired_count: usize },
}
