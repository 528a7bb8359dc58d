//! aow-core: data model, AAT registry, error taxonomy, and the external
//! collaborator trait definitions shared by the rest of the workspace.

pub mod aat;
pub mod condition;
pub mod error;
pub mod model;
pub mod registry;
pub mod schema;
pub mod traits;

pub use aat::{AatRegistry, AffordanceValidation};
pub use condition::{evaluate_condition, resolve_field, Condition, DeonticModality, Operator};
pub use error::{AowError, AowResult};
pub use model::{
    Aat, ActionRecord, ActionSpace, Affordance, AffordanceParams, AgentInstance,
    AgentInstanceStatus, AgentState, AllowedAction, AssociatedAgent, BehavioralInvariant,
    Checkpoint, Constraint, ConstraintEnforcement, ConstraintType, ContextView, Credentials,
    Decision, EnforcementLevel, ForbiddenAction, Generated, Goal, GoalOptions, Outcome,
    OutcomeStatus, ParallelizationRules, Priority, StructuralRequirements, Task, TaskResult,
    TaskResultStatus, TaskStatus, TaskType, TokenUsage, Trace, TracePolicy, TraceQuery,
    UsedContext, Workflow, WorkflowStatus,
};
pub use registry::{AatRegistryStore, Registry};
pub use schema::{ParamSchema, ParamType, SchemaParamValidator};
pub use traits::{
    CheckpointStore, Enclave, EnclaveService, ParamValidator, Reasoner, ToolRunOutcome,
    TraceStore, ValidationOutcome,
};
