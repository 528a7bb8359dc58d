//! Concurrent Orchestrator (§4.6): the goal-to-task-DAG scheduler with a
//! bounded worker pool, grounded on the teacher's `FleetCoordinator`.

pub mod dag;
pub mod enclave;
pub mod events;
pub mod orchestrator;
pub mod policy;

pub use enclave::NullEnclaveService;
pub use events::OrchestratorEvent;
pub use orchestrator::{default_archetypes, Orchestrator, OrchestratorBuilder};
pub use policy::{can_spawn, ConcurrencyPolicy, ResourceLimits, ResourceWindow};
