//! Agent Runtime and Context Broker (§4.4, §4.5): the per-agent decision
//! loop and the component that issues and mediates `ContextView`s for it.

pub mod broker;
pub mod runtime;

pub use broker::{AffordanceTemplate, ContextBroker, EffectHandler, NoopEffectHandler, TraverseOutcome};
pub use runtime::{AgentRuntime, RunOutcome};
