//! Context Broker (§4.4): issues single-use `ContextView`s and mediates every
//! effectful traversal through parameter validation, policy re-evaluation,
//! the registered effect handler, and trace persistence.

use std::collections::HashMap;
use std::sync::Arc;

use aow_core::{
    Affordance, AowError, AowResult, Constraint, ContextView, Credentials, ParamValidator,
    StructuralRequirements, Trace, TraceStore, TracePolicy, AatRegistry,
};
use aow_policy::PolicyEngine;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handles one `actionType`'s side effect during `TRAVERSE`. Registered per
/// action type; the core ships none — callers wire in whatever `Act`,
/// `Store`, `QueryData`, etc. mean in their deployment.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    async fn handle(
        &self,
        affordance: &Affordance,
        parameters: &HashMap<String, Value>,
        credentials: &Credentials,
    ) -> AowResult<Value>;
}

/// An `EffectHandler` that always succeeds with `null`, useful for
/// affordances the caller wants traversable but inert (e.g. `Approve`).
pub struct NoopEffectHandler;

#[async_trait]
impl EffectHandler for NoopEffectHandler {
    async fn handle(
        &self,
        _affordance: &Affordance,
        _parameters: &HashMap<String, Value>,
        _credentials: &Credentials,
    ) -> AowResult<Value> {
        Ok(Value::Null)
    }
}

#[derive(Debug)]
pub struct TraverseOutcome {
    pub success: bool,
    pub trace_id: Uuid,
    pub result: Option<Value>,
    pub error: Option<String>,
}

const VIEW_TTL_SECONDS: i64 = 300;

/// Global catalog entry: one potential affordance plus the archetypes
/// allowed to see it, independent of any one agent's runtime state.
#[derive(Clone)]
pub struct AffordanceTemplate {
    pub affordance: Affordance,
    pub constraints: Vec<Constraint>,
}

pub struct ContextBroker {
    aat_registry: Arc<AatRegistry>,
    policy_engine: Arc<PolicyEngine>,
    param_validator: Arc<dyn ParamValidator>,
    trace_store: Arc<dyn TraceStore>,
    effect_handlers: DashMap<String, Arc<dyn EffectHandler>>,
    catalog: Vec<AffordanceTemplate>,
    issued_views: DashMap<Uuid, ContextView>,
}

impl ContextBroker {
    pub fn new(
        aat_registry: Arc<AatRegistry>,
        policy_engine: Arc<PolicyEngine>,
        param_validator: Arc<dyn ParamValidator>,
        trace_store: Arc<dyn TraceStore>,
    ) -> Self {
        Self {
            aat_registry,
            policy_engine,
            param_validator,
            trace_store,
            effect_handlers: DashMap::new(),
            catalog: Vec::new(),
            issued_views: DashMap::new(),
        }
    }

    pub fn register_affordance(&mut self, template: AffordanceTemplate) {
        self.catalog.push(template);
    }

    pub fn register_effect_handler(&self, action_type: impl Into<String>, handler: Arc<dyn EffectHandler>) {
        self.effect_handlers.insert(action_type.into(), handler);
    }

    /// `GET-CONTEXT(agentDID, credentials)`.
    pub fn get_context(&self, agent_did: &str, agent_aat_id: &str, credentials: &Credentials) -> ContextView {
        let now = Utc::now();
        let mut affordances = Vec::new();
        let mut constraints = Vec::new();

        for template in &self.catalog {
            if !self.aat_registry.is_action_allowed(agent_aat_id, &template.affordance.action_type) {
                continue;
            }
            if self.aat_registry.is_action_forbidden(agent_aat_id, &template.affordance.action_type) {
                continue;
            }
            let credentials_ok = template
                .affordance
                .requires_credential
                .iter()
                .all(|needed| credentials.capabilities.iter().any(|c| c == needed));
            if !credentials_ok {
                continue;
            }
            affordances.push(template.affordance.clone());
            constraints.extend(template.constraints.clone());
        }

        let structural_requirements = self
            .aat_registry
            .get_required_output_action(agent_aat_id)
            .map(|required_output_action| StructuralRequirements {
                required_output_action: Some(required_output_action),
            });

        ContextView {
            id: Uuid::new_v4(),
            agent_did: agent_did.to_string(),
            agent_type: agent_aat_id.to_string(),
            timestamp: now,
            expires_at: now + Duration::seconds(VIEW_TTL_SECONDS),
            nonce: Uuid::new_v4(),
            scope: None,
            verified_credentials: credentials.capabilities.clone(),
            constraints,
            affordances,
            structural_requirements,
            trace_policy: TracePolicy::Always,
            custom: HashMap::new(),
        }
    }

    fn issue(&self, view: ContextView) -> ContextView {
        self.issued_views.insert(view.id, view.clone());
        view
    }

    /// Convenience: builds and registers a view in one call, mirroring how
    /// the Agent Runtime consumes this API (it never holds a view beyond a
    /// single iteration).
    pub fn issue_context(&self, agent_did: &str, agent_aat_id: &str, credentials: &Credentials) -> ContextView {
        let view = self.get_context(agent_did, agent_aat_id, credentials);
        self.issue(view)
    }

    /// `TRAVERSE(contextId, affordanceId, parameters, credentials)`.
    pub async fn traverse(
        &self,
        context_id: Uuid,
        affordance_id: &str,
        parameters: HashMap<String, Value>,
        credentials: &Credentials,
        agent_aat_id: &str,
    ) -> AowResult<TraverseOutcome> {
        let started_at = Utc::now();
        debug!(%context_id, affordance_id, "traverse requested");

        let view = self
            .issued_views
            .get(&context_id)
            .map(|v| v.clone())
            .ok_or_else(|| AowError::context_expired("unknown contextId"))?;

        if view.is_expired(Utc::now()) {
            self.issued_views.remove(&context_id);
            return Err(AowError::context_expired("context view has expired"));
        }

        // P-AAT-allow (§4.1/§8): a forbidden action must fail with
        // `aat-violation`, not `affordance-unknown` — so this is checked
        // against the full catalog before falling back to the view's
        // (already AAT-filtered) affordance list.
        if let Some(template) = self.catalog.iter().find(|t| t.affordance.id == affordance_id) {
            if self.aat_registry.is_action_forbidden(agent_aat_id, &template.affordance.action_type) {
                return Err(AowError::aat_violation(format!(
                    "archetype '{}' is forbidden from action '{}'",
                    agent_aat_id, template.affordance.action_type
                )));
            }
        }

        let affordance = view
            .find_affordance(affordance_id)
            .cloned()
            .ok_or_else(|| AowError::affordance_unknown(affordance_id))?;
        if !affordance.enabled {
            return Err(AowError::affordance_disabled(affordance_id));
        }

        let credentials_ok = affordance
            .requires_credential
            .iter()
            .all(|needed| credentials.capabilities.iter().any(|c| c == needed));
        if !credentials_ok {
            return Err(AowError::credentials_insufficient(format!(
                "affordance '{}' requires credentials not held by caller",
                affordance_id
            )));
        }

        let validation = self.param_validator.validate(&affordance.action_type, &parameters);
        if !validation.ok {
            return Err(AowError::params_invalid(validation.violations.join("; ")));
        }

        let policy_eval = self.policy_engine.evaluate(&view, affordance_id, &parameters, agent_aat_id);
        if !policy_eval.allow {
            warn!(affordance_id, reasons = ?policy_eval.deny_reasons, "policy denied traversal");
            return Err(AowError::policy(policy_eval.deny_reasons.join("; ")));
        }
        for warning in &policy_eval.warnings {
            warn!(affordance_id, %warning, "advisory constraint violated");
        }

        let handler = self.effect_handlers.get(&affordance.action_type).map(|h| h.clone());
        let (success, result, error) = match handler {
            Some(handler) => match handler.handle(&affordance, &parameters, credentials).await {
                Ok(value) => (true, Some(value), None),
                Err(err) => (false, None, Some(err.to_string())),
            },
            None => (false, None, Some(format!("no effect handler registered for '{}'", affordance.action_type))),
        };

        let ended_at = Utc::now();
        let trace = Trace {
            id: Uuid::new_v4(),
            started_at,
            ended_at,
            was_associated_with: aow_core::AssociatedAgent {
                agent_did: view.agent_did.clone(),
                agent_type: view.agent_type.clone(),
            },
            used: aow_core::UsedContext {
                context_snapshot_ref: view.id,
                affordance: affordance.id.clone(),
                parameters: parameters.clone(),
                credentials: credentials.did.clone(),
            },
            generated: aow_core::Generated {
                outcome: aow_core::Outcome {
                    status: if success { aow_core::OutcomeStatus::Success } else { aow_core::OutcomeStatus::Failure },
                    result_type: Some(affordance.action_type.clone()),
                },
                state_changes: vec![],
                events_emitted: vec![],
            },
            usage_event: None,
            intervention_label: None,
        };

        let trace_id = trace.id;
        self.trace_store.store(trace).await?;

        if success {
            Ok(TraverseOutcome { success: true, trace_id, result, error: None })
        } else if let Some(err) = error {
            Err(AowError::effect_failed(err))
        } else {
            Ok(TraverseOutcome { success: false, trace_id, result: None, error: Some("unknown effect failure".to_string()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aow_core::{Aat, ActionSpace, AllowedAction, AffordanceParams, SchemaParamValidator};
    use aow_provenance::InMemoryTraceStore;

    fn broker_with_act_affordance() -> ContextBroker {
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
        registry
            .register(Aat {
                id: "observer".to_string(),
                action_space: ActionSpace {
                    allowed: vec![],
                    forbidden: vec![aow_core::ForbiddenAction { action_type: "Act".to_string(), rationale: None }],
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
        broker.register_effect_handler("Act", Arc::new(NoopEffectHandler));
        broker
    }

    fn creds() -> Credentials {
        Credentials { did: "did:example:1".to_string(), capabilities: vec![], claims: HashMap::new() }
    }

    #[tokio::test]
    async fn get_context_filters_by_aat_allowed_actions() {
        let broker = broker_with_act_affordance();
        let view = broker.issue_context("did:example:1", "executor", &creds());
        assert_eq!(view.affordances.len(), 1);

        let view_unknown_aat = broker.issue_context("did:example:1", "ghost", &creds());
        assert!(view_unknown_aat.affordances.is_empty());
    }

    #[tokio::test]
    async fn traverse_unknown_context_id_fails_expired() {
        let broker = broker_with_act_affordance();
        let err = broker
            .traverse(Uuid::new_v4(), "act-1", HashMap::new(), &creds(), "executor")
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "context-expired");
    }

    #[tokio::test]
    async fn traverse_succeeds_and_stores_trace() {
        let broker = broker_with_act_affordance();
        let view = broker.issue_context("did:example:1", "executor", &creds());
        let outcome = broker
            .traverse(view.id, "act-1", HashMap::new(), &creds(), "executor")
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn traverse_unknown_affordance_fails() {
        let broker = broker_with_act_affordance();
        let view = broker.issue_context("did:example:1", "executor", &creds());
        let err = broker
            .traverse(view.id, "ghost", HashMap::new(), &creds(), "executor")
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "affordance-unknown");
    }

    /// P-AAT-allow (§8): a forbidden archetype/action pair must fail
    /// `traverse` with `aat-violation`, looked up from the full catalog
    /// rather than the (already AAT-filtered) context view.
    #[tokio::test]
    async fn traverse_forbidden_action_fails_aat_violation() {
        let broker = broker_with_act_affordance();
        let view = broker.issue_context("did:example:1", "executor", &creds());
        let err = broker
            .traverse(view.id, "act-1", HashMap::new(), &creds(), "observer")
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "aat-violation");
    }
}
