//! Policy & Action-Space Engine (§4.2): a deontic rule evaluator over the
//! agent's AAT, the ContextView's inline constraints, and a proposed
//! `(affordanceId, parameters)` pair.

use std::collections::HashMap;

use aow_core::{
    condition::{evaluate_condition, DeonticModality},
    AatRegistry, Condition, ConstraintEnforcement, ConstraintType, ContextView,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub effect: Effect,
    pub priority: i32,
    #[serde(default)]
    pub applies_to_actions: Vec<String>,
    #[serde(default)]
    pub applies_to_agent_types: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Rule {
    fn filters_agree(&self, action_type: &str, agent_type: &str) -> bool {
        let action_ok = self.applies_to_actions.is_empty()
            || self.applies_to_actions.iter().any(|a| a == action_type);
        let agent_ok = self.applies_to_agent_types.is_empty()
            || self.applies_to_agent_types.iter().any(|a| a == agent_type);
        action_ok && agent_ok
    }

    /// A rule matches iff its filters agree and all its conditions are true
    /// over the evaluation root.
    fn matches(&self, action_type: &str, agent_type: &str, root: &Value) -> bool {
        if !self.filters_agree(action_type, agent_type) {
            return false;
        }
        self.conditions.iter().all(|c| evaluate_condition(root, c))
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    pub allow: bool,
    pub deny_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub audit_log: Vec<String>,
}

impl PolicyEvaluation {
    fn allow() -> Self {
        Self { allow: true, deny_reasons: vec![], warnings: vec![], audit_log: vec![] }
    }
}

/// Evaluates rules and deontic constraints for a proposed
/// `(agent, action, params)` triple (§4.2). Construction always seeds the
/// built-in rules named in the spec; callers add their own on top.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    rules: Vec<Rule>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        let mut engine = Self { rules: Vec::new() };
        for rule in built_in_rules() {
            engine.add_rule(rule);
        }
        engine
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// `evaluate(ctx, aff, params)` — a pure function of its inputs and the
    /// installed rule set (P-Policy-determinism).
    pub fn evaluate(
        &self,
        view: &ContextView,
        affordance_id: &str,
        params: &HashMap<String, Value>,
        agent_aat_id: &str,
    ) -> PolicyEvaluation {
        let Some(affordance) = view.find_affordance(affordance_id) else {
            return PolicyEvaluation {
                allow: false,
                deny_reasons: vec![format!("affordance '{}' not found in context view", affordance_id)],
                warnings: vec![],
                audit_log: vec![],
            };
        };
        if !affordance.enabled {
            return PolicyEvaluation {
                allow: false,
                deny_reasons: vec![format!("affordance '{}' is disabled", affordance_id)],
                warnings: vec![],
                audit_log: vec![],
            };
        }

        let root = serde_json::json!({
            "context": context_root(view),
            "affordance": affordance,
            "parameters": params,
        });

        let mut evaluation = PolicyEvaluation::allow();

        let mut applicable: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.matches(&affordance.action_type, agent_aat_id, &root))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in applicable {
            if rule.effect == Effect::Deny {
                evaluation.allow = false;
                evaluation.deny_reasons.push(format!("{} ({})", rule.name, rule.id));
            }
            // Allow-rules never short-circuit: every deny-rule must still run.
        }

        for constraint in &view.constraints {
            let holds = constraint
                .condition
                .as_ref()
                .map(|c| evaluate_condition(&root, c))
                .unwrap_or(false);

            let violated = match constraint.modality {
                DeonticModality::Prohibition => holds,
                DeonticModality::Obligation => !holds,
                DeonticModality::Permission => false,
            };

            if !violated {
                continue;
            }

            match constraint.enforcement_level {
                ConstraintEnforcement::Strict => {
                    evaluation.allow = false;
                    evaluation
                        .deny_reasons
                        .push(format!("constraint '{}' violated: {}", constraint.id, constraint.rule));
                }
                ConstraintEnforcement::Advisory => {
                    evaluation
                        .warnings
                        .push(format!("constraint '{}' violated: {}", constraint.id, constraint.rule));
                }
                ConstraintEnforcement::AuditOnly => {
                    evaluation
                        .audit_log
                        .push(format!("constraint '{}' violated: {}", constraint.id, constraint.rule));
                }
            }

            let _ = ConstraintType::Deontic; // constraint_type is informational here
        }

        evaluation
    }
}

fn context_root(view: &ContextView) -> Value {
    let mut root = serde_json::to_value(view).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut root {
        for (k, v) in &view.custom {
            map.insert(k.clone(), v.clone());
        }
    }
    root
}

/// `AatRegistry`-aware convenience wrapper for the archetype-specific
/// built-in denials (planner-cannot-act, observer-cannot-mutate) that need
/// to know the agent's AAT rather than just its raw id string.
pub fn is_archetype_denied(aat_registry: &AatRegistry, aat_id: &str, action_type: &str) -> bool {
    aat_registry.is_action_forbidden(aat_id, action_type)
}

/// Built-in rules that must be present, per §4.2.
fn built_in_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "deny-unconfirmed-destructive".to_string(),
            name: "destructive actions require confirmation".to_string(),
            effect: Effect::Deny,
            priority: 100,
            applies_to_actions: vec!["Delete".to_string()],
            applies_to_agent_types: vec![],
            conditions: vec![Condition {
                field: "parameters.confirmed".to_string(),
                op: aow_core::Operator::Neq,
                value: Value::Bool(true),
            }],
        },
        Rule {
            id: "deny-protected-path-write".to_string(),
            name: "writes to protected paths are denied".to_string(),
            effect: Effect::Deny,
            priority: 100,
            applies_to_actions: vec![],
            applies_to_agent_types: vec![],
            conditions: vec![Condition {
                field: "parameters.target".to_string(),
                op: aow_core::Operator::Matches,
                value: Value::String(r"^/?(system|protected|\.env|credentials)".to_string()),
            }],
        },
        Rule {
            id: "deny-external-write-without-approval".to_string(),
            name: "external-write actions require approval".to_string(),
            effect: Effect::Deny,
            priority: 90,
            applies_to_actions: vec!["ExternalWrite".to_string()],
            applies_to_agent_types: vec![],
            conditions: vec![Condition {
                field: "context.hasApproval".to_string(),
                op: aow_core::Operator::Neq,
                value: Value::Bool(true),
            }],
        },
        Rule {
            id: "deny-planner-executor-actions".to_string(),
            name: "planner archetype is denied executor-style actions".to_string(),
            effect: Effect::Deny,
            priority: 80,
            applies_to_actions: vec!["Act".to_string()],
            applies_to_agent_types: vec!["planner".to_string()],
            conditions: vec![],
        },
        Rule {
            id: "deny-observer-mutation".to_string(),
            name: "observer archetype is denied mutating actions".to_string(),
            effect: Effect::Deny,
            priority: 80,
            applies_to_actions: vec!["Act".to_string(), "Delete".to_string(), "Store".to_string()],
            applies_to_agent_types: vec!["observer".to_string()],
            conditions: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aow_core::{Affordance, AffordanceParams, Constraint, ConstraintType, DeonticModality};
    use chrono::Utc;
    use uuid::Uuid;

    fn affordance(id: &str, action_type: &str, enabled: bool) -> Affordance {
        Affordance {
            id: id.to_string(),
            action_type: action_type.to_string(),
            rel: "next".to_string(),
            target: "/thing".to_string(),
            params: AffordanceParams::default(),
            requires_credential: vec![],
            effects: vec![],
            enabled,
        }
    }

    fn view(affordances: Vec<Affordance>, constraints: Vec<Constraint>) -> ContextView {
        ContextView {
            id: Uuid::new_v4(),
            agent_did: "did:example:1".into(),
            agent_type: "executor".into(),
            timestamp: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
            nonce: Uuid::new_v4(),
            scope: None,
            verified_credentials: vec![],
            constraints,
            affordances,
            structural_requirements: None,
            trace_policy: aow_core::TracePolicy::Always,
            custom: HashMap::new(),
        }
    }

    #[test]
    fn denies_unconfirmed_destructive_action() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Delete", true)], vec![]);
        let mut params = HashMap::new();
        params.insert("confirmed".to_string(), Value::Bool(false));

        let eval = engine.evaluate(&v, "a1", &params, "executor");
        assert!(!eval.allow);
        assert!(eval.deny_reasons.iter().any(|r| r.contains("deny-unconfirmed-destructive")));
    }

    #[test]
    fn allows_confirmed_destructive_action() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Delete", true)], vec![]);
        let mut params = HashMap::new();
        params.insert("confirmed".to_string(), Value::Bool(true));

        let eval = engine.evaluate(&v, "a1", &params, "executor");
        assert!(eval.allow);
    }

    #[test]
    fn denies_protected_path_writes() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Act", true)], vec![]);
        let mut params = HashMap::new();
        params.insert("target".to_string(), Value::String("/system/config".to_string()));

        let eval = engine.evaluate(&v, "a1", &params, "executor");
        assert!(!eval.allow);
    }

    #[test]
    fn denies_planner_executor_style_action() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Act", true)], vec![]);
        let eval = engine.evaluate(&v, "a1", &HashMap::new(), "planner");
        assert!(!eval.allow);
    }

    #[test]
    fn denies_observer_mutation() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Store", true)], vec![]);
        let eval = engine.evaluate(&v, "a1", &HashMap::new(), "observer");
        assert!(!eval.allow);
    }

    #[test]
    fn missing_affordance_denies() {
        let engine = PolicyEngine::new();
        let v = view(vec![], vec![]);
        let eval = engine.evaluate(&v, "ghost", &HashMap::new(), "executor");
        assert!(!eval.allow);
    }

    #[test]
    fn disabled_affordance_denies() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Act", false)], vec![]);
        let eval = engine.evaluate(&v, "a1", &HashMap::new(), "executor");
        assert!(!eval.allow);
    }

    #[test]
    fn strict_constraint_violation_denies() {
        let engine = PolicyEngine::empty();
        let constraint = Constraint {
            id: "must-have-budget".to_string(),
            constraint_type: ConstraintType::Deontic,
            rule: "must have budget remaining".to_string(),
            enforcement_level: ConstraintEnforcement::Strict,
            modality: DeonticModality::Obligation,
            condition: Some(Condition {
                field: "context.hasBudget".to_string(),
                op: aow_core::Operator::Eq,
                value: Value::Bool(true),
            }),
        };
        let v = view(vec![affordance("a1", "Act", true)], vec![constraint]);
        let eval = engine.evaluate(&v, "a1", &HashMap::new(), "executor");
        assert!(!eval.allow);
    }

    #[test]
    fn advisory_constraint_violation_warns_but_allows() {
        let engine = PolicyEngine::empty();
        let constraint = Constraint {
            id: "prefer-small-batches".to_string(),
            constraint_type: ConstraintType::Deontic,
            rule: "should not exceed 100 items".to_string(),
            enforcement_level: ConstraintEnforcement::Advisory,
            modality: DeonticModality::Prohibition,
            condition: Some(Condition {
                field: "parameters.count".to_string(),
                op: aow_core::Operator::Gt,
                value: Value::from(100),
            }),
        };
        let v = view(vec![affordance("a1", "Act", true)], vec![constraint]);
        let mut params = HashMap::new();
        params.insert("count".to_string(), Value::from(150));

        let eval = engine.evaluate(&v, "a1", &params, "executor");
        assert!(eval.allow);
        assert_eq!(eval.warnings.len(), 1);
    }

    #[test]
    fn permission_modality_never_fails() {
        let engine = PolicyEngine::empty();
        let constraint = Constraint {
            id: "may-skip".to_string(),
            constraint_type: ConstraintType::Deontic,
            rule: "may skip validation".to_string(),
            enforcement_level: ConstraintEnforcement::Strict,
            modality: DeonticModality::Permission,
            condition: Some(Condition {
                field: "parameters.count".to_string(),
                op: aow_core::Operator::Gt,
                value: Value::from(0),
            }),
        };
        let v = view(vec![affordance("a1", "Act", true)], vec![constraint]);
        let mut params = HashMap::new();
        params.insert("count".to_string(), Value::from(5));

        let eval = engine.evaluate(&v, "a1", &params, "executor");
        assert!(eval.allow);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let engine = PolicyEngine::new();
        let v = view(vec![affordance("a1", "Delete", true)], vec![]);
        let mut params = HashMap::new();
        params.insert("confirmed".to_string(), Value::Bool(false));

        let e1 = engine.evaluate(&v, "a1", &params, "executor");
        let e2 = engine.evaluate(&v, "a1", &params, "executor");
        assert_eq!(e1.allow, e2.allow);
        assert_eq!(e1.deny_reasons, e2.deny_reasons);
    }
}
