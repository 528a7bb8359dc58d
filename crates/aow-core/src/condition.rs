//! Declarative condition evaluation shared by the Policy Engine's rules and
//! by inline/registered deontic constraints on a `ContextView`.
//!
//! `Condition` is deliberately a flat `{field, op, value}` triple rather than
//! a boolean-expression tree: the spec's rule grammar only names these
//! operators, and an evaluation context's fields are resolved via a dotted
//! path into a combined `{context, affordance, parameters}` JSON view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    In,
    NotIn,
    Contains,
    Matches,
    Gt,
    Lt,
    Gte,
    Lte,
    Exists,
    NotExists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Value,
}

/// The modality a deontic constraint is evaluated under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeonticModality {
    Prohibition,
    Obligation,
    #[default]
    Permission,
}

/// Resolve a dotted path (`"parameters.confirmed"`, `"context.hasApproval"`)
/// against a JSON value built from `{context, affordance, parameters}`.
pub fn resolve_field<'a>(root: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Evaluate a single condition against the resolved evaluation context.
pub fn evaluate_condition(root: &Value, condition: &Condition) -> bool {
    let resolved = resolve_field(root, &condition.field);

    match condition.op {
        Operator::Exists => resolved.is_some(),
        Operator::NotExists => resolved.is_none(),
        Operator::Eq => resolved.map(|v| v == &condition.value).unwrap_or(false),
        Operator::Neq => resolved.map(|v| v != &condition.value).unwrap_or(true),
        Operator::In => match (resolved, condition.value.as_array()) {
            (Some(v), Some(arr)) => arr.contains(v),
            _ => false,
        },
        Operator::NotIn => match (resolved, condition.value.as_array()) {
            (Some(v), Some(arr)) => !arr.contains(v),
            _ => true,
        },
        Operator::Contains => match resolved {
            Some(Value::Array(arr)) => arr.contains(&condition.value),
            Some(Value::String(s)) => condition
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            _ => false,
        },
        Operator::Matches => match (resolved.and_then(|v| v.as_str()), condition.value.as_str()) {
            (Some(s), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(s))
                .unwrap_or(false),
            _ => false,
        },
        Operator::Gt => match (resolved.and_then(as_number), as_number(&condition.value)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        Operator::Lt => match (resolved.and_then(as_number), as_number(&condition.value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        Operator::Gte => match (resolved.and_then(as_number), as_number(&condition.value)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        },
        Operator::Lte => match (resolved.and_then(as_number), as_number(&condition.value)) {
            (Some(a), Some(b)) => a <= b,
            _ => false,
        },
    }
}
