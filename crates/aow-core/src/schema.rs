//! A minimal `ParamValidator` implementation: checks a declared JSON-Schema
//! `type` and `required` list, not full JSON Schema. Full SHACL/JSON-Schema
//! validation is an external collaborator concern per §6; this is the
//! built-in fallback so the workspace is runnable standalone.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::{ParamValidator, ValidationOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub types: HashMap<String, ParamType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// Registered per `actionType`; an action type with no registered schema is
/// treated as valid (no declared constraints to violate).
#[derive(Debug, Default)]
pub struct SchemaParamValidator {
    schemas: HashMap<String, ParamSchema>,
}

impl SchemaParamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, action_type: impl Into<String>, schema: ParamSchema) -> Self {
        self.schemas.insert(action_type.into(), schema);
        self
    }

    pub fn register(&mut self, action_type: impl Into<String>, schema: ParamSchema) {
        self.schemas.insert(action_type.into(), schema);
    }
}

impl ParamValidator for SchemaParamValidator {
    fn validate(&self, action_type: &str, params: &HashMap<String, Value>) -> ValidationOutcome {
        let Some(schema) = self.schemas.get(action_type) else {
            return ValidationOutcome::ok();
        };

        let mut violations = Vec::new();
        let present: HashSet<&str> = params.keys().map(|s| s.as_str()).collect();

        for field in &schema.required {
            if !present.contains(field.as_str()) {
                violations.push(format!("missing required field '{}'", field));
            }
        }

        for (field, expected) in &schema.types {
            if let Some(value) = params.get(field) {
                if !expected.matches(value) {
                    violations.push(format!(
                        "field '{}' has wrong type, expected {:?}",
                        field, expected
                    ));
                }
            }
        }

        if violations.is_empty() {
            ValidationOutcome::ok()
        } else {
            ValidationOutcome::deny(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn unknown_action_type_is_valid() {
        let validator = SchemaParamValidator::new();
        let outcome = validator.validate("Anything", &HashMap::new());
        assert!(outcome.ok);
    }

    #[test]
    fn missing_required_field_is_a_violation() {
        let validator = SchemaParamValidator::new().with_schema(
            "Delete",
            ParamSchema { required: vec!["confirmed".to_string()], types: HashMap::new() },
        );
        let outcome = validator.validate("Delete", &HashMap::new());
        assert!(!outcome.ok);
        assert_eq!(outcome.violations.len(), 1);
    }

    #[test]
    fn wrong_type_is_a_violation() {
        let mut types = HashMap::new();
        types.insert("confirmed".to_string(), ParamType::Boolean);
        let validator = SchemaParamValidator::new()
            .with_schema("Delete", ParamSchema { required: vec![], types });

        let outcome = validator.validate("Delete", &params(&[("confirmed", json!("yes"))]));
        assert!(!outcome.ok);
    }

    #[test]
    fn satisfied_schema_is_valid() {
        let mut types = HashMap::new();
        types.insert("confirmed".to_string(), ParamType::Boolean);
        let validator = SchemaParamValidator::new().with_schema(
            "Delete",
            ParamSchema { required: vec!["confirmed".to_string()], types },
        );
        let outcome = validator.validate("Delete", &params(&[("confirmed", json!(true))]));
        assert!(outcome.ok);
    }
}
