//! AAT Registry (§4.1): static catalog of agent archetypes.

use std::path::Path;

use crate::error::AowResult;
use crate::model::{Aat, ParallelizationRules};
use crate::registry::{AatRegistryStore, Registry};

#[derive(Debug, Clone)]
pub struct AffordanceValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl AffordanceValidation {
    fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

/// Loads AAT definitions at startup and answers allow/forbid/parallelization
/// queries. Unknown AAT ⇒ all actions forbidden.
#[derive(Debug, Default)]
pub struct AatRegistry {
    store: AatRegistryStore,
}

impl AatRegistry {
    pub fn new() -> Self {
        Self { store: AatRegistryStore::new() }
    }

    pub fn load_directory(&mut self, path: &Path) -> AowResult<usize> {
        self.store.load_directory(path)
    }

    pub fn register(&mut self, aat: Aat) -> AowResult<()> {
        self.store.register(aat)
    }

    pub fn get_aat(&self, id: &str) -> Option<&Aat> {
        self.store.get(id)
    }

    pub fn is_action_allowed(&self, aat_id: &str, action_type: &str) -> bool {
        match self.get_aat(aat_id) {
            None => false,
            Some(aat) => {
                !self.is_action_forbidden(aat_id, action_type)
                    && aat
                        .action_space
                        .allowed
                        .iter()
                        .any(|a| a.action_type == action_type)
            }
        }
    }

    pub fn is_action_forbidden(&self, aat_id: &str, action_type: &str) -> bool {
        match self.get_aat(aat_id) {
            None => true,
            Some(aat) => aat
                .action_space
                .forbidden
                .iter()
                .any(|f| f.action_type == action_type),
        }
    }

    /// Reads the first structural invariant carrying a required-output tag;
    /// `None` if none.
    pub fn get_required_output_action(&self, aat_id: &str) -> Option<String> {
        let aat = self.get_aat(aat_id)?;
        aat.behavioral_invariants
            .iter()
            .find_map(|inv| inv.required_output_action.clone())
    }

    /// Returns explicit rules if declared, else a built-in default by archetype.
    pub fn get_parallelization_rules(&self, aat_id: &str) -> ParallelizationRules {
        if let Some(aat) = self.get_aat(aat_id) {
            if let Some(rules) = &aat.parallelization {
                return rules.clone();
            }
        }
        default_parallelization_rules(aat_id)
    }

    pub fn validate_affordance_for_aat(
        &self,
        aat_id: &str,
        action_type: &str,
    ) -> AffordanceValidation {
        if self.get_aat(aat_id).is_none() {
            return AffordanceValidation::deny(format!("unknown AAT '{}'", aat_id));
        }
        if self.is_action_forbidden(aat_id, action_type) {
            return AffordanceValidation::deny(format!(
                "action '{}' is forbidden for AAT '{}'",
                action_type, aat_id
            ));
        }
        if !self.is_action_allowed(aat_id, action_type) {
            return AffordanceValidation::deny(format!(
                "action '{}' is not in the action space of AAT '{}'",
                action_type, aat_id
            ));
        }
        AffordanceValidation::ok()
    }
}

/// Built-in parallelization defaults by archetype, per §4.1.
fn default_parallelization_rules(aat_id: &str) -> ParallelizationRules {
    match aat_id {
        "planner" => ParallelizationRules {
            parallelizable: true,
            max_concurrent: 3,
            requires_isolation: false,
            conflicts_with: vec!["planner".to_string()],
            preferred_enclave_scope: None,
        },
        "executor" => ParallelizationRules {
            parallelizable: true,
            max_concurrent: 20,
            requires_isolation: true,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        },
        "arbiter" => ParallelizationRules {
            parallelizable: false,
            max_concurrent: 1,
            requires_isolation: false,
            conflicts_with: vec!["arbiter".to_string()],
            preferred_enclave_scope: None,
        },
        "observer" => ParallelizationRules {
            parallelizable: true,
            max_concurrent: 10,
            requires_isolation: false,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        },
        "archivist" => ParallelizationRules {
            parallelizable: true,
            max_concurrent: 2,
            requires_isolation: false,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        },
        "analyst" => ParallelizationRules {
            parallelizable: true,
            max_concurrent: 3,
            requires_isolation: false,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        },
        _ => ParallelizationRules {
            parallelizable: false,
            max_concurrent: 1,
            requires_isolation: false,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionSpace, AllowedAction, BehavioralInvariant, EnforcementLevel, ForbiddenAction};

    fn planner_aat() -> Aat {
        Aat {
            id: "planner".to_string(),
            action_space: ActionSpace {
                allowed: vec![AllowedAction { action_type: "EmitPlan".to_string(), requires_capability: None }],
                forbidden: vec![ForbiddenAction { action_type: "Act".to_string(), rationale: Some("planner cannot act".to_string()) }],
            },
            behavioral_invariants: vec![BehavioralInvariant {
                id: "must-emit-plan".to_string(),
                enforcement: EnforcementLevel::Structural,
                required_output_action: Some("EmitPlan".to_string()),
            }],
            parallelization: None,
        }
    }

    #[test]
    fn unknown_aat_forbids_everything() {
        let registry = AatRegistry::new();
        assert!(registry.is_action_forbidden("ghost", "Anything"));
        assert!(!registry.is_action_allowed("ghost", "Anything"));
        assert!(!registry.validate_affordance_for_aat("ghost", "Anything").valid);
    }

    #[test]
    fn allowed_and_forbidden_are_respected() {
        let mut registry = AatRegistry::new();
        registry.register(planner_aat()).unwrap();

        assert!(registry.is_action_allowed("planner", "EmitPlan"));
        assert!(registry.is_action_forbidden("planner", "Act"));
        assert!(!registry.is_action_allowed("planner", "Act"));
        assert!(!registry.is_action_allowed("planner", "Unlisted"));
    }

    #[test]
    fn required_output_action_reads_structural_invariant() {
        let mut registry = AatRegistry::new();
        registry.register(planner_aat()).unwrap();
        assert_eq!(
            registry.get_required_output_action("planner"),
            Some("EmitPlan".to_string())
        );
        assert_eq!(registry.get_required_output_action("unknown"), None);
    }

    #[test]
    fn default_parallelization_rules_match_spec_table() {
        let registry = AatRegistry::new();
        assert_eq!(registry.get_parallelization_rules("planner").max_concurrent, 3);
        assert_eq!(registry.get_parallelization_rules("executor").max_concurrent, 20);
        assert!(registry.get_parallelization_rules("executor").requires_isolation);
        assert!(!registry.get_parallelization_rules("arbiter").parallelizable);
        assert_eq!(registry.get_parallelization_rules("observer").max_concurrent, 10);
        assert_eq!(registry.get_parallelization_rules("archivist").max_concurrent, 2);
        assert_eq!(registry.get_parallelization_rules("analyst").max_concurrent, 3);
    }

    #[test]
    fn explicit_parallelization_rules_override_default() {
        let mut aat = planner_aat();
        aat.parallelization = Some(ParallelizationRules {
            parallelizable: true,
            max_concurrent: 7,
            requires_isolation: false,
            conflicts_with: vec![],
            preferred_enclave_scope: None,
        });
        let mut registry = AatRegistry::new();
        registry.register(aat).unwrap();
        assert_eq!(registry.get_parallelization_rules("planner").max_concurrent, 7);
    }
}
