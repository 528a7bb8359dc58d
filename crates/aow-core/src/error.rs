//! Error taxonomy for the workflow engine core.
//!
//! Mirrors the shape used throughout the workspace: a small set of direct
//! `thiserror` tuple variants plus lower-case associated constructors so call
//! sites read `AowError::policy(format!(...))` rather than naming the enum
//! variant directly.

use thiserror::Error;

pub type AowResult<T> = Result<T, AowError>;

/// The error kinds named in the error-handling design. `error_kind()` returns
/// the stable taxonomy string so callers (and tests) can assert on the kind
/// without matching the full enum.
#[derive(Debug, Error)]
pub enum AowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("context expired or unknown: {0}")]
    ContextExpired(String),

    #[error("affordance unknown: {0}")]
    AffordanceUnknown(String),

    #[error("affordance disabled: {0}")]
    AffordanceDisabled(String),

    #[error("parameters invalid: {0}")]
    ParamsInvalid(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("credentials insufficient: {0}")]
    CredentialsInsufficient(String),

    #[error("action outside agent action space: {0}")]
    AatViolation(String),

    #[error("agent terminated without required output action: {0}")]
    StructuralMissingRequiredOutput(String),

    #[error("effect handler failed: {0}")]
    EffectFailed(String),

    #[error("reasoner returned a malformed decision: {0}")]
    ReasonerFailure(String),

    #[error("max iterations reached: {0}")]
    MaxIterationsReached(String),

    #[error("dispatch skipped, concurrency limited: {0}")]
    ConcurrencyLimited(String),

    #[error("dispatch paused, resource limit reached: {0}")]
    ResourceLimitReached(String),

    #[error("shared context conflict unresolved: {0}")]
    ConflictUnresolved(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("shared context error: {0}")]
    Context(String),

    #[error("provenance store error: {0}")]
    Provenance(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AowError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn context_expired(msg: impl Into<String>) -> Self {
        Self::ContextExpired(msg.into())
    }

    pub fn affordance_unknown(msg: impl Into<String>) -> Self {
        Self::AffordanceUnknown(msg.into())
    }

    pub fn affordance_disabled(msg: impl Into<String>) -> Self {
        Self::AffordanceDisabled(msg.into())
    }

    pub fn params_invalid(msg: impl Into<String>) -> Self {
        Self::ParamsInvalid(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::PolicyDenied(msg.into())
    }

    pub fn credentials_insufficient(msg: impl Into<String>) -> Self {
        Self::CredentialsInsufficient(msg.into())
    }

    pub fn aat_violation(msg: impl Into<String>) -> Self {
        Self::AatViolation(msg.into())
    }

    pub fn structural_missing_required_output(msg: impl Into<String>) -> Self {
        Self::StructuralMissingRequiredOutput(msg.into())
    }

    pub fn effect_failed(msg: impl Into<String>) -> Self {
        Self::EffectFailed(msg.into())
    }

    pub fn reasoner_failure(msg: impl Into<String>) -> Self {
        Self::ReasonerFailure(msg.into())
    }

    pub fn max_iterations_reached(msg: impl Into<String>) -> Self {
        Self::MaxIterationsReached(msg.into())
    }

    pub fn concurrency_limited(msg: impl Into<String>) -> Self {
        Self::ConcurrencyLimited(msg.into())
    }

    pub fn resource_limit_reached(msg: impl Into<String>) -> Self {
        Self::ResourceLimitReached(msg.into())
    }

    pub fn conflict_unresolved(msg: impl Into<String>) -> Self {
        Self::ConflictUnresolved(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn orchestrator(msg: impl Into<String>) -> Self {
        Self::Orchestrator(msg.into())
    }

    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    pub fn provenance(msg: impl Into<String>) -> Self {
        Self::Provenance(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable taxonomy string for this error, as named in the error-handling design.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidState(_) => "invalid-state",
            Self::Timeout(_) => "timeout",
            Self::ContextExpired(_) => "context-expired",
            Self::AffordanceUnknown(_) => "affordance-unknown",
            Self::AffordanceDisabled(_) => "affordance-disabled",
            Self::ParamsInvalid(_) => "params-invalid",
            Self::PolicyDenied(_) => "policy-denied",
            Self::CredentialsInsufficient(_) => "credentials-insufficient",
            Self::AatViolation(_) => "aat-violation",
            Self::StructuralMissingRequiredOutput(_) => "structural-missing-required-output",
            Self::EffectFailed(_) => "effect-failed",
            Self::ReasonerFailure(_) => "reasoner-failure",
            Self::MaxIterationsReached(_) => "max-iterations-reached",
            Self::ConcurrencyLimited(_) => "concurrency-limited",
            Self::ResourceLimitReached(_) => "resource-limit-reached",
            Self::ConflictUnresolved(_) => "conflict-unresolved",
            Self::Runtime(_) => "runtime",
            Self::Broker(_) => "broker",
            Self::Orchestrator(_) => "orchestrator",
            Self::Context(_) => "context",
            Self::Provenance(_) => "provenance",
            Self::Validation(_) => "validation",
        }
    }

    /// Whether this error kind is informational (never surfaces as a task failure).
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::ConcurrencyLimited(_) | Self::ResourceLimitReached(_))
    }
}

impl From<serde_yaml::Error> for AowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(format!("yaml error: {}", e))
    }
}

impl From<std::io::Error> for AowError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(format!("io error: {}", e))
    }
}

impl From<serde_json::Error> for AowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("json error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_matches_taxonomy() {
        assert_eq!(AowError::policy("nope").error_kind(), "policy-denied");
        assert_eq!(AowError::aat_violation("nope").error_kind(), "aat-violation");
        assert_eq!(
            AowError::concurrency_limited("busy").error_kind(),
            "concurrency-limited"
        );
    }

    #[test]
    fn informational_errors_are_flagged() {
        assert!(AowError::concurrency_limited("x").is_informational());
        assert!(AowError::resource_limit_reached("x").is_informational());
        assert!(!AowError::policy("x").is_informational());
    }
}
