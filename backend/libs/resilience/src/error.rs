/// Error types surfaced by the invocation layer
use std::time::Duration;

/// Why a protected call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The dependency did not answer within the request timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The dependency returned an error.
    #[error("Dependency call failed: {0}")]
    DependencyFailure(String),
    /// Admission was denied and no fallback was available.
    #[error("Circuit breaker '{name}' is open - failing fast")]
    CircuitOpen { name: String },
    /// The fallback ran and failed.
    #[error("Fallback failed: {0}")]
    FallbackFailure(String),
    /// The caller cancelled the call before it completed.
    #[error("Call cancelled by caller")]
    Cancelled,
}

impl InvocationError {
    /// Errors that count against the circuit's health.
    pub fn is_dependency_fault(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::DependencyFailure(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Rejected breaker or retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("{0} must be a non-zero duration")]
    ZeroDuration(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}
