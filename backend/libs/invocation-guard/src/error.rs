use rate_limiter::RateLimitError;
use resilience::{ConfigError, InvocationError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Admission denied before the dependency was touched
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardError {
    /// Back-off hint for callers that were rate limited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited(RateLimitError::Exceeded { retry_after, .. }) => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GuardError::RateLimited(RateLimitError::Exceeded { .. }))
    }
}
