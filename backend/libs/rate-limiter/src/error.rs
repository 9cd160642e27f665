use std::time::Duration;

/// Errors surfaced to callers of the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Admission denied; back off for `retry_after` before trying again.
    #[error("Rate limit exceeded for '{action}': {limit} units per window, retry after {retry_after:?}")]
    Exceeded {
        action: String,
        limit: u64,
        retry_after: Duration,
    },
    /// The shared store could not be reached. Only returned by operational
    /// calls (reset); admission checks recover from it.
    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// Failures inside a [`WindowStore`](crate::store::WindowStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

impl From<StoreError> for RateLimitError {
    fn from(err: StoreError) -> Self {
        RateLimitError::StoreUnavailable(err.to_string())
    }
}
